//! Database entities for the commerce core.
//!
//! Derived quantities (stock remaining, order totals, balances, profit) are
//! deliberately not stored on these models; they are recomputed from freshly
//! loaded children by the ledger services.

pub mod category;
pub mod customer;
pub mod daily_metric;
pub mod order;
pub mod order_line;
pub mod payment;
pub mod product;
pub mod schedule_entry;
pub mod stock_lot;
pub mod store;
pub mod store_category;
