pub mod customers;
pub mod metrics;
pub mod order_ledger;
pub mod stock_ledger;
pub mod stores;

pub use customers::CustomerService;
pub use metrics::MetricsAggregator;
pub use order_ledger::OrderLedger;
pub use stock_ledger::StockLedger;
pub use stores::StoreService;
