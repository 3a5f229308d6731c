mod common;

use rust_decimal_macros::dec;
use storefront_core::services::order_ledger::{CreateLineRequest, CreateOrderRequest};
use uuid::Uuid;

use common::TestApp;

async fn order_for(
    app: &TestApp,
    store_id: Uuid,
    customer_id: Uuid,
    confirmed: bool,
    product_ids: &[Uuid],
) -> Uuid {
    let order = app
        .state
        .orders
        .create_order(CreateOrderRequest {
            store_id,
            customer_id,
            delivery_fee: None,
            confirmed: Some(confirmed),
        })
        .await
        .unwrap();
    for product_id in product_ids {
        app.state
            .orders
            .create_line(CreateLineRequest {
                order_id: order.id,
                product_id: *product_id,
                quantity: 1,
                cost: None,
            })
            .await
            .unwrap();
    }
    order.id
}

#[tokio::test]
async fn purchase_history_counts_confirmed_orders_only() {
    let app = TestApp::new().await;
    let store = app.seed_store("Souko General").await;
    let customer = app.seed_customer(store.id, "asha@example.com").await;
    let beans = app
        .seed_product(store.id, "Beans", dec!(60.00), dec!(100.00))
        .await;
    app.seed_lot(beans.id, 10).await;

    order_for(&app, store.id, customer.id, true, &[beans.id]).await;
    order_for(&app, store.id, customer.id, true, &[beans.id]).await;
    order_for(&app, store.id, customer.id, false, &[beans.id]).await;

    assert_eq!(app.state.customers.order_count(customer.id).await.unwrap(), 2);
    assert_eq!(
        app.state
            .customers
            .product_order_count(customer.id, beans.id)
            .await
            .unwrap(),
        2
    );
}

#[tokio::test]
async fn ordered_products_are_distinct_in_first_purchase_order() {
    let app = TestApp::new().await;
    let store = app.seed_store("Souko General").await;
    let customer = app.seed_customer(store.id, "asha@example.com").await;

    let beans = app
        .seed_product(store.id, "Beans", dec!(60.00), dec!(100.00))
        .await;
    let rice = app
        .seed_product(store.id, "Rice", dec!(40.00), dec!(80.00))
        .await;
    app.seed_lot(beans.id, 10).await;
    app.seed_lot(rice.id, 10).await;

    order_for(&app, store.id, customer.id, true, &[rice.id]).await;
    app.clock.advance(chrono::Duration::seconds(1));
    order_for(&app, store.id, customer.id, true, &[beans.id, rice.id]).await;

    let products = app
        .state
        .customers
        .ordered_products(customer.id)
        .await
        .unwrap();
    let ids: Vec<Uuid> = products.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![rice.id, beans.id]);
}

#[tokio::test]
async fn customer_with_no_orders_has_empty_history() {
    let app = TestApp::new().await;
    let store = app.seed_store("Souko General").await;
    let customer = app.seed_customer(store.id, "asha@example.com").await;

    assert_eq!(app.state.customers.order_count(customer.id).await.unwrap(), 0);
    assert!(app
        .state
        .customers
        .ordered_products(customer.id)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        app.state
            .customers
            .product_order_count(customer.id, Uuid::new_v4())
            .await
            .unwrap(),
        0
    );
}
