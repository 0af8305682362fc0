mod common;

use axum::http::{Method, StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};
use serde_json::json;
use uuid::Uuid;

use ezfix_api::entities::{notification_outbox, order, order_item};

use common::{checkout_payload, read_json, TestApp};

async fn table_counts(app: &TestApp) -> (u64, u64, u64) {
    let db = app.state.db.as_ref();
    let orders = order::Entity::find().count(db).await.expect("count orders");
    let items = order_item::Entity::find()
        .count(db)
        .await
        .expect("count items");
    let outbox = notification_outbox::Entity::find()
        .count(db)
        .await
        .expect("count outbox");
    (orders, items, outbox)
}

#[tokio::test]
async fn guest_checkout_creates_a_pending_order() {
    let app = TestApp::new().await;

    let response = app
        .request(Method::POST, "/orders", Some(checkout_payload()), None)
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["order"]["total"], "54.99");
    assert_eq!(body["order"]["status"], "pending");
    assert_eq!(body["order"]["itemCount"], 1);
    let number = body["order"]["orderNumber"].as_str().expect("order number");
    assert!(number.starts_with("EZF-"), "unexpected number {number}");
    assert_eq!(
        body["message"],
        format!("Order {} created", number),
        "message should quote the order number"
    );

    let (orders, items, outbox) = table_counts(&app).await;
    assert_eq!((orders, items), (1, 1));
    // Customer confirmation plus the owner notice.
    assert_eq!(outbox, 2);

    let saved = order::Entity::find()
        .one(app.state.db.as_ref())
        .await
        .expect("query order")
        .expect("order should exist");
    assert_eq!(saved.customer_email, "jana@example.com");
    assert!(saved.user_id.is_none(), "guest orders carry no owner");

    let recipients: Vec<String> = notification_outbox::Entity::find()
        .all(app.state.db.as_ref())
        .await
        .expect("query outbox")
        .into_iter()
        .map(|row| row.recipient)
        .collect();
    assert!(recipients.contains(&"jana@example.com".to_string()));
    assert!(recipients.contains(&app.state.config.owner_email));
}

#[tokio::test]
async fn signed_in_checkout_links_the_order_to_the_customer() {
    let app = TestApp::new().await;
    let customer_id = Uuid::new_v4();
    let token = app.customer_token(customer_id);

    let response = app
        .request(
            Method::POST,
            "/orders",
            Some(checkout_payload()),
            Some(&token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let saved = order::Entity::find()
        .one(app.state.db.as_ref())
        .await
        .expect("query order")
        .expect("order should exist");
    assert_eq!(saved.user_id, Some(customer_id));
}

#[tokio::test]
async fn zasilkovna_without_pickup_point_is_rejected() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["serviceType"] = json!("zasilkovna");

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["success"], false);
    let error = body["error"].as_str().expect("error message");
    assert!(error.contains("pickup point"), "got: {error}");

    assert_eq!(table_counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn zasilkovna_with_pickup_point_goes_through() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["serviceType"] = json!("zasilkovna");
    payload["deliveryFee"] = json!(89);
    payload["packetaPoint"] = json!({
        "name": "Z-Box Smíchov",
        "street": "Nádražní 32",
        "city": "Praha",
        "zip": "15000"
    });

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["order"]["total"], "138.99");

    let saved = order::Entity::find()
        .one(app.state.db.as_ref())
        .await
        .expect("query order")
        .expect("order should exist");
    let point = saved.packeta_point.expect("pickup point stored");
    assert!(point.contains("Z-Box Smíchov"));
}

#[tokio::test]
async fn unparseable_item_price_rejects_checkout() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["cartItems"][0]["price"] = json!("abc");

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["success"], false);

    // Nothing was written on the failed attempt.
    assert_eq!(table_counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn own_courier_waives_the_delivery_fee() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["serviceType"] = json!("delivery");
    payload["deliveryFee"] = json!(89);

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["order"]["total"], "49.99");
}

#[tokio::test]
async fn empty_cart_is_rejected() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["cartItems"] = json!([]);

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(table_counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn unknown_service_type_still_answers_the_envelope() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["serviceType"] = json!("drone");

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = read_json(response).await;
    assert_eq!(body["success"], false);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn missing_contact_details_are_rejected() {
    let app = TestApp::new().await;
    let mut payload = checkout_payload();
    payload["customerEmail"] = json!("not-an-email");

    let response = app.request(Method::POST, "/orders", Some(payload), None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(table_counts(&app).await, (0, 0, 0));
}

#[tokio::test]
async fn listing_shows_the_new_order_with_counts() {
    let app = TestApp::new().await;
    app.request(Method::POST, "/orders", Some(checkout_payload()), None)
        .await;

    let manager = app.manager_token();
    let response = app
        .request(Method::GET, "/orders", None, Some(&manager))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    let orders = body["orders"].as_array().expect("orders array");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["itemCount"], 1);
    assert_eq!(orders[0]["customerEmail"], "jana@example.com");
    assert_eq!(body["statusCounts"]["pending"], 1);
    assert_eq!(body["statusCounts"]["inProgress"], 0);
    assert_eq!(body["statusCounts"]["completed"], 0);
}

#[tokio::test]
async fn listing_requires_authentication() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/orders", None, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = read_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn checkout_rows_survive_into_the_tracking_lookup() {
    let app = TestApp::new().await;
    let created = read_json(
        app.request(Method::POST, "/orders", Some(checkout_payload()), None)
            .await,
    )
    .await;
    let number = created["order"]["orderNumber"].as_str().expect("number");

    // Tracking is public and matches case-insensitively on both values.
    let response = app
        .request(
            Method::POST,
            "/orders/track",
            Some(json!({
                "orderNumber": number.to_lowercase(),
                "email": "JANA@EXAMPLE.COM"
            })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["order"]["orderNumber"], number);
    assert_eq!(body["order"]["items"][0]["repairName"], "Screen replacement");
}

#[tokio::test]
async fn pending_notifications_reference_the_created_order() {
    let app = TestApp::new().await;
    app.request(Method::POST, "/orders", Some(checkout_payload()), None)
        .await;

    let saved = order::Entity::find()
        .one(app.state.db.as_ref())
        .await
        .expect("query order")
        .expect("order should exist");

    let rows = notification_outbox::Entity::find()
        .filter(notification_outbox::Column::OrderId.eq(saved.id))
        .all(app.state.db.as_ref())
        .await
        .expect("query outbox");
    assert_eq!(rows.len(), 2);
    for row in &rows {
        assert_eq!(row.status, "pending");
        assert_eq!(row.attempts, 0);
        let payload: serde_json::Value =
            serde_json::from_str(&row.payload).expect("payload is json");
        assert_eq!(payload["digest"]["order_number"], saved.order_number);
    }

    let kinds: Vec<String> = rows.into_iter().map(|row| row.kind).collect();
    assert!(kinds.contains(&"order-confirmation".to_string()));
    assert!(kinds.contains(&"owner-new-order".to_string()));
}
