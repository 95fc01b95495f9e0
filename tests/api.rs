use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use storefront::{
    api::{self, session, AppState},
    domain::aggregates::{Category, Product},
    domain::value_objects::Money,
    publisher::EventPublisher,
    store::{MemoryStore, Store},
};
use tower::ServiceExt;

struct Shop {
    app: Router,
    state: AppState,
    store: Arc<MemoryStore>,
    cookie: Option<String>,
}

impl Shop {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), EventPublisher::default());
        Self { app: api::router(state.clone()), state, store, cookie: None }
    }

    /// Another client of the same running shop, without a cookie.
    fn client(&self) -> Self {
        Self { app: self.app.clone(), state: self.state.clone(), store: self.store.clone(), cookie: None }
    }

    async fn product(&self, title: &str, price: i64, stock: u32) -> i64 {
        let category = self.store.insert_category(Category { id: 0, title: "tools".into(), image: None, subcategories: vec![] }).await.unwrap();
        let product = Product::create(category.id, title, Money::new(Decimal::from(price))).with_stock(stock);
        self.store.insert_product(product).await.unwrap().id
    }

    /// Sends a request inside this shop's session, starting one on first use.
    async fn send(&mut self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(cookie) = &self.cookie {
            req = req.header(header::COOKIE, cookie);
        }
        let req = match body {
            Some(body) => req.header(header::CONTENT_TYPE, "application/json").body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = self.app.clone().oneshot(req).await.unwrap();
        if let Some(set) = res.headers().get(header::SET_COOKIE) {
            let pair = set.to_str().unwrap().split(';').next().unwrap().to_string();
            self.cookie = Some(pair);
        }
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
        (status, value)
    }

    async fn get(&mut self, uri: &str) -> (StatusCode, Value) { self.send(Method::GET, uri, None).await }
    async fn post(&mut self, uri: &str, body: Value) -> (StatusCode, Value) { self.send(Method::POST, uri, Some(body)).await }
    async fn delete(&mut self, uri: &str, body: Value) -> (StatusCode, Value) { self.send(Method::DELETE, uri, Some(body)).await }

    async fn stock(&mut self, id: i64) -> u64 {
        let (status, body) = self.get(&format!("/product/{id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["count"].as_u64().unwrap()
    }
}

#[tokio::test]
async fn test_session_cookie_is_issued_once() {
    let mut shop = Shop::new();
    let (status, _) = shop.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(shop.cookie.is_none());

    shop.get("/basket").await;
    let first = shop.cookie.clone().unwrap();
    assert!(first.starts_with("sessionid="));
    shop.get("/basket").await;
    assert_eq!(shop.cookie.as_deref(), Some(first.as_str()));
}

#[tokio::test]
async fn test_basket_reserves_and_releases_stock() {
    let mut shop = Shop::new();
    let id = shop.product("Hammer", 10, 5).await;

    let (status, basket) = shop.post("/basket", json!({"id": id, "count": 3})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(basket[0]["id"], id);
    assert_eq!(basket[0]["count"], 3);
    assert_eq!(shop.stock(id).await, 2);

    let (status, body) = shop.post("/basket", json!({"id": id, "count": 3})).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());
    assert_eq!(shop.stock(id).await, 2);

    let (status, basket) = shop.delete("/basket", json!({"id": id, "count": 1})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(basket[0]["count"], 2);

    // over-release restores exactly what the line held
    let (status, basket) = shop.delete("/basket", json!({"id": id, "count": 10})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(basket, json!([]));
    assert_eq!(shop.stock(id).await, 5);
}

#[tokio::test]
async fn test_baskets_are_per_session() {
    let mut alice = Shop::new();
    let id = alice.product("Saw", 20, 4).await;
    let mut bob = alice.client();

    alice.post("/basket", json!({"id": id, "count": 1})).await;
    let (_, basket) = bob.get("/basket").await;
    assert_eq!(basket, json!([]));
    let (status, _) = bob.delete("/basket", json!({"id": id, "count": 1})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_checkout_payment_flow() {
    let mut shop = Shop::new();
    let hammer = shop.product("Hammer", 10, 5).await;
    let nails = shop.product("Nails", 5, 10).await;
    shop.post("/basket", json!({"id": hammer, "count": 2})).await;

    let (status, created) = shop.post("/orders", json!([{"id": hammer, "count": 2}, {"id": nails, "count": 3}])).await;
    assert_eq!(status, StatusCode::OK);
    let order_id = created["orderId"].as_i64().unwrap();

    // reserved units are consumed from the basket, the rest from stock
    assert_eq!(shop.stock(hammer).await, 3);
    assert_eq!(shop.stock(nails).await, 7);
    assert_eq!(shop.get("/basket").await.1, json!([]));

    let (status, order) = shop.get(&format!("/order/{order_id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["totalCost"].as_f64(), Some(35.0));
    assert_eq!(order["status"], "created");
    let snapshots = order["products"].as_array().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert!(snapshots.iter().all(|p| p["sale"] == true));

    let year = Utc::now().year();
    let card = json!({"number": "4111 1111 1111 1111", "name": "Ann Lee", "month": 12, "year": year, "code": 123});
    let (status, _) = shop.post(&format!("/payment/{order_id}"), card.clone()).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let details = json!({
        "fullName": "Ann Lee", "email": "ann@example.com", "phone": "+100200300",
        "deliveryType": "express", "paymentType": "online", "city": "Riga", "address": "Main st 1"
    });
    let (status, confirmed) = shop.post(&format!("/order/{order_id}"), details).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["orderId"], order_id);

    let bad_card = json!({"number": "4111", "name": "Ann Lee", "month": 12, "year": year, "code": 123});
    assert_eq!(shop.post(&format!("/payment/{order_id}"), bad_card).await.0, StatusCode::BAD_REQUEST);

    let (status, payment) = shop.post(&format!("/payment/{order_id}"), card.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payment["number"], "************1111");
    assert!(payment.get("code").is_none());

    assert_eq!(shop.post(&format!("/payment/{order_id}"), card).await.0, StatusCode::CONFLICT);
    assert_eq!(shop.get(&format!("/order/{order_id}")).await.1["status"], "paid");
    assert_eq!(shop.get("/orders").await.1.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_checkout_rolls_back_on_short_stock() {
    let mut shop = Shop::new();
    let hammer = shop.product("Hammer", 10, 5).await;
    let nails = shop.product("Nails", 5, 1).await;

    let (status, _) = shop.post("/orders", json!([{"id": hammer, "count": 2}, {"id": nails, "count": 3}])).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(shop.stock(hammer).await, 5);
    assert_eq!(shop.get("/orders").await.1, json!([]));

    assert_eq!(shop.post("/orders", json!([])).await.0, StatusCode::BAD_REQUEST);
    assert_eq!(shop.post("/orders", json!([{"id": 999, "count": 1}])).await.0, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_catalog_filters_and_pages() {
    let mut shop = Shop::new();
    shop.product("Cheap", 5, 3).await;
    shop.product("Mid", 10, 3).await;
    shop.product("Upper", 100, 3).await;
    shop.product("Luxury", 200, 3).await;

    let (status, page) = shop.get("/catalog?filter%5BminPrice%5D=6&filter%5BmaxPrice%5D=150&sortType=inc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["currentPage"], 1);
    assert_eq!(page["lastPage"], 1);
    // the first page window starts at row 1
    let items = page["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["title"], "Upper");

    let (_, page) = shop.get("/catalog?filter%5Bname%5D=lux&limit=1").await;
    assert_eq!(page["lastPage"], 1);

    assert_eq!(shop.get("/catalog?limit=0").await.0, StatusCode::BAD_REQUEST);
    assert_eq!(shop.get("/catalog?filter%5BminPrice%5D=abc").await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reviews_update_rating() {
    let mut shop = Shop::new();
    let id = shop.product("Drill", 50, 2).await;
    let review = |rate: u8| json!({"author": "Ann", "email": "ann@example.com", "text": "Solid", "rate": rate});

    shop.post(&format!("/product/{id}/reviews"), review(3)).await;
    let (status, reviews) = shop.post(&format!("/product/{id}/reviews"), review(4)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviews.as_array().unwrap().len(), 2);
    let (_, product) = shop.get(&format!("/product/{id}")).await;
    assert_eq!(product["rating"].as_f64(), Some(3.5));
    assert_eq!(product["reviews"].as_array().unwrap().len(), 2);

    assert_eq!(shop.post(&format!("/product/{id}/reviews"), review(6)).await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_accounts_and_profile() {
    let mut shop = Shop::new();
    assert_eq!(shop.get("/profile").await.0, StatusCode::UNAUTHORIZED);

    let sign_up = json!({"name": "Ann", "username": "ann", "password": "s3cret-pass"});
    assert_eq!(shop.post("/sign-up", sign_up.clone()).await.0, StatusCode::OK);
    let (status, profile) = shop.get("/profile").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["fullName"], "Ann");

    let update = json!({"fullName": "Ann Lee", "email": "ann@example.com", "phone": "+100200300"});
    let (status, profile) = shop.post("/profile", update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(profile["email"], "ann@example.com");

    let change = json!({"currentPassword": "wrong-pass", "newPassword": "even-longer-pass"});
    assert_eq!(shop.post("/profile/password", change).await.0, StatusCode::UNAUTHORIZED);

    shop.post("/sign-out", json!({})).await;
    assert_eq!(shop.get("/profile").await.0, StatusCode::UNAUTHORIZED);

    assert_eq!(shop.post("/sign-in", json!({"username": "ann", "password": "nope"})).await.0, StatusCode::UNAUTHORIZED);
    assert_eq!(shop.post("/sign-in", json!({"username": "ann", "password": "s3cret-pass"})).await.0, StatusCode::OK);
    assert_eq!(shop.get("/profile").await.1["fullName"], "Ann Lee");

    assert_eq!(shop.post("/sign-up", sign_up).await.0, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_lookup_errors() {
    let mut shop = Shop::new();
    let (status, body) = shop.get("/product/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("999"));
    assert_eq!(shop.get("/order/999").await.0, StatusCode::NOT_FOUND);
    assert_eq!(shop.get("/tags").await.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sales_page_beyond_range_is_empty() {
    let mut shop = Shop::new();
    let (status, page) = shop.get("/sales?currentPage=4294967295").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["items"], json!([]));
    assert_eq!(page["currentPage"], 4294967295u64);
}

#[tokio::test]
async fn test_sign_in_rotates_session() {
    let mut shop = Shop::new();
    let id = shop.product("Level", 30, 4).await;
    shop.post("/basket", json!({"id": id, "count": 2})).await;
    let planted = shop.cookie.clone().unwrap();

    let sign_up = json!({"name": "Ann", "username": "ann", "password": "s3cret-pass"});
    assert_eq!(shop.post("/sign-up", sign_up).await.0, StatusCode::OK);
    let rotated = shop.cookie.clone().unwrap();
    assert_ne!(rotated, planted);

    // the basket follows the new session
    let (_, basket) = shop.get("/basket").await;
    assert_eq!(basket[0]["count"], 2);
    assert_eq!(shop.get("/profile").await.0, StatusCode::OK);

    let mut replay = shop.client();
    replay.cookie = Some(planted.clone());
    assert_eq!(replay.get("/profile").await.0, StatusCode::UNAUTHORIZED);
    assert_ne!(replay.cookie.as_deref(), Some(planted.as_str()));

    shop.post("/sign-out", json!({})).await;
    assert_eq!(shop.post("/sign-in", json!({"username": "ann", "password": "s3cret-pass"})).await.0, StatusCode::OK);
    assert_ne!(shop.cookie.as_deref(), Some(rotated.as_str()));
    assert_eq!(shop.get("/basket").await.1[0]["count"], 2);
}

#[tokio::test]
async fn test_sweep_releases_idle_baskets() {
    let mut shop = Shop::new();
    let id = shop.product("Clamp", 12, 6).await;
    shop.post("/basket", json!({"id": id, "count": 4})).await;
    assert_eq!(shop.stock(id).await, 2);

    assert_eq!(session::sweep(&shop.state, Duration::from_secs(3600)).await.unwrap(), 0);
    assert_eq!(shop.stock(id).await, 2);

    assert_eq!(session::sweep(&shop.state, Duration::ZERO).await.unwrap(), 1);
    // the stale cookie now starts an empty session
    assert_eq!(shop.get("/basket").await.1, json!([]));
    assert_eq!(shop.stock(id).await, 6);
}

#[tokio::test]
async fn test_sweep_releases_baskets_without_a_live_session() {
    let shop = Shop::new();
    let id = shop.product("Vise", 40, 3).await;
    // lines left behind by a previous process
    shop.store.reserve(uuid::Uuid::new_v4(), id, 3).await.unwrap();

    assert_eq!(session::sweep(&shop.state, Duration::from_secs(3600)).await.unwrap(), 1);
    assert!(shop.store.basket_sessions().await.unwrap().is_empty());
    assert_eq!(shop.store.product_detail(id).await.unwrap().product.count.value(), 3);
}
