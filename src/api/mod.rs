//! HTTP surface

pub mod auth;
pub mod basket;
pub mod catalog;
pub mod error;
pub mod orders;
pub mod session;

use std::sync::Arc;

use axum::{middleware, routing::{get, post}, Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::publisher::EventPublisher;
use crate::store::Store;
pub use session::{Session, Sessions};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub sessions: Sessions,
    pub events: EventPublisher,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, events: EventPublisher) -> Self {
        Self { store, sessions: Sessions::default(), events }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/categories/", get(catalog::list_categories))
        .route("/catalog", get(catalog::list_catalog))
        .route("/products/limited", get(catalog::list_limited))
        .route("/sales", get(catalog::list_sales))
        .route("/tags", get(catalog::list_tags))
        .route("/product/:id", get(catalog::get_product))
        .route("/product/:id/reviews", post(catalog::add_review))
        .route("/basket", get(basket::get_basket).post(basket::add_to_basket).delete(basket::remove_from_basket))
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/order/:id", get(orders::get_order).post(orders::confirm_order))
        .route("/payment/:id", post(orders::pay_order))
        .route("/sign-up", post(auth::sign_up))
        .route("/sign-in", post(auth::sign_in))
        .route("/sign-out", post(auth::sign_out))
        .route("/profile", get(auth::get_profile).post(auth::update_profile))
        .route("/profile/password", post(auth::change_password))
        .layer(middleware::from_fn_with_state(state.clone(), session::attach_session))
        // sessionless
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "storefront"})) }))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
