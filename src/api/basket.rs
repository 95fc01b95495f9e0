//! Session basket endpoints

use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::instrument;

use super::{AppState, Session};
use crate::domain::aggregates::Product;
use crate::domain::events::{BasketEvent, DomainEvent};
use crate::store::BasketItem;
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct BasketRequest {
    pub id: i64,
    pub count: u32,
}

/// Basket lines rendered as products whose `count` is the reserved quantity.
fn render(items: Vec<BasketItem>) -> Vec<Product> {
    items
        .into_iter()
        .map(|BasketItem { line, mut product }| {
            product.count = line.count;
            product
        })
        .collect()
}

async fn current(s: &AppState, session: &Session) -> Result<Json<Vec<Product>>> {
    Ok(Json(render(s.store.basket(session.id).await?)))
}

pub async fn get_basket(State(s): State<AppState>, session: Session) -> Result<Json<Vec<Product>>> {
    current(&s, &session).await
}

#[instrument(skip(s), fields(session = %session.id))]
pub async fn add_to_basket(State(s): State<AppState>, session: Session, Json(req): Json<BasketRequest>) -> Result<Json<Vec<Product>>> {
    s.store.reserve(session.id, req.id, req.count).await?;
    s.events.publish(DomainEvent::Basket(BasketEvent::Reserved { session: session.id, product_id: req.id, quantity: req.count })).await;
    current(&s, &session).await
}

#[instrument(skip(s), fields(session = %session.id))]
pub async fn remove_from_basket(State(s): State<AppState>, session: Session, Json(req): Json<BasketRequest>) -> Result<Json<Vec<Product>>> {
    s.store.release(session.id, req.id, req.count).await?;
    s.events.publish(DomainEvent::Basket(BasketEvent::Released { session: session.id, product_id: req.id, quantity: req.count })).await;
    current(&s, &session).await
}
