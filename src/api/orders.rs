//! Checkout, order and payment endpoints

use axum::{extract::{Path, State}, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use validator::Validate;

use super::{AppState, Session};
use crate::domain::aggregates::{CardDetails, DeliveryType, OrderDetails, Payment, PaymentType};
use crate::domain::events::{DomainEvent, OrderEvent};
use crate::store::{OrderLine, OrderView};
use crate::Result;

#[derive(Debug, Deserialize)]
pub struct OrderLineRequest {
    pub id: i64,
    pub count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: i64,
}

#[instrument(skip(s, lines), fields(session = %session.id, line_count = lines.len()))]
pub async fn create_order(State(s): State<AppState>, session: Session, Json(lines): Json<Vec<OrderLineRequest>>) -> Result<Json<OrderCreated>> {
    let lines: Vec<OrderLine> = lines.iter().map(|l| OrderLine { product: l.id, count: l.count }).collect();
    let order = s.store.place_order(session.id, &lines).await?;
    info!(order_id = order.id, total = %order.total_cost.amount(), "order placed");
    s.events
        .publish(DomainEvent::Order(OrderEvent::Placed { order_id: order.id, total: order.total_cost.amount(), lines: lines.len() }))
        .await;
    Ok(Json(OrderCreated { order_id: order.id }))
}

pub async fn list_orders(State(s): State<AppState>) -> Result<Json<Vec<OrderView>>> {
    Ok(Json(s.store.orders().await?))
}

pub async fn get_order(State(s): State<AppState>, Path(id): Path<i64>) -> Result<Json<OrderView>> {
    Ok(Json(s.store.order(id).await?))
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmOrderRequest {
    #[validate(length(min = 1, max = 100))]
    pub full_name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, max = 20))]
    pub phone: String,
    pub delivery_type: DeliveryType,
    pub payment_type: PaymentType,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[validate(length(min = 1, max = 200))]
    pub address: String,
}

impl From<ConfirmOrderRequest> for OrderDetails {
    fn from(r: ConfirmOrderRequest) -> Self {
        Self {
            full_name: r.full_name,
            email: r.email,
            phone: r.phone,
            delivery_type: r.delivery_type,
            payment_type: r.payment_type,
            city: r.city,
            address: r.address,
        }
    }
}

#[instrument(skip(s, req))]
pub async fn confirm_order(State(s): State<AppState>, Path(id): Path<i64>, Json(req): Json<ConfirmOrderRequest>) -> Result<Json<OrderCreated>> {
    req.validate()?;
    let order = s.store.confirm_order(id, req.into()).await?;
    s.events.publish(DomainEvent::Order(OrderEvent::Confirmed { order_id: order.id })).await;
    Ok(Json(OrderCreated { order_id: order.id }))
}

#[derive(Deserialize)]
pub struct PaymentRequest {
    pub number: String,
    pub name: String,
    pub month: u8,
    pub year: u16,
    pub code: u16,
}

#[instrument(skip(s, req))]
pub async fn pay_order(State(s): State<AppState>, Path(id): Path<i64>, Json(req): Json<PaymentRequest>) -> Result<Json<Payment>> {
    let card = CardDetails::parse(&req.number, &req.name, req.month, req.year, req.code)?;
    let payment = s.store.record_payment(id, &card).await?;
    s.events.publish(DomainEvent::Order(OrderEvent::Paid { order_id: id })).await;
    Ok(Json(payment))
}
