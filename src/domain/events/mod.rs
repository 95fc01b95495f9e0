//! Domain events
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Basket(BasketEvent),
    Order(OrderEvent),
    Catalog(CatalogEvent),
    Account(AccountEvent),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BasketEvent {
    Reserved { session: Uuid, product_id: i64, quantity: u32 },
    Released { session: Uuid, product_id: i64, quantity: u32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OrderEvent {
    Placed { order_id: i64, total: Decimal, lines: usize },
    Confirmed { order_id: i64 },
    Paid { order_id: i64 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CatalogEvent {
    Reviewed { product_id: i64, rating: f32 },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccountEvent {
    SignedUp { account_id: i64 },
}

impl DomainEvent {
    /// NATS subject the event is published on.
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Basket(BasketEvent::Reserved { .. }) => "shop.basket.reserved",
            Self::Basket(BasketEvent::Released { .. }) => "shop.basket.released",
            Self::Order(OrderEvent::Placed { .. }) => "shop.orders.placed",
            Self::Order(OrderEvent::Confirmed { .. }) => "shop.orders.confirmed",
            Self::Order(OrderEvent::Paid { .. }) => "shop.orders.paid",
            Self::Catalog(CatalogEvent::Reviewed { .. }) => "shop.catalog.reviewed",
            Self::Account(AccountEvent::SignedUp { .. }) => "shop.accounts.signed_up",
        }
    }
}
