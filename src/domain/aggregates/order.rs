//! Order Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::product::Product;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub delivery_type: Option<DeliveryType>,
    pub payment_type: Option<PaymentType>,
    pub total_cost: Money,
    pub status: OrderStatus,
    pub city: String,
    pub address: String,
    /// Ids of the sale snapshots taken at checkout. Rendered as full rows by the store's order view.
    #[serde(skip)]
    pub products: Vec<i64>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus { #[default] Created, Accepted, Paid }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryType { Ordinary, Express }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentType { Online, Someone }

/// Customer and delivery details filled in after checkout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderDetails {
    pub full_name: String,
    pub email: String,
    pub phone: String,
    pub delivery_type: DeliveryType,
    pub payment_type: PaymentType,
    pub city: String,
    pub address: String,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self { Self::Created => "created", Self::Accepted => "accepted", Self::Paid => "paid" }
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "created" => Ok(Self::Created), "accepted" => Ok(Self::Accepted), "paid" => Ok(Self::Paid), other => Err(format!("unknown order status {other:?}")) }
    }
}

impl DeliveryType {
    pub fn as_str(&self) -> &'static str { match self { Self::Ordinary => "ordinary", Self::Express => "express" } }
}

impl std::str::FromStr for DeliveryType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "ordinary" => Ok(Self::Ordinary), "express" => Ok(Self::Express), other => Err(format!("unknown delivery type {other:?}")) }
    }
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str { match self { Self::Online => "online", Self::Someone => "someone" } }
}

impl std::str::FromStr for PaymentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s { "online" => Ok(Self::Online), "someone" => Ok(Self::Someone), other => Err(format!("unknown payment type {other:?}")) }
    }
}

impl Order {
    /// An empty order as created at checkout. The id is assigned by the store.
    pub fn open() -> Self {
        Self {
            id: 0, created_at: Utc::now(), full_name: String::new(), email: String::new(), phone: String::new(),
            delivery_type: None, payment_type: None, total_cost: Money::zero(), status: OrderStatus::Created,
            city: String::new(), address: String::new(), products: vec![],
        }
    }

    /// Links a stored snapshot and adds its line total to the order.
    pub fn add_snapshot(&mut self, snapshot: &Product) {
        self.total_cost = self.total_cost.add(&snapshot.line_total());
        self.products.push(snapshot.id);
    }

    pub fn confirm(&mut self, details: OrderDetails) -> Result<(), OrderError> {
        if self.status == OrderStatus::Paid { return Err(OrderError::AlreadyPaid(self.id)); }
        self.full_name = details.full_name;
        self.email = details.email;
        self.phone = details.phone;
        self.delivery_type = Some(details.delivery_type);
        self.payment_type = Some(details.payment_type);
        self.city = details.city;
        self.address = details.address;
        self.status = OrderStatus::Accepted;
        Ok(())
    }

    pub fn mark_paid(&mut self) -> Result<(), OrderError> {
        match self.status {
            OrderStatus::Created => Err(OrderError::NotConfirmed(self.id)),
            OrderStatus::Paid => Err(OrderError::AlreadyPaid(self.id)),
            OrderStatus::Accepted => { self.status = OrderStatus::Paid; Ok(()) }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum OrderError { Empty, NotConfirmed(i64), AlreadyPaid(i64) }
impl std::error::Error for OrderError {}
impl std::fmt::Display for OrderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "Order has no items"),
            Self::NotConfirmed(id) => write!(f, "Order {id} has no confirmed details"),
            Self::AlreadyPaid(id) => write!(f, "Order {id} is already paid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn details() -> OrderDetails {
        OrderDetails {
            full_name: "Ann Lee".into(), email: "ann@example.com".into(), phone: "+15550100".into(),
            delivery_type: DeliveryType::Express, payment_type: PaymentType::Online,
            city: "Riga".into(), address: "Main st 1".into(),
        }
    }

    #[test]
    fn test_total_from_snapshots() {
        let mut order = Order::open();
        let mut a = Product::create(1, "A", Money::new(Decimal::new(10, 0))).snapshot(2);
        a.id = 11;
        let mut b = Product::create(1, "B", Money::new(Decimal::new(5, 0))).snapshot(3);
        b.id = 12;
        order.add_snapshot(&a);
        order.add_snapshot(&b);
        assert_eq!(order.total_cost.amount(), Decimal::new(35, 0));
        assert_eq!(order.products, vec![11, 12]);
    }

    #[test]
    fn test_order_workflow() {
        let mut order = Order::open();
        assert_eq!(order.mark_paid(), Err(OrderError::NotConfirmed(0)));
        order.confirm(details()).unwrap();
        assert_eq!(order.status, OrderStatus::Accepted);
        assert_eq!(order.delivery_type, Some(DeliveryType::Express));
        order.mark_paid().unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.confirm(details()), Err(OrderError::AlreadyPaid(0)));
        assert_eq!(order.mark_paid(), Err(OrderError::AlreadyPaid(0)));
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!("express".parse::<DeliveryType>().unwrap(), DeliveryType::Express);
        assert_eq!(PaymentType::Someone.as_str(), "someone");
        assert!("shipped".parse::<OrderStatus>().is_err());
        assert_eq!(serde_json::to_string(&OrderStatus::Accepted).unwrap(), "\"accepted\"");
    }
}
