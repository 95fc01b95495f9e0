//! Product Aggregate and the catalog records hanging off it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{Money, Quantity};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: i64,
    pub category: i64,
    pub price: Money,
    pub count: Quantity,
    pub date: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    pub full_description: Option<String>,
    pub free_delivery: bool,
    pub rating: f32,
    pub limited: bool,
    /// Set on rows cloned at checkout. Such rows are order history, not catalog stock.
    pub sale: bool,
    pub tags: Vec<i64>,
    pub images: Vec<Image>,
    pub specifications: Vec<Specification>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)] pub struct Image { pub src: String, pub alt: String }
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)] pub struct Specification { pub name: String, pub value: String }

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Category { pub id: i64, pub title: String, pub image: Option<Image>, pub subcategories: Vec<i64> }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag { pub id: i64, pub category: i64, pub name: String }

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review { pub id: i64, pub product: i64, pub author: String, pub email: String, pub text: String, pub rate: u8, pub date: DateTime<Utc> }

impl Product {
    /// A fresh catalog row. The id is assigned by the store on insert.
    pub fn create(category: i64, title: impl Into<String>, price: Money) -> Self {
        Self {
            id: 0, category, price, count: Quantity::default(), date: Utc::now(), title: title.into(),
            description: None, full_description: None, free_delivery: false, rating: 0.0,
            limited: false, sale: false, tags: vec![], images: vec![], specifications: vec![],
        }
    }

    pub fn with_stock(mut self, count: u32) -> Self { self.count = Quantity::new(count); self }
    pub fn is_available(&self) -> bool { !self.sale && !self.count.is_zero() }

    pub fn take_stock(&mut self, qty: u32) -> Result<(), ProductError> {
        if self.sale { return Err(ProductError::SaleSnapshot(self.id)); }
        self.count = self.count.subtract(qty).ok_or(ProductError::InsufficientStock {
            product: self.id, available: self.count.value(), requested: qty,
        })?;
        Ok(())
    }

    pub fn restock(&mut self, qty: u32) { self.count = self.count.add(qty); }

    /// Copies this row into an order-history snapshot holding `qty` units.
    pub fn snapshot(&self, qty: u32) -> Product {
        Product { id: 0, count: Quantity::new(qty), date: Utc::now(), sale: true, ..self.clone() }
    }

    pub fn line_total(&self) -> Money { self.price.multiply(self.count.value()) }

    /// Rating is the mean review rate, rounded to one decimal place.
    pub fn apply_rating(&mut self, rates: &[u8]) {
        if rates.is_empty() { self.rating = 0.0; return; }
        let mean = rates.iter().map(|r| f64::from(*r)).sum::<f64>() / rates.len() as f64;
        self.rating = ((mean * 10.0).round() / 10.0) as f32;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductError { InsufficientStock { product: i64, available: u32, requested: u32 }, SaleSnapshot(i64) }
impl std::error::Error for ProductError {}
impl std::fmt::Display for ProductError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientStock { product, available, requested } =>
                write!(f, "Insufficient stock for product {product}: {available} available, {requested} requested"),
            Self::SaleSnapshot(id) => write!(f, "Product {id} is an order snapshot"),
        }
    }
}
