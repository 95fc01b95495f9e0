//! Time-boxed discounts shown on the sales page

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::aggregates::product::Image;
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sale {
    pub id: i64,
    pub title: String,
    pub price: Money,
    pub sale_price: Money,
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,
    pub images: Vec<Image>,
}

impl Sale {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool { self.date_from <= now && now <= self.date_to }
}
