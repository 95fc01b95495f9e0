//! Persistence behind the HTTP layer.
//!
//! Every mutating method runs as one transaction: either all of its writes
//! land or none do. Stock-moving methods hold a lock on each product row they
//! touch until commit.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::aggregates::{
    Account, BasketLine, CardDetails, Category, Order, OrderDetails, Payment, Product, Profile, Review, Sale, Tag,
};
use crate::domain::catalog::{CatalogPage, CatalogQuery};
use crate::Result;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Clone, Debug)]
pub struct NewReview { pub author: String, pub email: String, pub text: String, pub rate: u8 }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OrderLine { pub product: i64, pub count: u32 }

#[derive(Clone, Debug)]
pub struct NewAccount { pub username: String, pub first_name: String, pub password_hash: String }

#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate { pub full_name: String, pub email: Option<String>, pub phone: Option<String> }

#[derive(Clone, Debug, PartialEq)]
pub struct BasketItem { pub line: BasketLine, pub product: Product }

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub reviews: Vec<Review>,
    #[serde(rename = "tagDetails")]
    pub tag_details: Vec<Tag>,
}

/// An order with the snapshot rows it links to.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OrderView {
    #[serde(flatten)]
    pub order: Order,
    #[serde(rename = "products")]
    pub snapshots: Vec<Product>,
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    // catalog
    async fn categories(&self) -> Result<Vec<Category>>;
    async fn tags(&self, category: i64) -> Result<Vec<Tag>>;
    async fn catalog(&self, query: &CatalogQuery) -> Result<CatalogPage>;
    async fn limited_products(&self, limit: usize) -> Result<Vec<Product>>;
    async fn product_detail(&self, id: i64) -> Result<ProductDetail>;
    /// Stores the review and recomputes the product rating. Returns every
    /// review of the product and the new rating.
    async fn add_review(&self, product: i64, review: NewReview) -> Result<(Vec<Review>, f32)>;
    async fn active_sales(&self, now: DateTime<Utc>) -> Result<Vec<Sale>>;

    // basket
    async fn basket(&self, session: Uuid) -> Result<Vec<BasketItem>>;
    async fn reserve(&self, session: Uuid, product: i64, qty: u32) -> Result<BasketLine>;
    /// Returns the remaining line, or `None` when the release emptied it.
    async fn release(&self, session: Uuid, product: i64, qty: u32) -> Result<Option<BasketLine>>;
    /// Re-keys every basket line of `from` to `to`. `to` must not hold a basket yet.
    async fn move_basket(&self, from: Uuid, to: Uuid) -> Result<()>;
    /// Returns every reserved unit of the session to stock. Returns the number of units released.
    async fn clear_basket(&self, session: Uuid) -> Result<u32>;
    /// Sessions currently holding basket lines.
    async fn basket_sessions(&self) -> Result<Vec<Uuid>>;

    // orders
    async fn place_order(&self, session: Uuid, lines: &[OrderLine]) -> Result<Order>;
    async fn orders(&self) -> Result<Vec<OrderView>>;
    async fn order(&self, id: i64) -> Result<OrderView>;
    async fn confirm_order(&self, id: i64, details: OrderDetails) -> Result<Order>;
    async fn record_payment(&self, order: i64, card: &CardDetails) -> Result<Payment>;

    // accounts
    /// Creates the account together with its empty profile.
    async fn create_account(&self, account: NewAccount) -> Result<Account>;
    async fn account_by_username(&self, username: &str) -> Result<Option<Account>>;
    async fn account(&self, id: i64) -> Result<Account>;
    async fn set_password(&self, id: i64, password_hash: String) -> Result<()>;
    async fn profile(&self, account: i64) -> Result<Profile>;
    async fn update_profile(&self, account: i64, update: ProfileUpdate) -> Result<Profile>;

    // catalog maintenance
    async fn insert_category(&self, category: Category) -> Result<Category>;
    async fn insert_tag(&self, tag: Tag) -> Result<Tag>;
    async fn insert_product(&self, product: Product) -> Result<Product>;
    async fn update_product(&self, product: Product) -> Result<Product>;
    async fn insert_sale(&self, sale: Sale) -> Result<Sale>;
}
