//! Storefront backend
//!
//! HTTP JSON service behind a small online shop.
//!
//! ## Features
//! - Product catalog with filtering, paging, reviews and sales
//! - Session baskets that reserve stock out of the product rows
//! - Checkout into immutable order snapshots
//! - Masked card payments recorded against orders
//! - Accounts, sessions and profiles

pub mod api;
pub mod config;
pub mod domain;
pub mod publisher;
pub mod seed;
pub mod store;

use thiserror::Error;
use domain::aggregates::{BasketError, OrderError, PaymentError, ProductError};

// =============================================================================
// Error Types
// =============================================================================

#[derive(Error, Debug)]
pub enum ShopError {
    #[error("Product {0} not found")]
    ProductNotFound(i64),

    #[error("Order {0} not found")]
    OrderNotFound(i64),

    #[error("Product {0} is not in the basket")]
    NotInBasket(i64),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Insufficient stock for product {product}: {available} available, {requested} requested")]
    InsufficientStock { product: i64, available: u32, requested: u32 },

    #[error("Invalid quantity")]
    InvalidQuantity,

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Sign-in required")]
    Unauthorized,

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type Result<T> = std::result::Result<T, ShopError>;

impl From<ProductError> for ShopError {
    fn from(e: ProductError) -> Self {
        match e {
            ProductError::InsufficientStock { product, available, requested } => Self::InsufficientStock { product, available, requested },
            ProductError::SaleSnapshot(id) => Self::ProductNotFound(id),
        }
    }
}

impl From<BasketError> for ShopError {
    fn from(e: BasketError) -> Self {
        match e {
            BasketError::InvalidQuantity => Self::InvalidQuantity,
            BasketError::NotInBasket(id) => Self::NotInBasket(id),
            BasketError::Stock(e) => e.into(),
        }
    }
}

impl From<OrderError> for ShopError {
    fn from(e: OrderError) -> Self {
        match e {
            OrderError::Empty => Self::Validation(e.to_string()),
            OrderError::NotConfirmed(_) | OrderError::AlreadyPaid(_) => Self::Conflict(e.to_string()),
        }
    }
}

impl From<PaymentError> for ShopError {
    fn from(e: PaymentError) -> Self { Self::Validation(e.to_string()) }
}

impl From<validator::ValidationErrors> for ShopError {
    fn from(e: validator::ValidationErrors) -> Self { Self::Validation(e.to_string()) }
}
