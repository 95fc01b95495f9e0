//! Aggregates module
pub mod product;
pub mod basket;
pub mod order;
pub mod payment;
pub mod account;
pub mod sale;

pub use product::{Category, Image, Product, ProductError, Review, Specification, Tag};
pub use basket::{Basket, BasketError, BasketLine, LineChange};
pub use order::{DeliveryType, Order, OrderDetails, OrderError, OrderStatus, PaymentType};
pub use payment::{CardDetails, Payment, PaymentError};
pub use account::{Account, Profile};
pub use sale::Sale;
