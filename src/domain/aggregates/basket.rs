//! Basket Aggregate
//!
//! A basket holds stock moved out of `Product::count`. Every unit in a basket
//! line came from the product row and goes back to it on release, so for any
//! product the live count plus all reserved quantities stays constant.

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::domain::aggregates::product::{Product, ProductError};
use crate::domain::value_objects::Quantity;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketLine { pub session: Uuid, pub product: i64, pub count: Quantity }

/// The persisted effect of a basket operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LineChange { Upsert(BasketLine), Remove { session: Uuid, product: i64 } }

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Basket {
    session: Uuid,
    lines: Vec<BasketLine>,
}

impl Basket {
    pub fn new(session: Uuid) -> Self { Self { session, lines: vec![] } }
    pub fn from_lines(session: Uuid, lines: Vec<BasketLine>) -> Self { Self { session, lines } }

    pub fn session(&self) -> Uuid { self.session }
    pub fn lines(&self) -> &[BasketLine] { &self.lines }
    pub fn line(&self, product: i64) -> Option<&BasketLine> { self.lines.iter().find(|l| l.product == product) }
    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    /// Moves `qty` units from the product's stock into this basket.
    /// Nothing changes when the stock cannot cover the request.
    pub fn reserve(&mut self, product: &mut Product, qty: u32) -> Result<LineChange, BasketError> {
        if qty == 0 { return Err(BasketError::InvalidQuantity); }
        product.take_stock(qty)?;
        let line = match self.lines.iter_mut().find(|l| l.product == product.id) {
            Some(existing) => { existing.count = existing.count.add(qty); existing.clone() }
            None => {
                let line = BasketLine { session: self.session, product: product.id, count: Quantity::new(qty) };
                self.lines.push(line.clone());
                line
            }
        };
        Ok(LineChange::Upsert(line))
    }

    /// Moves units back to the product. A release covering the whole line
    /// drops the line and restores exactly what it held.
    pub fn release(&mut self, product: &mut Product, qty: u32) -> Result<LineChange, BasketError> {
        if qty == 0 { return Err(BasketError::InvalidQuantity); }
        let pos = self.lines.iter().position(|l| l.product == product.id).ok_or(BasketError::NotInBasket(product.id))?;
        let held = self.lines[pos].count.value();
        if qty >= held {
            self.lines.remove(pos);
            product.restock(held);
            return Ok(LineChange::Remove { session: self.session, product: product.id });
        }
        let line = &mut self.lines[pos];
        line.count = Quantity::new(held - qty);
        product.restock(qty);
        Ok(LineChange::Upsert(line.clone()))
    }

    /// Re-keys every line to another session. Stock is not touched.
    pub fn hand_over(self, session: Uuid) -> Basket {
        let lines = self.lines.into_iter().map(|l| BasketLine { session, ..l }).collect();
        Basket { session, lines }
    }

    /// Takes up to `qty` already-reserved units for checkout. Stock is not
    /// touched. Returns how many units the basket covered.
    pub fn consume(&mut self, product: i64, qty: u32) -> (u32, Option<LineChange>) {
        let Some(pos) = self.lines.iter().position(|l| l.product == product) else { return (0, None) };
        let held = self.lines[pos].count.value();
        if qty >= held {
            self.lines.remove(pos);
            return (held, Some(LineChange::Remove { session: self.session, product }));
        }
        let line = &mut self.lines[pos];
        line.count = Quantity::new(held - qty);
        (qty, Some(LineChange::Upsert(line.clone())))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum BasketError { InvalidQuantity, NotInBasket(i64), Stock(ProductError) }
impl From<ProductError> for BasketError { fn from(e: ProductError) -> Self { Self::Stock(e) } }
impl std::error::Error for BasketError {}
impl std::fmt::Display for BasketError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuantity => write!(f, "Quantity must be positive"),
            Self::NotInBasket(id) => write!(f, "Product {id} is not in the basket"),
            Self::Stock(e) => write!(f, "{e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::value_objects::Money;
    use rust_decimal::Decimal;

    fn product(id: i64, count: u32) -> Product {
        let mut p = Product::create(1, "Widget", Money::new(Decimal::new(10, 0))).with_stock(count);
        p.id = id;
        p
    }

    fn reserved(basket: &Basket, product: i64) -> u32 { basket.line(product).map(|l| l.count.value()).unwrap_or(0) }

    #[test]
    fn test_reserve_merges_lines() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(1, 10);
        basket.reserve(&mut p, 2).unwrap();
        let change = basket.reserve(&mut p, 3).unwrap();
        assert_eq!(basket.lines().len(), 1);
        assert_eq!(reserved(&basket, 1), 5);
        assert_eq!(p.count.value(), 5);
        assert!(matches!(change, LineChange::Upsert(ref l) if l.count.value() == 5));
    }

    #[test]
    fn test_over_reservation_changes_nothing() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(1, 3);
        basket.reserve(&mut p, 1).unwrap();
        let err = basket.reserve(&mut p, 5).unwrap_err();
        assert!(matches!(err, BasketError::Stock(ProductError::InsufficientStock { available: 2, requested: 5, .. })));
        assert_eq!(p.count.value(), 2);
        assert_eq!(reserved(&basket, 1), 1);
    }

    #[test]
    fn test_release_whole_line_restores_held_quantity() {
        let session = Uuid::new_v4();
        let mut basket = Basket::new(session);
        let mut p = product(4, 10);
        basket.reserve(&mut p, 3).unwrap();
        let change = basket.release(&mut p, 50).unwrap();
        assert_eq!(change, LineChange::Remove { session, product: 4 });
        assert!(basket.is_empty());
        assert_eq!(p.count.value(), 10);
    }

    #[test]
    fn test_partial_release() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(1, 10);
        basket.reserve(&mut p, 4).unwrap();
        basket.release(&mut p, 1).unwrap();
        assert_eq!(reserved(&basket, 1), 3);
        assert_eq!(p.count.value(), 7);
    }

    #[test]
    fn test_release_errors() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(9, 10);
        assert_eq!(basket.release(&mut p, 1), Err(BasketError::NotInBasket(9)));
        assert_eq!(basket.reserve(&mut p, 0), Err(BasketError::InvalidQuantity));
        assert_eq!(basket.release(&mut p, 0), Err(BasketError::InvalidQuantity));
    }

    #[test]
    fn test_count_plus_reserved_is_conserved() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(1, 20);
        let ops: [(bool, u32); 8] = [(true, 5), (false, 2), (true, 30), (true, 15), (false, 1), (false, 100), (true, 7), (false, 3)];
        for (reserve, qty) in ops {
            let _ = if reserve { basket.reserve(&mut p, qty) } else { basket.release(&mut p, qty) };
            assert_eq!(p.count.value() + reserved(&basket, 1), 20);
        }
    }

    #[test]
    fn test_consume() {
        let mut basket = Basket::new(Uuid::new_v4());
        let mut p = product(1, 10);
        basket.reserve(&mut p, 4).unwrap();
        assert_eq!(basket.consume(1, 1).0, 1);
        assert_eq!(reserved(&basket, 1), 3);
        let (taken, change) = basket.consume(1, 5);
        assert_eq!(taken, 3);
        assert!(matches!(change, Some(LineChange::Remove { product: 1, .. })));
        assert_eq!(basket.consume(1, 5), (0, None));
        assert_eq!(p.count.value(), 6);
    }

    #[test]
    fn test_hand_over_keeps_quantities() {
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        let mut basket = Basket::new(old);
        let mut p = product(1, 10);
        basket.reserve(&mut p, 4).unwrap();
        let moved = basket.hand_over(new);
        assert_eq!(moved.session(), new);
        assert!(moved.lines().iter().all(|l| l.session == new));
        assert_eq!(reserved(&moved, 1), 4);
        assert_eq!(p.count.value(), 6);
    }
}
