//! Value Objects for the storefront

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Card number value object. Holds exactly sixteen digits.
#[derive(Clone, PartialEq, Eq)]
pub struct CardNumber(String);

impl CardNumber {
    pub fn new(value: impl Into<String>) -> Result<Self, CardNumberError> {
        let value: String = value.into().chars().filter(|c| !c.is_whitespace()).collect();
        if value.is_empty() { return Err(CardNumberError::Empty); }
        if !value.chars().all(|c| c.is_ascii_digit()) { return Err(CardNumberError::NotDigits); }
        if value.len() != 16 { return Err(CardNumberError::WrongLength(value.len())); }
        Ok(Self(value))
    }
    pub fn last_four(&self) -> &str { &self.0[12..] }
    /// Only the masked form ever leaves this type.
    pub fn masked(&self) -> String { format!("{}{}", "*".repeat(12), self.last_four()) }
}

impl fmt::Debug for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "CardNumber({})", self.masked()) }
}

impl fmt::Display for CardNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.masked()) }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum CardNumberError { Empty, NotDigits, WrongLength(usize) }
impl std::error::Error for CardNumberError {}
impl fmt::Display for CardNumberError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "card number empty"),
            Self::NotDigits => write!(f, "card number must contain only digits"),
            Self::WrongLength(n) => write!(f, "card number must have 16 digits, got {n}"),
        }
    }
}

/// Money value object. The shop trades in a single currency, so only the amount is kept.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    pub fn new(amount: Decimal) -> Self { Self(amount.round_dp(2)) }
    pub fn zero() -> Self { Self(Decimal::ZERO) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn add(&self, other: &Money) -> Money { Money(self.0 + other.0) }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self { Self::new(amount) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Quantity value object, used for stock levels and basket reservations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Quantity(u32);

impl Quantity {
    pub fn new(value: u32) -> Self { Self(value) }
    pub fn value(&self) -> u32 { self.0 }
    pub fn add(&self, other: u32) -> Self { Self(self.0.saturating_add(other)) }
    pub fn subtract(&self, other: u32) -> Option<Self> {
        if other > self.0 { None } else { Some(Self(self.0 - other)) }
    }
    pub fn is_zero(&self) -> bool { self.0 == 0 }
}

impl From<u32> for Quantity {
    fn from(value: u32) -> Self { Self(value) }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_card_number() {
        let card = CardNumber::new("4000 1234 5678 9010").unwrap();
        assert_eq!(card.last_four(), "9010");
        assert_eq!(card.masked(), "************9010");
        assert_eq!(format!("{card:?}"), "CardNumber(************9010)");
    }
    #[test]
    fn test_card_number_rejects_garbage() {
        assert_eq!(CardNumber::new(""), Err(CardNumberError::Empty));
        assert_eq!(CardNumber::new("4000-1234"), Err(CardNumberError::NotDigits));
        assert_eq!(CardNumber::new("123456789"), Err(CardNumberError::WrongLength(9)));
    }
    #[test]
    fn test_money_multiply_add() {
        let a = Money::new(Decimal::new(10, 0)).multiply(2);
        let b = Money::new(Decimal::new(5, 0)).multiply(3);
        assert_eq!(a.add(&b).amount(), Decimal::new(35, 0));
    }
    #[test]
    fn test_quantity() {
        let q = Quantity::new(3);
        assert_eq!(q.subtract(4), None);
        assert_eq!(q.subtract(3), Some(Quantity::new(0)));
        assert!(q.subtract(3).unwrap().is_zero());
        assert_eq!(q.add(2).value(), 5);
    }
}
