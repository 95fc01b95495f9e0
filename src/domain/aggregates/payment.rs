//! Payment Aggregate

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::{CardNumber, CardNumberError};

/// A recorded payment. Only the masked card number is kept and the
/// security code is never stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment { pub id: i64, pub order: i64, pub number: String, pub name: String, pub month: u8, pub year: u16 }

/// Card details as submitted by the customer.
#[derive(Clone)]
pub struct CardDetails { pub number: CardNumber, pub name: String, pub month: u8, pub year: u16, pub code: u16 }

impl std::fmt::Debug for CardDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardDetails").field("number", &self.number).field("month", &self.month).field("year", &self.year).finish_non_exhaustive()
    }
}

impl CardDetails {
    pub fn parse(number: &str, name: &str, month: u8, year: u16, code: u16) -> Result<Self, PaymentError> {
        let number = CardNumber::new(number)?;
        let name = name.trim();
        if name.is_empty() || name.chars().count() > 50 { return Err(PaymentError::Name); }
        if !(1..=12).contains(&month) { return Err(PaymentError::Month(month)); }
        let current = Utc::now().year() as u16;
        if !(current..=current + 3).contains(&year) { return Err(PaymentError::Year(year)); }
        if !(100..=999).contains(&code) { return Err(PaymentError::Code); }
        Ok(Self { number, name: name.to_string(), month, year, code })
    }
}

impl Payment {
    pub fn record(order: i64, card: &CardDetails) -> Self {
        Self { id: 0, order, number: card.number.masked(), name: card.name.clone(), month: card.month, year: card.year }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)] pub enum PaymentError { Number(CardNumberError), Name, Month(u8), Year(u16), Code }
impl From<CardNumberError> for PaymentError { fn from(e: CardNumberError) -> Self { Self::Number(e) } }
impl std::error::Error for PaymentError {}
impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(e) => write!(f, "{e}"),
            Self::Name => write!(f, "card holder name must have 1 to 50 characters"),
            Self::Month(m) => write!(f, "invalid card month {m}"),
            Self::Year(y) => write!(f, "card year {y} is out of range"),
            Self::Code => write!(f, "card code must have three digits"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year() -> u16 { Utc::now().year() as u16 }

    #[test]
    fn test_record_masks_number() {
        let card = CardDetails::parse("1234567812345678", " Ann Lee ", 4, year() + 1, 123).unwrap();
        let payment = Payment::record(9, &card);
        assert_eq!(payment.number, "************5678");
        assert_eq!(payment.name, "Ann Lee");
        assert_eq!(payment.order, 9);
    }

    #[test]
    fn test_card_validation() {
        let y = year();
        assert!(matches!(CardDetails::parse("1234", "A", 1, y, 123), Err(PaymentError::Number(_))));
        assert_eq!(CardDetails::parse("1234567812345678", "", 1, y, 123).unwrap_err(), PaymentError::Name);
        assert_eq!(CardDetails::parse("1234567812345678", "A", 13, y, 123).unwrap_err(), PaymentError::Month(13));
        assert_eq!(CardDetails::parse("1234567812345678", "A", 1, y - 1, 123).unwrap_err(), PaymentError::Year(y - 1));
        assert_eq!(CardDetails::parse("1234567812345678", "A", 1, y + 4, 123).unwrap_err(), PaymentError::Year(y + 4));
        assert_eq!(CardDetails::parse("1234567812345678", "A", 1, y + 3, 99).unwrap_err(), PaymentError::Code);
    }
}
