use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ValidationError;

pub fn is_low_stock(quantity: i32, minimum_quantity: i32) -> bool {
    quantity <= minimum_quantity
}

pub fn is_expired(expiry_date: Option<NaiveDate>, today: NaiveDate) -> bool {
    expiry_date.is_some_and(|expiry| expiry < today)
}

/// Not yet expired but expiring within `days`.
pub fn expires_within(expiry_date: Option<NaiveDate>, today: NaiveDate, days: i64) -> bool {
    expiry_date.is_some_and(|expiry| expiry >= today && expiry <= today + Duration::days(days))
}

/// Applies a signed change; removing more than is in stock leaves zero.
pub fn apply_stock_delta(quantity: i32, delta: i32) -> Result<i32, ValidationError> {
    quantity
        .checked_add(delta)
        .map(|next| next.max(0))
        .ok_or_else(|| ValidationError::new("Stock quantity out of range"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum StockOperation {
    #[default]
    Set,
    Add,
    Subtract,
}

/// A requested stock change, resolved from the request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockChange {
    Delta(i32),
    Apply(StockOperation, i32),
}

impl StockChange {
    /// Either a signed `delta`, or a non-negative `quantity` with an
    /// operation (default `set`).
    pub fn from_parts(
        delta: Option<i32>,
        quantity: Option<i32>,
        operation: Option<StockOperation>,
    ) -> Result<Self, ValidationError> {
        match (delta, quantity) {
            (Some(_), Some(_)) => Err(ValidationError::new("Send either delta or quantity, not both")),
            (Some(_), None) if operation.is_some() => {
                Err(ValidationError::new("Operation requires a quantity"))
            }
            (Some(delta), None) => Ok(StockChange::Delta(delta)),
            (None, Some(quantity)) if quantity < 0 => {
                Err(ValidationError::new("Quantity cannot be negative"))
            }
            (None, Some(quantity)) => Ok(StockChange::Apply(operation.unwrap_or_default(), quantity)),
            (None, None) => Err(ValidationError::new("Quantity is required")),
        }
    }

    pub fn apply(self, current: i32) -> Result<i32, ValidationError> {
        match self {
            StockChange::Delta(delta) => apply_stock_delta(current, delta),
            StockChange::Apply(StockOperation::Set, quantity) => Ok(quantity.max(0)),
            StockChange::Apply(StockOperation::Add, quantity) => apply_stock_delta(current, quantity),
            StockChange::Apply(StockOperation::Subtract, quantity) => {
                apply_stock_delta(current, -quantity)
            }
        }
    }
}

/// Takes `requested` units out of `available` for a sale; unlike manual
/// adjustments a sale never oversells.
pub fn take_for_sale(name: &str, available: i32, requested: i32) -> Result<i32, ValidationError> {
    if requested > available {
        return Err(ValidationError(format!(
            "Insufficient stock for {}. Available: {}",
            name, available
        )));
    }
    apply_stock_delta(available, -requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[test]
    fn test_low_stock_includes_the_minimum() {
        assert!(is_low_stock(10, 10));
        assert!(is_low_stock(0, 10));
        assert!(!is_low_stock(11, 10));
    }

    #[test]
    fn test_expiry() {
        assert!(is_expired(Some(day(16)), day(17)));
        assert!(!is_expired(Some(day(17)), day(17)));
        assert!(!is_expired(None, day(17)));

        assert!(expires_within(Some(day(20)), day(17), 3));
        assert!(!expires_within(Some(day(21)), day(17), 3));
        assert!(!expires_within(Some(day(16)), day(17), 3));
    }

    #[test]
    fn test_stock_delta() {
        assert_eq!(apply_stock_delta(5, 3), Ok(8));
        assert_eq!(apply_stock_delta(5, -5), Ok(0));
        // Over-removal clamps to zero.
        assert_eq!(apply_stock_delta(5, -6), Ok(0));
        assert_eq!(apply_stock_delta(0, -1), Ok(0));
        assert!(apply_stock_delta(i32::MAX, 1).is_err());
    }

    #[test]
    fn test_stock_operations() {
        use StockOperation::*;

        assert_eq!(StockChange::Apply(Set, 40).apply(7), Ok(40));
        assert_eq!(StockChange::Apply(Set, 0).apply(7), Ok(0));
        assert_eq!(StockChange::Apply(Add, 3).apply(7), Ok(10));
        assert_eq!(StockChange::Apply(Subtract, 3).apply(7), Ok(4));
        assert_eq!(StockChange::Apply(Subtract, 30).apply(7), Ok(0));
        assert_eq!(StockChange::Delta(-30).apply(7), Ok(0));
    }

    #[test]
    fn test_stock_change_from_parts() {
        assert_eq!(StockChange::from_parts(Some(-2), None, None), Ok(StockChange::Delta(-2)));
        assert_eq!(
            StockChange::from_parts(None, Some(12), None),
            Ok(StockChange::Apply(StockOperation::Set, 12))
        );
        assert_eq!(
            StockChange::from_parts(None, Some(2), Some(StockOperation::Subtract)),
            Ok(StockChange::Apply(StockOperation::Subtract, 2))
        );
        assert_eq!(
            StockChange::from_parts(None, Some(-1), Some(StockOperation::Add)).unwrap_err().0,
            "Quantity cannot be negative"
        );
        assert_eq!(
            StockChange::from_parts(None, None, None).unwrap_err().0,
            "Quantity is required"
        );
        assert!(StockChange::from_parts(Some(1), Some(1), None).is_err());
        assert!(StockChange::from_parts(Some(1), None, Some(StockOperation::Add)).is_err());
    }

    #[test]
    fn test_sales_never_oversell() {
        assert_eq!(take_for_sale("Paracetamol", 10, 4), Ok(6));
        assert_eq!(take_for_sale("Paracetamol", 4, 4), Ok(0));
        assert_eq!(
            take_for_sale("Paracetamol", 3, 4).unwrap_err().0,
            "Insufficient stock for Paracetamol. Available: 3"
        );
    }
}
