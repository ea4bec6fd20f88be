//! Shop orders: fulfilment lifecycle, payment state and GST pricing.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ValidationError;

/// GST slabs an order line may carry.
pub const GST_RATES: [i32; 5] = [0, 5, 12, 18, 28];
pub const DEFAULT_GST_RATE: i32 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Processing,
    Ready,
    Delivered,
    Cancelled,
    Returned,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Ready,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
        OrderStatus::Returned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Ready => "ready",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Returned => "returned",
        }
    }

    /// Orders in these states hand their items back to the shelf.
    pub fn restocks(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Returned)
    }

    /// Fulfilment only moves forward. An order can be cancelled until it is
    /// delivered, and only a delivered order can be returned.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Processing | Ready | Delivered | Cancelled),
            Processing => matches!(next, Ready | Delivered | Cancelled),
            Ready => matches!(next, Delivered | Cancelled),
            Delivered => next == Returned,
            Cancelled | Returned => false,
        }
    }

    pub fn transition_to(&self, next: OrderStatus) -> Result<OrderStatus, ValidationError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ValidationError(format!(
                "Cannot change order status from {} to {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError(format!("{} is not a valid order status", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    Upi,
    NetBanking,
    DigitalWallet,
    Credit,
    Insurance,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Upi => "upi",
            PaymentMethod::NetBanking => "net_banking",
            PaymentMethod::DigitalWallet => "digital_wallet",
            PaymentMethod::Credit => "credit",
            PaymentMethod::Insurance => "insurance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Partial,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub const ALL: [PaymentStatus; 5] = [
        PaymentStatus::Pending,
        PaymentStatus::Partial,
        PaymentStatus::Paid,
        PaymentStatus::Failed,
        PaymentStatus::Refunded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Partial => "partial",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Status implied by how much of `final_amount` has been paid.
    pub fn for_amounts(paid: f64, final_amount: f64) -> PaymentStatus {
        if paid <= 0.0 {
            PaymentStatus::Pending
        } else if paid < final_amount {
            PaymentStatus::Partial
        } else {
            PaymentStatus::Paid
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PaymentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError(format!("{} is not a valid payment status", s)))
    }
}

/// Rounds to paise.
pub fn round_amount(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// One priced order line. Discount applies before GST.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinePricing {
    pub quantity: i32,
    pub unit_price: f64,
    pub discount_percent: f64,
    pub gst_rate: i32,
    pub gross_amount: f64,
    pub discount_amount: f64,
    pub gst_amount: f64,
    pub total_amount: f64,
}

pub fn price_line(
    quantity: i32,
    unit_price: f64,
    discount_percent: f64,
    gst_rate: i32,
) -> Result<LinePricing, ValidationError> {
    if quantity < 1 {
        return Err(ValidationError::new("Quantity must be at least 1"));
    }
    if !unit_price.is_finite() || unit_price < 0.0 {
        return Err(ValidationError::new("Unit price cannot be negative"));
    }
    if !(0.0..=100.0).contains(&discount_percent) {
        return Err(ValidationError::new("Discount must be between 0 and 100"));
    }
    if !GST_RATES.contains(&gst_rate) {
        return Err(ValidationError(format!(
            "GST rate must be one of {}",
            GST_RATES.map(|rate| rate.to_string()).join(", ")
        )));
    }

    let gross_amount = round_amount(f64::from(quantity) * unit_price);
    let discount_amount = round_amount(gross_amount * discount_percent / 100.0);
    let taxable = gross_amount - discount_amount;
    let gst_amount = round_amount(taxable * f64::from(gst_rate) / 100.0);

    Ok(LinePricing {
        quantity,
        unit_price,
        discount_percent,
        gst_rate,
        gross_amount,
        discount_amount,
        gst_amount,
        total_amount: round_amount(taxable + gst_amount),
    })
}

/// `final_amount` is the grand total rounded to whole rupees; `round_off`
/// is the difference.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, ToSchema)]
pub struct OrderTotals {
    pub subtotal: f64,
    pub total_discount: f64,
    pub total_gst: f64,
    pub grand_total: f64,
    pub round_off: f64,
    pub final_amount: f64,
}

impl OrderTotals {
    pub fn from_lines(lines: &[LinePricing]) -> Self {
        let subtotal = round_amount(lines.iter().map(|line| line.gross_amount).sum());
        let total_discount = round_amount(lines.iter().map(|line| line.discount_amount).sum());
        let total_gst = round_amount(lines.iter().map(|line| line.gst_amount).sum());
        let grand_total = round_amount(subtotal - total_discount + total_gst);
        let final_amount = grand_total.round();

        OrderTotals {
            subtotal,
            total_discount,
            total_gst,
            grand_total,
            round_off: round_amount(final_amount - grand_total),
            final_amount,
        }
    }
}

/// `ORD`, the last 8 digits of the millisecond clock, then 3 random digits.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let clock = now.timestamp_millis().rem_euclid(100_000_000);
    let suffix = rand::thread_rng().gen_range(0..1000);
    format!("ORD{:08}{:03}", clock, suffix)
}
