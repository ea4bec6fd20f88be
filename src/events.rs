//! Payloads published through the outbox. The routing key of each event is
//! its `EVENT_TYPE`.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentBookedEvent {
    pub appointment_id: i32,
    pub hospital_id: i32,
    pub department_index: i32,
    pub doctor_index: i32,
    pub appointment_date: NaiveDate,
    pub slot: String,
    pub confirmation_code: String,
    pub patient_name: String,
    pub patient_email: String,
    pub booked_by: String,
}

impl AppointmentBookedEvent {
    pub const EVENT_TYPE: &'static str = "notifications.appointment_booked";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentRescheduledEvent {
    pub appointment_id: i32,
    pub hospital_id: i32,
    pub previous_date: NaiveDate,
    pub previous_slot: String,
    pub appointment_date: NaiveDate,
    pub slot: String,
    pub patient_email: String,
}

impl AppointmentRescheduledEvent {
    pub const EVENT_TYPE: &'static str = "notifications.appointment_rescheduled";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppointmentCancelledEvent {
    pub appointment_id: i32,
    pub hospital_id: i32,
    pub appointment_date: NaiveDate,
    pub slot: String,
    pub cancelled_by: String,
    pub reason: String,
    pub patient_email: String,
}

impl AppointmentCancelledEvent {
    pub const EVENT_TYPE: &'static str = "notifications.appointment_cancelled";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShopOrderPlacedEvent {
    pub order_id: i32,
    pub shop_id: i32,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: Option<String>,
    pub final_amount: f64,
    pub items: Vec<ShopOrderLineEvent>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShopOrderLineEvent {
    pub name: String,
    pub quantity: i32,
    pub total_amount: f64,
}

impl ShopOrderPlacedEvent {
    pub const EVENT_TYPE: &'static str = "notifications.shop_order_placed";
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ShopOrderStatusChangedEvent {
    pub order_id: i32,
    pub shop_id: i32,
    pub order_number: String,
    pub previous_status: String,
    pub status: String,
    pub customer_email: Option<String>,
}

impl ShopOrderStatusChangedEvent {
    pub const EVENT_TYPE: &'static str = "notifications.shop_order_status_changed";
}
