use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use utoipa::ToSchema;

use crate::domain::{
    hospital::{Department, OpeningTime},
    inventory,
};

// Users

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UserEntity {
    pub id: i32,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
    pub hospital_id: Option<i32>,
    pub shop_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::users)]
pub struct CreateUserEntity {
    pub email: String,
    pub password_hash: String,
    pub role: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub hospital_id: Option<i32>,
    pub shop_id: Option<i32>,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::users)]
pub struct UpdateUserEntity {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<Option<String>>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

// Hospitals

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::hospitals)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct HospitalEntity {
    pub id: i32,
    pub name: String,
    pub registration_number: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub phone: String,
    pub email: String,
    pub is_active: bool,
    #[schema(value_type = Vec<String>)]
    pub images: Value,
    #[schema(value_type = Vec<OpeningTime>)]
    pub opening_times: Value,
    pub closing_time: String,
    #[schema(value_type = Vec<Department>)]
    pub services: Value,
    pub rating: f32,
    pub reviews_count: i32,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub admin_id: Option<i32>,
    pub profile_complete: bool,
    pub created_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decodes a JSONB list column. A malformed column is an error rather than
/// an empty list, so it is never written back as `[]`.
fn decode_list<T: DeserializeOwned>(
    value: &Value,
    column: &str,
    table: &str,
    id: i32,
) -> Result<Vec<T>> {
    serde_json::from_value(value.clone())
        .with_context(|| format!("Malformed {} column on {} #{}", column, table, id))
}

impl HospitalEntity {
    pub fn departments(&self) -> Result<Vec<Department>> {
        decode_list(&self.services, "services", "hospital", self.id)
    }

    pub fn opening_time_list(&self) -> Result<Vec<OpeningTime>> {
        decode_list(&self.opening_times, "opening_times", "hospital", self.id)
    }

    pub fn image_list(&self) -> Result<Vec<String>> {
        decode_list(&self.images, "images", "hospital", self.id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::hospitals)]
pub struct CreateHospitalEntity {
    pub name: String,
    pub registration_number: Option<String>,
    pub address: String,
    pub city: String,
    pub state: String,
    pub pincode: String,
    pub phone: String,
    pub email: String,
    pub created_by: Option<i32>,
}

/// Fields a super admin may change on a hospital.
#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::hospitals)]
pub struct UpdateHospitalEntity {
    pub name: Option<String>,
    pub registration_number: Option<Option<String>>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

/// Fields a hospital admin maintains on their own profile.
#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::hospitals)]
pub struct UpdateHospitalProfileEntity {
    pub phone: Option<String>,
    pub images: Value,
    pub opening_times: Value,
    pub closing_time: Option<String>,
    pub services: Value,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub profile_complete: bool,
}

// Shops

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::shops)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShopEntity {
    pub id: i32,
    pub name: String,
    pub license_number: String,
    pub email: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub shop_type: String,
    #[schema(value_type = Vec<String>)]
    pub images: Value,
    #[schema(value_type = Vec<Object>)]
    pub services: Value,
    pub closing_time: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub is_active: bool,
    pub admin_id: Option<i32>,
    pub profile_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ShopEntity {
    pub fn image_list(&self) -> Result<Vec<String>> {
        decode_list(&self.images, "images", "shop", self.id)
    }

    pub fn service_list(&self) -> Result<Vec<Value>> {
        decode_list(&self.services, "services", "shop", self.id)
    }
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::shops)]
pub struct CreateShopEntity {
    pub name: String,
    pub license_number: String,
    pub email: String,
    pub phone: String,
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
    pub shop_type: String,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::shops)]
pub struct UpdateShopEntity {
    pub name: Option<String>,
    pub license_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub shop_type: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(AsChangeset, Debug)]
#[diesel(table_name = crate::schema::shops)]
pub struct UpdateShopProfileEntity {
    pub phone: Option<String>,
    pub images: Value,
    pub services: Value,
    pub closing_time: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub profile_complete: bool,
}

// Appointments

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct AppointmentEntity {
    pub id: i32,
    pub hospital_id: i32,
    pub department_index: i32,
    pub doctor_index: i32,
    pub appointment_date: NaiveDate,
    pub slot: String,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_email: String,
    pub notes: Option<String>,
    pub status: String,
    pub confirmation_code: String,
    pub booked_by: String,
    pub created_by: Option<i32>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::appointments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateAppointmentEntity {
    pub hospital_id: i32,
    pub department_index: i32,
    pub doctor_index: i32,
    pub appointment_date: NaiveDate,
    pub slot: String,
    pub patient_name: String,
    pub patient_phone: String,
    pub patient_email: String,
    pub notes: Option<String>,
    pub status: String,
    pub confirmation_code: String,
    pub booked_by: String,
    pub created_by: Option<i32>,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::appointments)]
pub struct UpdateAppointmentEntity {
    pub department_index: Option<i32>,
    pub doctor_index: Option<i32>,
    pub appointment_date: Option<NaiveDate>,
    pub slot: Option<String>,
    pub patient_name: Option<String>,
    pub patient_phone: Option<String>,
    pub patient_email: Option<String>,
    pub notes: Option<Option<String>>,
    pub status: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
}

// Inventory

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = crate::schema::inventory_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct InventoryItemEntity {
    pub id: i32,
    pub shop_id: i32,
    pub name: String,
    pub category: String,
    pub unit_price: f32,
    pub quantity: i32,
    pub minimum_quantity: i32,
    pub expiry_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An inventory row with its derived stock flags.
#[derive(Serialize, Debug, ToSchema)]
pub struct InventoryItemView {
    pub id: i32,
    pub shop_id: i32,
    pub name: String,
    pub category: String,
    pub unit_price: f32,
    pub quantity: i32,
    pub minimum_quantity: i32,
    pub expiry_date: Option<NaiveDate>,
    pub is_low_stock: bool,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItemView {
    pub fn new(item: InventoryItemEntity, today: NaiveDate) -> Self {
        Self {
            is_low_stock: inventory::is_low_stock(item.quantity, item.minimum_quantity),
            is_expired: inventory::is_expired(item.expiry_date, today),
            id: item.id,
            shop_id: item.shop_id,
            name: item.name,
            category: item.category,
            unit_price: item.unit_price,
            quantity: item.quantity,
            minimum_quantity: item.minimum_quantity,
            expiry_date: item.expiry_date,
            created_at: item.created_at,
            updated_at: item.updated_at,
        }
    }
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct CreateInventoryItemEntity {
    pub shop_id: i32,
    pub name: String,
    pub category: String,
    pub unit_price: f32,
    pub quantity: i32,
    pub minimum_quantity: i32,
    pub expiry_date: Option<NaiveDate>,
}

#[derive(AsChangeset, Debug, Default)]
#[diesel(table_name = crate::schema::inventory_items)]
pub struct UpdateInventoryItemEntity {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit_price: Option<f32>,
    pub quantity: Option<i32>,
    pub minimum_quantity: Option<i32>,
    pub expiry_date: Option<Option<NaiveDate>>,
}

// Shop orders

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::shop_orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShopOrderEntity {
    pub id: i32,
    pub shop_id: i32,
    pub order_number: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub paid_amount: f64,
    pub subtotal: f64,
    pub total_discount: f64,
    pub total_gst: f64,
    pub round_off: f64,
    pub final_amount: f64,
    pub notes: Option<String>,
    pub created_by: Option<i32>,
    pub updated_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::shop_orders)]
pub struct CreateShopOrderEntity {
    pub shop_id: i32,
    pub order_number: String,
    pub customer_first_name: String,
    pub customer_last_name: String,
    pub customer_phone: String,
    pub customer_email: Option<String>,
    pub status: String,
    pub payment_method: String,
    pub payment_status: String,
    pub paid_amount: f64,
    pub subtotal: f64,
    pub total_discount: f64,
    pub total_gst: f64,
    pub round_off: f64,
    pub final_amount: f64,
    pub notes: Option<String>,
    pub created_by: Option<i32>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::shop_order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ShopOrderItemEntity {
    pub id: i32,
    pub order_id: i32,
    /// `None` once the inventory item has been deleted.
    pub inventory_item_id: Option<i32>,
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub discount_percent: f64,
    pub discount_amount: f64,
    pub gst_rate: i32,
    pub gst_amount: f64,
    pub total_amount: f64,
}

#[derive(Insertable, Debug, PartialEq)]
#[diesel(table_name = crate::schema::shop_order_items)]
pub struct CreateShopOrderItemEntity {
    pub order_id: i32,
    pub inventory_item_id: Option<i32>,
    pub name: String,
    pub category: String,
    pub quantity: i32,
    pub unit_price: f64,
    pub discount_percent: f64,
    pub discount_amount: f64,
    pub gst_rate: i32,
    pub gst_amount: f64,
    pub total_amount: f64,
}

// Outbox

#[derive(Queryable, Selectable, Identifiable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OutboxEntity {
    pub id: i32,
    pub event_type: String,
    pub payload: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::outbox)]
pub struct CreateOutboxEntity {
    pub event_type: String,
    pub payload: String,
    pub status: String,
}
