use anyhow::Context;
use axum::{Extension, Json, extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::ShopScope,
    },
    domain::{ValidationError, profile::ShopProfile, validation},
    models::{ShopEntity, UpdateShopProfileEntity},
    schema::shops,
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(get_profile, update_profile))
}

/// Routes an admin can reach while the shop is deactivated.
pub fn status_routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(update_status))
}

/// The admin's shop.
#[utoipa::path(
    get,
    path = "/profile",
    tags = ["Shop profile"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Shop profile", body = StdResponse<ShopEntity, String>)
    )
)]
async fn get_profile(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop: ShopEntity = shops::table
        .find(shop_id)
        .select(ShopEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(shop),
        message: Some("Get shop profile successfully"),
    })
}

/// Omitted fields keep their stored values.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateShopProfileReq {
    pub phone: Option<String>,
    pub images: Option<Vec<String>>,
    #[schema(value_type = Option<Vec<Object>>)]
    pub services: Option<Vec<Value>>,
    pub closing_time: Option<String>,
    pub owner_name: Option<String>,
    pub owner_phone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Blank strings clear optional text fields.
fn optional_text(value: Option<String>, stored: Option<String>) -> Option<String> {
    match value {
        Some(value) if value.trim().is_empty() => None,
        Some(value) => Some(value.trim().to_string()),
        None => stored,
    }
}

fn merge_profile(
    shop: &ShopEntity,
    body: UpdateShopProfileReq,
) -> Result<UpdateShopProfileEntity, AppError> {
    let phone = body.phone.as_deref().map(validation::phone).transpose()?;
    let owner_phone = match body.owner_phone.as_deref().map(str::trim) {
        Some("") => None,
        Some(owner_phone) => Some(validation::phone(owner_phone)?),
        None => shop.owner_phone.clone(),
    };
    if body.latitude.is_some_and(|lat| !(-90.0..=90.0).contains(&lat)) {
        return Err(ValidationError::new("Latitude must be between -90 and 90").into());
    }
    if body.longitude.is_some_and(|long| !(-180.0..=180.0).contains(&long)) {
        return Err(ValidationError::new("Longitude must be between -180 and 180").into());
    }

    let images = match body.images {
        Some(images) => images,
        None => shop.image_list()?,
    };
    let services = match body.services {
        Some(services) => services,
        None => shop.service_list()?,
    };
    let closing_time = optional_text(body.closing_time, shop.closing_time.clone());
    let owner_name = optional_text(body.owner_name, shop.owner_name.clone());
    let latitude = body.latitude.or(shop.latitude);
    let longitude = body.longitude.or(shop.longitude);

    let profile_complete = ShopProfile {
        images: &images,
        services: &services,
        latitude,
        longitude,
        closing_time: closing_time.as_deref(),
        owner_name: owner_name.as_deref(),
        owner_phone: owner_phone.as_deref(),
    }
    .is_complete();

    Ok(UpdateShopProfileEntity {
        phone,
        images: Value::from(images),
        services: Value::Array(services),
        closing_time,
        owner_name,
        owner_phone,
        latitude,
        longitude,
        profile_complete,
    })
}

/// Update the admin's shop profile.
#[utoipa::path(
    put,
    path = "/profile",
    tags = ["Shop profile"],
    security(("bearerAuth" = [])),
    request_body = UpdateShopProfileReq,
    responses(
        (status = 200, description = "Profile updated", body = StdResponse<ShopEntity, String>),
        (status = 400, description = "Invalid profile")
    )
)]
async fn update_profile(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Json(body): Json<UpdateShopProfileReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let shop: ShopEntity = shops::table
                    .find(shop_id)
                    .select(ShopEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                let changes = merge_profile(&shop, body)?;

                let shop: ShopEntity = diesel::update(shops::table.find(shop_id))
                    .set((&changes, shops::updated_at.eq(diesel::dsl::now)))
                    .returning(ShopEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update shop profile")?;

                Ok::<ShopEntity, AppError>(shop)
            })
        })
        .await?;

    info!("Shop #{} profile updated (complete: {})", shop.id, shop.profile_complete);
    Ok(StdResponse {
        data: Some(shop),
        message: Some("Shop profile updated successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateShopStatusReq {
    pub is_active: Option<bool>,
}

fn status_message(is_active: bool) -> &'static str {
    if is_active {
        "Shop activated successfully"
    } else {
        "Shop deactivated successfully"
    }
}

/// Open or close the admin's shop. Deactivated shops drop out of public
/// listings and their admins lose every route except this one.
#[utoipa::path(
    patch,
    path = "/status",
    tags = ["Shop profile"],
    security(("bearerAuth" = [])),
    request_body = UpdateShopStatusReq,
    responses(
        (status = 200, description = "Status updated", body = StdResponse<ShopEntity, String>),
        (status = 400, description = "Missing status")
    )
)]
async fn update_status(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Json(body): Json<UpdateShopStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let is_active = body
        .is_active
        .ok_or_else(|| ValidationError::new("Status is required"))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop: ShopEntity = diesel::update(shops::table.find(shop_id))
        .set((
            shops::is_active.eq(is_active),
            shops::updated_at.eq(diesel::dsl::now),
        ))
        .returning(ShopEntity::as_returning())
        .get_result(conn)
        .await?;

    info!("Shop #{} is_active set to {}", shop.id, shop.is_active);
    Ok(StdResponse {
        data: Some(shop),
        message: Some(status_message(is_active)),
    })
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::json;

    use super::*;

    fn shop() -> ShopEntity {
        ShopEntity {
            id: 2,
            name: "Green Cross".into(),
            license_number: "LIC-42".into(),
            email: "green@example.com".into(),
            phone: "9876543210".into(),
            street: "MG Road".into(),
            city: "Pune".into(),
            state: "MH".into(),
            zip_code: "411001".into(),
            country: "India".into(),
            shop_type: "pharmacy".into(),
            images: json!(["shop.jpg"]),
            services: json!([{ "name": "Home delivery" }]),
            closing_time: Some("9:00 PM".into()),
            owner_name: Some("Meera".into()),
            owner_phone: None,
            latitude: Some(18.5),
            longitude: Some(73.8),
            is_active: true,
            admin_id: None,
            profile_complete: false,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_owner_phone_completes_profile() {
        let body = UpdateShopProfileReq {
            owner_phone: Some("91234 56789".into()),
            ..Default::default()
        };
        let changes = merge_profile(&shop(), body).unwrap();
        assert_eq!(changes.owner_phone.as_deref(), Some("9123456789"));
        assert!(changes.profile_complete);
        assert_eq!(changes.images, json!(["shop.jpg"]));
    }

    #[test]
    fn test_blank_owner_name_clears_it() {
        let body = UpdateShopProfileReq {
            owner_name: Some(" ".into()),
            owner_phone: Some("9123456789".into()),
            ..Default::default()
        };
        let changes = merge_profile(&shop(), body).unwrap();
        assert_eq!(changes.owner_name, None);
        assert!(!changes.profile_complete);
    }

    #[test]
    fn test_rejects_invalid_phone() {
        let body = UpdateShopProfileReq {
            phone: Some("call me".into()),
            ..Default::default()
        };
        assert!(matches!(merge_profile(&shop(), body), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn test_malformed_stored_images_are_an_error() {
        let mut stored = shop();
        stored.images = json!("shop.jpg");
        let err = merge_profile(&stored, UpdateShopProfileReq::default()).unwrap_err();
        assert!(matches!(err, AppError::Other(_)));
    }

    #[test]
    fn test_status_messages() {
        assert_eq!(status_message(true), "Shop activated successfully");
        assert_eq!(status_message(false), "Shop deactivated successfully");
        let body: UpdateShopStatusReq = serde_json::from_value(json!({})).unwrap();
        assert_eq!(body.is_active, None);
    }
}
