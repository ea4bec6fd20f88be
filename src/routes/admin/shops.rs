use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
    pg::Pg, result::DatabaseErrorKind,
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use super::{AccountReq, AdminScope};
use crate::{
    core::{
        aliases::DieselError,
        app_error::{AppError, StdResponse},
        app_state::AppState,
        auth::Role,
        middleware::CurrentUser,
    },
    domain::{
        ValidationError,
        pagination::{PageQuery, Paged},
        shop::{self, ShopType},
        validation,
    },
    models::{CreateShopEntity, ShopEntity, UpdateShopEntity, UserEntity},
    routes::auth::insert_user,
    schema::shops,
};

pub const DEFAULT_COUNTRY: &str = "India";
pub const MAX_NAME_LEN: usize = 100;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_shops, create_shop))
        .routes(utoipa_axum::routes!(get_shop, update_shop, delete_shop))
}

fn map_duplicate(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            match info.constraint_name() {
                Some("shops_email_key") => {
                    AppError::Conflict("Shop with this email already exists".into())
                }
                _ => AppError::Conflict("Shop with this license number already exists".into()),
            }
        }
        err => err.into(),
    }
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ShopListQuery {
    pub is_active: Option<bool>,
    pub shop_type: Option<ShopType>,
    pub city: Option<String>,
    /// Name, license number or email fragment; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn filtered(query: &ShopListQuery, search: Option<&str>) -> shops::BoxedQuery<'static, Pg> {
    let mut boxed = shops::table.into_boxed();
    if let Some(is_active) = query.is_active {
        boxed = boxed.filter(shops::is_active.eq(is_active));
    }
    if let Some(shop_type) = query.shop_type {
        boxed = boxed.filter(shops::shop_type.eq(shop_type.as_str()));
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|city| !city.is_empty()) {
        boxed = boxed.filter(shops::city.ilike(validation::like_pattern(city)));
    }
    if let Some(search) = search {
        let pattern = validation::like_pattern(search);
        boxed = boxed.filter(
            shops::name
                .ilike(pattern.clone())
                .or(shops::license_number.ilike(pattern.clone()))
                .or(shops::email.ilike(pattern)),
        );
    }
    boxed
}

/// Every shop, active or not, newest first.
#[utoipa::path(
    get,
    path = "/shops",
    tags = ["Admin shops"],
    security(("bearerAuth" = [])),
    params(ShopListQuery),
    responses(
        (status = 200, description = "A page of shops", body = StdResponse<Paged<ShopEntity>, String>)
    )
)]
async fn get_shops(
    State(state): State<AppState>,
    Query(query): Query<ShopListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = filtered(&query, search.as_deref())
        .count()
        .get_result(conn)
        .await
        .context("Failed to count shops")?;

    let items: Vec<ShopEntity> = filtered(&query, search.as_deref())
        .order((shops::created_at.desc(), shops::id.desc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(ShopEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get shops")?;

    Ok(StdResponse {
        data: Some(Paged {
            items,
            pagination: page.paginate(total),
        }),
        message: Some("Shops retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateShopReq {
    pub name: Option<String>,
    /// Stored uppercased.
    pub license_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    /// Defaults to India.
    pub country: Option<String>,
    /// Defaults to pharmacy.
    pub shop_type: Option<ShopType>,
    /// When present, a shop admin account is created alongside.
    pub admin: Option<AccountReq>,
}

fn shop_name(value: Option<&str>) -> Result<String, ValidationError> {
    let name = validation::required("Shop name", value)?;
    validation::max_len("Shop name", &name, MAX_NAME_LEN)?;
    Ok(name)
}

impl CreateShopReq {
    fn validate(&self) -> Result<CreateShopEntity, ValidationError> {
        Ok(CreateShopEntity {
            name: shop_name(self.name.as_deref())?,
            license_number: shop::normalize_license_number(
                self.license_number.as_deref().unwrap_or_default(),
            )?,
            email: validation::email(&validation::required("Email", self.email.as_deref())?)?,
            phone: validation::phone(&validation::required("Phone", self.phone.as_deref())?)?,
            street: validation::required("Street", self.street.as_deref())?,
            city: validation::required("City", self.city.as_deref())?,
            state: validation::required("State", self.state.as_deref())?,
            zip_code: validation::required("Zip code", self.zip_code.as_deref())?,
            country: self
                .country
                .as_deref()
                .map(str::trim)
                .filter(|country| !country.is_empty())
                .unwrap_or(DEFAULT_COUNTRY)
                .to_string(),
            shop_type: self.shop_type.unwrap_or_default().as_str().into(),
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct CreatedShopRes {
    pub shop: ShopEntity,
    pub admin: Option<UserEntity>,
}

/// Register a shop, optionally with its admin account.
#[utoipa::path(
    post,
    path = "/shops",
    tags = ["Admin shops"],
    security(("bearerAuth" = [])),
    request_body = CreateShopReq,
    responses(
        (status = 201, description = "Shop registered", body = StdResponse<CreatedShopRes, String>),
        (status = 400, description = "Invalid shop or admin details"),
        (status = 409, description = "Duplicate license number, email or admin email")
    )
)]
async fn create_shop(
    State(state): State<AppState>,
    Extension(acting): Extension<CurrentUser>,
    Json(mut body): Json<CreateShopReq>,
) -> Result<impl IntoResponse, AppError> {
    let new_shop = body.validate()?;
    // shop_id is filled in once the shop row exists.
    let admin = body
        .admin
        .take()
        .map(|account| account.into_user(Role::ShopAdmin, AdminScope::None))
        .transpose()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let created = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let mut shop: ShopEntity = diesel::insert_into(shops::table)
                    .values(new_shop)
                    .returning(ShopEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(map_duplicate)?;

                let admin = match admin {
                    Some(mut new_admin) => {
                        new_admin.shop_id = Some(shop.id);
                        let admin = insert_user(conn, new_admin).await?;
                        shop = diesel::update(shops::table.find(shop.id))
                            .set(shops::admin_id.eq(admin.id))
                            .returning(ShopEntity::as_returning())
                            .get_result(conn)
                            .await
                            .context("Failed to assign shop admin")?;
                        Some(admin)
                    }
                    None => None,
                };

                Ok::<CreatedShopRes, AppError>(CreatedShopRes { shop, admin })
            })
        })
        .await?;

    info!(
        "Super admin #{} registered shop #{} ({})",
        acting.id, created.shop.id, created.shop.license_number
    );
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(created),
            message: Some("Medical shop registered successfully"),
        },
    ))
}

#[utoipa::path(
    get,
    path = "/shops/{id}",
    tags = ["Admin shops"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Shop ID")),
    responses(
        (status = 200, description = "Shop", body = StdResponse<ShopEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn get_shop(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop: ShopEntity = shops::table
        .find(id)
        .select(ShopEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(shop),
        message: Some("Shop retrieved successfully"),
    })
}

/// Omitted fields are left unchanged.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateShopReq {
    pub name: Option<String>,
    pub license_number: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub country: Option<String>,
    pub shop_type: Option<ShopType>,
    pub is_active: Option<bool>,
}

impl UpdateShopReq {
    fn validate(self) -> Result<UpdateShopEntity, ValidationError> {
        let required = |label: &str, value: Option<String>| {
            value
                .map(|value| validation::required(label, Some(&value)))
                .transpose()
        };

        Ok(UpdateShopEntity {
            name: self.name.map(|name| shop_name(Some(&name))).transpose()?,
            license_number: self
                .license_number
                .as_deref()
                .map(shop::normalize_license_number)
                .transpose()?,
            email: self.email.as_deref().map(validation::email).transpose()?,
            phone: self.phone.as_deref().map(validation::phone).transpose()?,
            street: required("Street", self.street)?,
            city: required("City", self.city)?,
            state: required("State", self.state)?,
            zip_code: required("Zip code", self.zip_code)?,
            country: required("Country", self.country)?,
            shop_type: self.shop_type.map(|shop_type| shop_type.as_str().to_string()),
            is_active: self.is_active,
        })
    }
}

#[utoipa::path(
    put,
    path = "/shops/{id}",
    tags = ["Admin shops"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Shop ID")),
    request_body = UpdateShopReq,
    responses(
        (status = 200, description = "Shop updated", body = StdResponse<ShopEntity, String>),
        (status = 400, description = "Invalid shop"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Duplicate license number or email")
    )
)]
async fn update_shop(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateShopReq>,
) -> Result<impl IntoResponse, AppError> {
    let changes = body.validate()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop: ShopEntity = diesel::update(shops::table.find(id))
        .set((&changes, shops::updated_at.eq(diesel::dsl::now)))
        .returning(ShopEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(map_duplicate)?;

    info!("Shop #{} updated (active: {})", shop.id, shop.is_active);
    Ok(StdResponse {
        data: Some(shop),
        message: Some("Shop updated successfully"),
    })
}

/// Delete a shop together with its inventory.
#[utoipa::path(
    delete,
    path = "/shops/{id}",
    tags = ["Admin shops"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Shop ID")),
    responses(
        (status = 200, description = "Shop deleted", body = StdResponse<ShopEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn delete_shop(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let shop: ShopEntity = diesel::delete(shops::table.find(id))
        .returning(ShopEntity::as_returning())
        .get_result(conn)
        .await?;

    info!("Deleted shop #{}", shop.id);
    Ok(StdResponse {
        data: Some(shop),
        message: Some("Shop deleted successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> CreateShopReq {
        CreateShopReq {
            name: Some("Green Cross".into()),
            license_number: Some(" dl-20b-1182 ".into()),
            email: Some("GREEN@example.com".into()),
            phone: Some("+91 98765 43210".into()),
            street: Some("MG Road".into()),
            city: Some("Pune".into()),
            state: Some("MH".into()),
            zip_code: Some("411001".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_create_defaults() {
        let shop = valid().validate().unwrap();
        assert_eq!(shop.license_number, "DL-20B-1182");
        assert_eq!(shop.email, "green@example.com");
        assert_eq!(shop.country, DEFAULT_COUNTRY);
        assert_eq!(shop.shop_type, "pharmacy");
    }

    #[test]
    fn test_create_requires_license() {
        let body = CreateShopReq {
            license_number: None,
            ..valid()
        };
        assert_eq!(body.validate().unwrap_err().0, "License number is required");
    }

    #[test]
    fn test_update_validation() {
        let changes = UpdateShopReq {
            license_number: Some("ab-1".into()),
            shop_type: Some(ShopType::HerbalStore),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(changes.license_number.as_deref(), Some("AB-1"));
        assert_eq!(changes.shop_type.as_deref(), Some("herbal_store"));
        assert_eq!(changes.city, None);

        let bad_email = UpdateShopReq {
            email: Some("not-an-email".into()),
            ..Default::default()
        };
        assert!(bad_email.validate().is_err());
    }
}
