use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{NaiveDate, Utc};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
    pg::Pg,
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::ShopScope,
    },
    domain::{
        ValidationError,
        inventory::{self, StockChange, StockOperation},
        pagination::{PageQuery, Paged},
        validation,
    },
    models::{
        CreateInventoryItemEntity, InventoryItemEntity, InventoryItemView,
        UpdateInventoryItemEntity,
    },
    schema::inventory_items,
};

pub const DEFAULT_MINIMUM_QUANTITY: i32 = 10;
pub const DEFAULT_EXPIRY_WINDOW_DAYS: i64 = 30;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_inventory, create_item))
        .routes(utoipa_axum::routes!(get_item, update_item, delete_item))
        .routes(utoipa_axum::routes!(adjust_stock))
        .routes(utoipa_axum::routes!(get_low_stock_items))
        .routes(utoipa_axum::routes!(get_expiring_items))
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct InventoryListQuery {
    pub category: Option<String>,
    /// Name or category fragment; at least 2 characters.
    pub search: Option<String>,
    /// Only items at or below their minimum quantity.
    pub low_stock: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn filtered(
    shop_id: i32,
    category: Option<&str>,
    search: Option<&str>,
    low_stock: bool,
) -> inventory_items::BoxedQuery<'static, Pg> {
    let mut query = inventory_items::table
        .filter(inventory_items::shop_id.eq(shop_id))
        .into_boxed();

    if let Some(category) = category {
        query = query.filter(inventory_items::category.eq(category.to_string()));
    }
    if let Some(search) = search {
        let pattern = validation::like_pattern(search);
        query = query.filter(
            inventory_items::name
                .ilike(pattern.clone())
                .or(inventory_items::category.ilike(pattern)),
        );
    }
    if low_stock {
        query = query.filter(inventory_items::quantity.le(inventory_items::minimum_quantity));
    }
    query
}

fn views(items: Vec<InventoryItemEntity>) -> Vec<InventoryItemView> {
    let today = Utc::now().date_naive();
    items
        .into_iter()
        .map(|item| InventoryItemView::new(item, today))
        .collect()
}

/// List the shop's inventory by name.
#[utoipa::path(
    get,
    path = "/inventory",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(InventoryListQuery),
    responses(
        (status = 200, description = "A page of inventory items", body = StdResponse<Paged<InventoryItemView>, String>)
    )
)]
async fn get_inventory(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Query(query): Query<InventoryListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let category = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|category| !category.is_empty());
    let low_stock = query.low_stock.unwrap_or(false);
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = filtered(shop_id, category, search.as_deref(), low_stock)
        .count()
        .get_result(conn)
        .await
        .context("Failed to count inventory items")?;

    let items: Vec<InventoryItemEntity> =
        filtered(shop_id, category, search.as_deref(), low_stock)
            .order((inventory_items::name.asc(), inventory_items::id.asc()))
            .limit(page.limit())
            .offset(page.offset())
            .select(InventoryItemEntity::as_select())
            .load(conn)
            .await
            .context("Failed to get inventory items")?;

    Ok(StdResponse {
        data: Some(Paged {
            items: views(items),
            pagination: page.paginate(total),
        }),
        message: Some("Inventory retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateInventoryItemReq {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit_price: Option<f32>,
    /// Defaults to 0.
    pub quantity: Option<i32>,
    /// Defaults to 10.
    pub minimum_quantity: Option<i32>,
    pub expiry_date: Option<NaiveDate>,
}

fn non_negative_price(price: f32) -> Result<f32, ValidationError> {
    if !price.is_finite() || price < 0.0 {
        return Err(ValidationError::new("Unit price cannot be negative"));
    }
    Ok(price)
}

fn non_negative(label: &str, value: i32) -> Result<i32, ValidationError> {
    if value < 0 {
        return Err(ValidationError(format!("{} cannot be negative", label)));
    }
    Ok(value)
}

impl CreateInventoryItemReq {
    fn validate(self, shop_id: i32) -> Result<CreateInventoryItemEntity, ValidationError> {
        Ok(CreateInventoryItemEntity {
            shop_id,
            name: validation::required("Name", self.name.as_deref())?,
            category: validation::required("Category", self.category.as_deref())?,
            unit_price: non_negative_price(
                self.unit_price
                    .ok_or_else(|| ValidationError::new("Unit price is required"))?,
            )?,
            quantity: non_negative("Quantity", self.quantity.unwrap_or(0))?,
            minimum_quantity: non_negative(
                "Minimum quantity",
                self.minimum_quantity.unwrap_or(DEFAULT_MINIMUM_QUANTITY),
            )?,
            expiry_date: self.expiry_date,
        })
    }
}

/// Add an item to the shop's inventory.
#[utoipa::path(
    post,
    path = "/inventory",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    request_body = CreateInventoryItemReq,
    responses(
        (status = 201, description = "Item created", body = StdResponse<InventoryItemView, String>),
        (status = 400, description = "Invalid item")
    )
)]
async fn create_item(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Json(body): Json<CreateInventoryItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let new_item = body.validate(shop_id)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: InventoryItemEntity = diesel::insert_into(inventory_items::table)
        .values(new_item)
        .returning(InventoryItemEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to create inventory item")?;

    info!("Inventory item #{} added to shop #{}", item.id, shop_id);
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(InventoryItemView::new(item, Utc::now().date_naive())),
            message: Some("Inventory item added successfully"),
        },
    ))
}

/// Fetch one inventory item.
#[utoipa::path(
    get,
    path = "/inventory/{id}",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Inventory item ID")),
    responses(
        (status = 200, description = "Inventory item", body = StdResponse<InventoryItemView, String>),
        (status = 404, description = "Not found")
    )
)]
async fn get_item(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: InventoryItemEntity = inventory_items::table
        .find(id)
        .filter(inventory_items::shop_id.eq(shop_id))
        .select(InventoryItemEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(InventoryItemView::new(item, Utc::now().date_naive())),
        message: Some("Inventory item retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateInventoryItemReq {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit_price: Option<f32>,
    pub quantity: Option<i32>,
    pub minimum_quantity: Option<i32>,
    pub expiry_date: Option<NaiveDate>,
}

impl UpdateInventoryItemReq {
    fn validate(self) -> Result<UpdateInventoryItemEntity, ValidationError> {
        Ok(UpdateInventoryItemEntity {
            name: self
                .name
                .map(|name| validation::required("Name", Some(&name)))
                .transpose()?,
            category: self
                .category
                .map(|category| validation::required("Category", Some(&category)))
                .transpose()?,
            unit_price: self.unit_price.map(non_negative_price).transpose()?,
            quantity: self
                .quantity
                .map(|quantity| non_negative("Quantity", quantity))
                .transpose()?,
            minimum_quantity: self
                .minimum_quantity
                .map(|minimum| non_negative("Minimum quantity", minimum))
                .transpose()?,
            expiry_date: self.expiry_date.map(Some),
        })
    }
}

/// Update an inventory item.
#[utoipa::path(
    put,
    path = "/inventory/{id}",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Inventory item ID")),
    request_body = UpdateInventoryItemReq,
    responses(
        (status = 200, description = "Item updated", body = StdResponse<InventoryItemView, String>),
        (status = 404, description = "Not found")
    )
)]
async fn update_item(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateInventoryItemReq>,
) -> Result<impl IntoResponse, AppError> {
    let changes = body.validate()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: InventoryItemEntity = diesel::update(
        inventory_items::table
            .find(id)
            .filter(inventory_items::shop_id.eq(shop_id)),
    )
    .set((&changes, inventory_items::updated_at.eq(diesel::dsl::now)))
    .returning(InventoryItemEntity::as_returning())
    .get_result(conn)
    .await?;

    Ok(StdResponse {
        data: Some(InventoryItemView::new(item, Utc::now().date_naive())),
        message: Some("Inventory item updated successfully"),
    })
}

/// Remove an inventory item.
#[utoipa::path(
    delete,
    path = "/inventory/{id}",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Inventory item ID")),
    responses(
        (status = 200, description = "Item deleted", body = StdResponse<InventoryItemView, String>),
        (status = 404, description = "Not found")
    )
)]
async fn delete_item(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let item: InventoryItemEntity = diesel::delete(
        inventory_items::table
            .find(id)
            .filter(inventory_items::shop_id.eq(shop_id)),
    )
    .returning(InventoryItemEntity::as_returning())
    .get_result(conn)
    .await?;

    info!("Inventory item #{} removed from shop #{}", item.id, shop_id);
    Ok(StdResponse {
        data: Some(InventoryItemView::new(item, Utc::now().date_naive())),
        message: Some("Inventory item deleted successfully"),
    })
}

/// Either `delta`, or `quantity` with an `operation`.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct AdjustStockReq {
    /// Positive to restock, negative to remove.
    pub delta: Option<i32>,
    /// Non-negative amount for `operation`.
    pub quantity: Option<i32>,
    /// set (default), add or subtract.
    pub operation: Option<StockOperation>,
}

#[derive(Serialize, ToSchema)]
pub struct AdjustStockRes {
    pub item: InventoryItemView,
    pub previous_quantity: i32,
    pub new_quantity: i32,
}

/// Set, add to or subtract from an item's stock. Removing more than is in
/// stock leaves zero.
#[utoipa::path(
    patch,
    path = "/inventory/{id}/stock",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Inventory item ID")),
    request_body = AdjustStockReq,
    responses(
        (status = 200, description = "Stock adjusted", body = StdResponse<AdjustStockRes, String>),
        (status = 400, description = "Missing or negative quantity"),
        (status = 404, description = "Not found")
    )
)]
async fn adjust_stock(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Path(id): Path<i32>,
    Json(body): Json<AdjustStockReq>,
) -> Result<impl IntoResponse, AppError> {
    let change = StockChange::from_parts(body.delta, body.quantity, body.operation)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let (item, previous_quantity) = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let item: InventoryItemEntity = inventory_items::table
                    .find(id)
                    .filter(inventory_items::shop_id.eq(shop_id))
                    .select(InventoryItemEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                let quantity = change.apply(item.quantity)?;

                let updated: InventoryItemEntity = diesel::update(inventory_items::table.find(id))
                    .set((
                        inventory_items::quantity.eq(quantity),
                        inventory_items::updated_at.eq(diesel::dsl::now),
                    ))
                    .returning(InventoryItemEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update stock")?;

                Ok::<(InventoryItemEntity, i32), AppError>((updated, item.quantity))
            })
        })
        .await?;

    let new_quantity = item.quantity;
    Ok(StdResponse {
        data: Some(AdjustStockRes {
            item: InventoryItemView::new(item, Utc::now().date_naive()),
            previous_quantity,
            new_quantity,
        }),
        message: Some("Stock updated successfully"),
    })
}

#[derive(Serialize, ToSchema)]
pub struct InventoryAlertRes {
    pub items: Vec<InventoryItemView>,
    pub count: usize,
    /// Only set for expiry alerts.
    pub days_range: Option<i64>,
}

/// Items at or below their minimum quantity, lowest stock first.
#[utoipa::path(
    get,
    path = "/inventory/alerts/low-stock",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Low stock items", body = StdResponse<InventoryAlertRes, String>)
    )
)]
async fn get_low_stock_items(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let items: Vec<InventoryItemEntity> = filtered(shop_id, None, None, true)
        .order((inventory_items::quantity.asc(), inventory_items::name.asc()))
        .select(InventoryItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get low stock items")?;

    let items = views(items);
    Ok(StdResponse {
        data: Some(InventoryAlertRes {
            count: items.len(),
            items,
            days_range: None,
        }),
        message: Some("Low stock items retrieved successfully"),
    })
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct ExpiringQuery {
    /// Look-ahead window in days, 30 by default.
    pub days: Option<i64>,
}

/// Items that have not expired yet but will within the window, soonest first.
#[utoipa::path(
    get,
    path = "/inventory/alerts/expiring",
    tags = ["Shop inventory"],
    security(("bearerAuth" = [])),
    params(ExpiringQuery),
    responses(
        (status = 200, description = "Expiring items", body = StdResponse<InventoryAlertRes, String>),
        (status = 400, description = "Invalid window")
    )
)]
async fn get_expiring_items(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Query(query): Query<ExpiringQuery>,
) -> Result<impl IntoResponse, AppError> {
    let days = query.days.unwrap_or(DEFAULT_EXPIRY_WINDOW_DAYS);
    if !(0..=3650).contains(&days) {
        return Err(AppError::BadRequest(
            "Days must be between 0 and 3650".into(),
        ));
    }
    let today = Utc::now().date_naive();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let items: Vec<InventoryItemEntity> = inventory_items::table
        .filter(inventory_items::shop_id.eq(shop_id))
        .filter(inventory_items::expiry_date.ge(today))
        .order(inventory_items::expiry_date.asc())
        .select(InventoryItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get expiring items")?;

    let items: Vec<InventoryItemView> = items
        .into_iter()
        .filter(|item| inventory::expires_within(item.expiry_date, today, days))
        .map(|item| InventoryItemView::new(item, today))
        .collect();

    Ok(StdResponse {
        data: Some(InventoryAlertRes {
            count: items.len(),
            items,
            days_range: Some(days),
        }),
        message: Some("Expiring items retrieved successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_defaults() {
        let body = CreateInventoryItemReq {
            name: Some(" Paracetamol 500mg ".into()),
            category: Some("Analgesic".into()),
            unit_price: Some(2.5),
            ..Default::default()
        };
        let item = body.validate(4).unwrap();
        assert_eq!(item.shop_id, 4);
        assert_eq!(item.name, "Paracetamol 500mg");
        assert_eq!(item.quantity, 0);
        assert_eq!(item.minimum_quantity, DEFAULT_MINIMUM_QUANTITY);
    }

    #[test]
    fn test_create_requires_price() {
        let body = CreateInventoryItemReq {
            name: Some("Gauze".into()),
            category: Some("Surgical".into()),
            ..Default::default()
        };
        assert_eq!(body.validate(1).unwrap_err().0, "Unit price is required");
    }

    #[test]
    fn test_rejects_negative_values() {
        let body = CreateInventoryItemReq {
            name: Some("Gauze".into()),
            category: Some("Surgical".into()),
            unit_price: Some(-1.0),
            ..Default::default()
        };
        assert!(body.validate(1).is_err());

        let update = UpdateInventoryItemReq {
            quantity: Some(-3),
            ..Default::default()
        };
        assert_eq!(update.validate().unwrap_err().0, "Quantity cannot be negative");
    }

    #[test]
    fn test_update_only_sets_given_fields() {
        let update = UpdateInventoryItemReq {
            minimum_quantity: Some(5),
            ..Default::default()
        }
        .validate()
        .unwrap();
        assert_eq!(update.minimum_quantity, Some(5));
        assert_eq!(update.name, None);
        assert_eq!(update.expiry_date, None);
    }

    #[test]
    fn test_stock_request_bodies() {
        let body: AdjustStockReq =
            serde_json::from_str(r#"{ "quantity": 30, "operation": "subtract" }"#).unwrap();
        let change = StockChange::from_parts(body.delta, body.quantity, body.operation).unwrap();
        assert_eq!(change.apply(12), Ok(0));

        let body: AdjustStockReq = serde_json::from_str(r#"{ "quantity": 25 }"#).unwrap();
        let change = StockChange::from_parts(body.delta, body.quantity, body.operation).unwrap();
        assert_eq!(change.apply(12), Ok(25));

        let body: AdjustStockReq = serde_json::from_str(r#"{ "delta": -4 }"#).unwrap();
        let change = StockChange::from_parts(body.delta, body.quantity, body.operation).unwrap();
        assert_eq!(change.apply(3), Ok(0));
    }
}
