use std::collections::HashMap;

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Days, NaiveDate, Utc};
use diesel::{
    AsChangeset, BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl,
    SelectableHelper, pg::Pg,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    bookings,
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{CurrentUser, ShopScope},
        outbox,
    },
    domain::{
        ValidationError, inventory,
        order::{
            self, DEFAULT_GST_RATE, LinePricing, OrderStatus, OrderTotals, PaymentMethod,
            PaymentStatus,
        },
        pagination::{PageQuery, Paged},
        validation,
    },
    events::{ShopOrderLineEvent, ShopOrderPlacedEvent, ShopOrderStatusChangedEvent},
    models::{
        CreateShopOrderEntity, CreateShopOrderItemEntity, InventoryItemEntity, ShopOrderEntity,
        ShopOrderItemEntity,
    },
    schema::{inventory_items, shop_order_items, shop_orders},
};

pub const MIN_CUSTOMER_NAME_LEN: usize = 2;
pub const MAX_CUSTOMER_NAME_LEN: usize = 50;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_orders, create_order))
        .routes(utoipa_axum::routes!(get_order))
        .routes(utoipa_axum::routes!(update_order_status))
}

/// An order with its lines.
#[derive(Serialize, ToSchema, Debug)]
pub struct ShopOrderRes {
    pub order: ShopOrderEntity,
    pub items: Vec<ShopOrderItemEntity>,
}

async fn order_items(
    conn: &mut AsyncPgConnection,
    order_ids: &[i32],
) -> Result<HashMap<i32, Vec<ShopOrderItemEntity>>, AppError> {
    let items: Vec<ShopOrderItemEntity> = shop_order_items::table
        .filter(shop_order_items::order_id.eq_any(order_ids))
        .order(shop_order_items::id.asc())
        .select(ShopOrderItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get order items")?;

    let mut group: HashMap<i32, Vec<ShopOrderItemEntity>> = HashMap::new();
    for item in items {
        group.entry(item.order_id).or_default().push(item);
    }
    Ok(group)
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ShopOrderListQuery {
    /// pending, processing, ready, delivered, cancelled or returned.
    pub status: Option<String>,
    /// pending, partial, paid, failed or refunded.
    pub payment_status: Option<String>,
    /// Orders created on or after this day.
    pub start_date: Option<NaiveDate>,
    /// Orders created on or before this day.
    pub end_date: Option<NaiveDate>,
    /// Order number, customer name or phone; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn midnight(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[derive(Debug, Clone, PartialEq)]
struct OrderFilter {
    shop_id: i32,
    status: Option<OrderStatus>,
    payment_status: Option<PaymentStatus>,
    created_from: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    search: Option<String>,
}

impl OrderFilter {
    fn from_query(shop_id: i32, query: &ShopOrderListQuery) -> Result<Self, ValidationError> {
        if let (Some(start), Some(end)) = (query.start_date, query.end_date)
            && start > end
        {
            return Err(ValidationError::new("Start date must not be after end date"));
        }

        Ok(Self {
            shop_id,
            status: non_blank(query.status.as_deref())
                .map(str::parse::<OrderStatus>)
                .transpose()?,
            payment_status: non_blank(query.payment_status.as_deref())
                .map(str::parse::<PaymentStatus>)
                .transpose()?,
            created_from: query.start_date.map(midnight),
            created_before: query
                .end_date
                .and_then(|end| end.checked_add_days(Days::new(1)))
                .map(midnight),
            search: validation::search_term(query.search.as_deref())?,
        })
    }

    fn apply(&self) -> shop_orders::BoxedQuery<'static, Pg> {
        let mut query = shop_orders::table
            .filter(shop_orders::shop_id.eq(self.shop_id))
            .into_boxed();

        if let Some(status) = self.status {
            query = query.filter(shop_orders::status.eq(status.as_str()));
        }
        if let Some(payment_status) = self.payment_status {
            query = query.filter(shop_orders::payment_status.eq(payment_status.as_str()));
        }
        if let Some(from) = self.created_from {
            query = query.filter(shop_orders::created_at.ge(from));
        }
        if let Some(before) = self.created_before {
            query = query.filter(shop_orders::created_at.lt(before));
        }
        if let Some(search) = &self.search {
            let pattern = validation::like_pattern(search);
            query = query.filter(
                shop_orders::order_number
                    .ilike(pattern.clone())
                    .or(shop_orders::customer_first_name.ilike(pattern.clone()))
                    .or(shop_orders::customer_last_name.ilike(pattern.clone()))
                    .or(shop_orders::customer_phone.ilike(pattern)),
            );
        }
        query
    }
}

/// List the shop's orders, newest first.
#[utoipa::path(
    get,
    path = "/orders",
    tags = ["Shop orders"],
    security(("bearerAuth" = [])),
    params(ShopOrderListQuery),
    responses(
        (status = 200, description = "A page of orders", body = StdResponse<Paged<ShopOrderRes>, String>),
        (status = 400, description = "Invalid filter")
    )
)]
async fn get_orders(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Query(query): Query<ShopOrderListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = OrderFilter::from_query(shop_id, &query)?;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = filter
        .apply()
        .count()
        .get_result(conn)
        .await
        .context("Failed to count orders")?;

    let orders: Vec<ShopOrderEntity> = filter
        .apply()
        .order((shop_orders::created_at.desc(), shop_orders::id.desc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(ShopOrderEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get orders")?;

    let order_ids: Vec<i32> = orders.iter().map(|order| order.id).collect();
    let mut group = order_items(conn, &order_ids).await?;

    let items = orders
        .into_iter()
        .map(|order| ShopOrderRes {
            items: group.remove(&order.id).unwrap_or_default(),
            order,
        })
        .collect();

    Ok(StdResponse {
        data: Some(Paged {
            items,
            pagination: page.paginate(total),
        }),
        message: Some("Orders retrieved successfully"),
    })
}

/// Fetch one of the shop's orders with its lines.
#[utoipa::path(
    get,
    path = "/orders/{id}",
    tags = ["Shop orders"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order", body = StdResponse<ShopOrderRes, String>),
        (status = 404, description = "Not found")
    )
)]
async fn get_order(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let order: ShopOrderEntity = shop_orders::table
        .find(id)
        .filter(shop_orders::shop_id.eq(shop_id))
        .select(ShopOrderEntity::as_select())
        .first(conn)
        .await?;
    let items = order_items(conn, &[order.id])
        .await?
        .remove(&order.id)
        .unwrap_or_default();

    Ok(StdResponse {
        data: Some(ShopOrderRes { order, items }),
        message: Some("Order retrieved successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug, Default, Clone)]
pub struct OrderCustomerReq {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

#[derive(Deserialize, ToSchema, Debug, Clone, PartialEq)]
pub struct OrderLineReq {
    pub inventory_item_id: i32,
    pub quantity: i32,
    /// Defaults to the item's unit price.
    pub unit_price: Option<f64>,
    /// Percentage, 0 to 100. Defaults to 0.
    pub discount_percent: Option<f64>,
    /// One of 0, 5, 12, 18, 28. Defaults to 12.
    pub gst_rate: Option<i32>,
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateShopOrderReq {
    #[serde(default)]
    pub customer: OrderCustomerReq,
    #[serde(default)]
    pub items: Vec<OrderLineReq>,
    pub payment_method: Option<PaymentMethod>,
    /// Amount collected up front. Defaults to 0.
    pub paid_amount: Option<f64>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ValidCustomer {
    first_name: String,
    last_name: String,
    phone: String,
    email: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct ValidOrder {
    customer: ValidCustomer,
    lines: Vec<OrderLineReq>,
    payment_method: PaymentMethod,
    paid_amount: f64,
    notes: Option<String>,
}

fn customer_name(label: &str, value: Option<&str>) -> Result<String, ValidationError> {
    let name = validation::required(label, value)?;
    let len = name.chars().count();
    if !(MIN_CUSTOMER_NAME_LEN..=MAX_CUSTOMER_NAME_LEN).contains(&len) {
        return Err(ValidationError(format!(
            "{} must be between {} and {} characters",
            label, MIN_CUSTOMER_NAME_LEN, MAX_CUSTOMER_NAME_LEN
        )));
    }
    Ok(name)
}

impl CreateShopOrderReq {
    fn validate(self) -> Result<ValidOrder, ValidationError> {
        let customer = ValidCustomer {
            first_name: customer_name("Customer first name", self.customer.first_name.as_deref())?,
            last_name: customer_name("Customer last name", self.customer.last_name.as_deref())?,
            phone: validation::phone(&validation::required(
                "Customer phone",
                self.customer.phone.as_deref(),
            )?)?,
            email: non_blank(self.customer.email.as_deref())
                .map(validation::email)
                .transpose()?,
        };

        if self.items.is_empty() {
            return Err(ValidationError::new("Order must contain at least one item"));
        }
        let mut seen = Vec::with_capacity(self.items.len());
        for line in &self.items {
            if line.quantity < 1 {
                return Err(ValidationError::new("Quantity must be at least 1"));
            }
            if seen.contains(&line.inventory_item_id) {
                return Err(ValidationError(format!(
                    "Product #{} appears more than once",
                    line.inventory_item_id
                )));
            }
            seen.push(line.inventory_item_id);
        }

        let payment_method = self
            .payment_method
            .ok_or_else(|| ValidationError::new("Payment method is required"))?;
        let paid_amount = self.paid_amount.unwrap_or(0.0);
        if !paid_amount.is_finite() || paid_amount < 0.0 {
            return Err(ValidationError::new("Paid amount cannot be negative"));
        }

        Ok(ValidOrder {
            customer,
            lines: self.items,
            payment_method,
            paid_amount,
            notes: bookings::validate_notes(self.notes)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct PlannedLine {
    inventory_item_id: i32,
    name: String,
    category: String,
    pricing: LinePricing,
    remaining_stock: i32,
}

impl PlannedLine {
    fn into_entity(self, order_id: i32) -> CreateShopOrderItemEntity {
        CreateShopOrderItemEntity {
            order_id,
            inventory_item_id: Some(self.inventory_item_id),
            name: self.name,
            category: self.category,
            quantity: self.pricing.quantity,
            unit_price: self.pricing.unit_price,
            discount_percent: self.pricing.discount_percent,
            discount_amount: self.pricing.discount_amount,
            gst_rate: self.pricing.gst_rate,
            gst_amount: self.pricing.gst_amount,
            total_amount: self.pricing.total_amount,
        }
    }
}

#[derive(Debug)]
struct PlannedOrder {
    order: CreateShopOrderEntity,
    lines: Vec<PlannedLine>,
}

/// Prices every line against the locked `stock` rows and works out the
/// stock left after the sale.
fn plan_order(
    shop_id: i32,
    created_by: Option<i32>,
    order_number: String,
    order: ValidOrder,
    stock: &HashMap<i32, InventoryItemEntity>,
) -> Result<PlannedOrder, ValidationError> {
    let lines = order
        .lines
        .iter()
        .map(|line| {
            let item = stock.get(&line.inventory_item_id).ok_or_else(|| {
                ValidationError(format!(
                    "Product #{} not found in inventory",
                    line.inventory_item_id
                ))
            })?;
            let remaining_stock = inventory::take_for_sale(&item.name, item.quantity, line.quantity)?;
            let unit_price = line
                .unit_price
                .unwrap_or_else(|| order::round_amount(f64::from(item.unit_price)));
            let pricing = order::price_line(
                line.quantity,
                unit_price,
                line.discount_percent.unwrap_or(0.0),
                line.gst_rate.unwrap_or(DEFAULT_GST_RATE),
            )?;

            Ok(PlannedLine {
                inventory_item_id: item.id,
                name: item.name.clone(),
                category: item.category.clone(),
                pricing,
                remaining_stock,
            })
        })
        .collect::<Result<Vec<_>, ValidationError>>()?;

    let pricing: Vec<LinePricing> = lines.iter().map(|line| line.pricing).collect();
    let totals = OrderTotals::from_lines(&pricing);
    if order.paid_amount > totals.final_amount {
        return Err(ValidationError(format!(
            "Paid amount cannot exceed the order total of {:.2}",
            totals.final_amount
        )));
    }

    Ok(PlannedOrder {
        order: CreateShopOrderEntity {
            shop_id,
            order_number,
            customer_first_name: order.customer.first_name,
            customer_last_name: order.customer.last_name,
            customer_phone: order.customer.phone,
            customer_email: order.customer.email,
            status: OrderStatus::Pending.as_str().into(),
            payment_method: order.payment_method.as_str().into(),
            payment_status: PaymentStatus::for_amounts(order.paid_amount, totals.final_amount)
                .as_str()
                .into(),
            paid_amount: order.paid_amount,
            subtotal: totals.subtotal,
            total_discount: totals.total_discount,
            total_gst: totals.total_gst,
            round_off: totals.round_off,
            final_amount: totals.final_amount,
            notes: order.notes,
            created_by,
        },
        lines,
    })
}

/// Record a sale. Stock for every line is taken in the same transaction;
/// an order that would oversell any line is rejected as a whole.
#[utoipa::path(
    post,
    path = "/orders",
    tags = ["Shop orders"],
    security(("bearerAuth" = [])),
    request_body = CreateShopOrderReq,
    responses(
        (status = 201, description = "Order created", body = StdResponse<ShopOrderRes, String>),
        (status = 400, description = "Invalid order or insufficient stock")
    )
)]
async fn create_order(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<CreateShopOrderReq>,
) -> Result<impl IntoResponse, AppError> {
    let order = body.validate()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let created = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let item_ids: Vec<i32> = order
                    .lines
                    .iter()
                    .map(|line| line.inventory_item_id)
                    .collect();
                // Locked in id order so concurrent sales cannot deadlock.
                let stock: HashMap<i32, InventoryItemEntity> = inventory_items::table
                    .filter(inventory_items::shop_id.eq(shop_id))
                    .filter(inventory_items::id.eq_any(item_ids))
                    .order(inventory_items::id.asc())
                    .select(InventoryItemEntity::as_select())
                    .for_update()
                    .load(conn)
                    .await
                    .context("Failed to lock inventory items")?
                    .into_iter()
                    .map(|item| (item.id, item))
                    .collect();

                let PlannedOrder { order, lines } = plan_order(
                    shop_id,
                    Some(user.id),
                    order::generate_order_number(Utc::now()),
                    order,
                    &stock,
                )?;

                let created: ShopOrderEntity = diesel::insert_into(shop_orders::table)
                    .values(order)
                    .returning(ShopOrderEntity::as_returning())
                    .get_result(conn)
                    .await?;

                for line in &lines {
                    diesel::update(inventory_items::table.find(line.inventory_item_id))
                        .set((
                            inventory_items::quantity.eq(line.remaining_stock),
                            inventory_items::updated_at.eq(diesel::dsl::now),
                        ))
                        .execute(conn)
                        .await
                        .context("Failed to update stock")?;
                }

                let items: Vec<ShopOrderItemEntity> = diesel::insert_into(shop_order_items::table)
                    .values(
                        lines
                            .into_iter()
                            .map(|line| line.into_entity(created.id))
                            .collect::<Vec<_>>(),
                    )
                    .returning(ShopOrderItemEntity::as_returning())
                    .get_results(conn)
                    .await
                    .context("Failed to insert order items")?;

                outbox::publish(
                    conn,
                    ShopOrderPlacedEvent::EVENT_TYPE.into(),
                    ShopOrderPlacedEvent {
                        order_id: created.id,
                        shop_id: created.shop_id,
                        order_number: created.order_number.clone(),
                        customer_name: format!(
                            "{} {}",
                            created.customer_first_name, created.customer_last_name
                        ),
                        customer_email: created.customer_email.clone(),
                        final_amount: created.final_amount,
                        items: items
                            .iter()
                            .map(|item| ShopOrderLineEvent {
                                name: item.name.clone(),
                                quantity: item.quantity,
                                total_amount: item.total_amount,
                            })
                            .collect(),
                    },
                )
                .await?;

                Ok::<ShopOrderRes, AppError>(ShopOrderRes {
                    order: created,
                    items,
                })
            })
        })
        .await?;

    info!(
        "Order {} created for shop #{} ({} lines, {:.2})",
        created.order.order_number,
        shop_id,
        created.items.len(),
        created.order.final_amount
    );
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(created),
            message: Some("Order created successfully"),
        },
    ))
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateOrderStatusReq {
    pub status: Option<OrderStatus>,
    /// Replaces the order notes when given; at most 500 characters.
    pub notes: Option<String>,
}

#[derive(AsChangeset, Debug, PartialEq)]
#[diesel(table_name = shop_orders)]
struct OrderStatusChanges {
    status: String,
    notes: Option<Option<String>>,
    updated_by: Option<i32>,
}

fn status_changes(
    current: OrderStatus,
    body: UpdateOrderStatusReq,
    updated_by: i32,
) -> Result<(OrderStatus, OrderStatusChanges), ValidationError> {
    let requested = body
        .status
        .ok_or_else(|| ValidationError::new("Status is required"))?;
    let next = current.transition_to(requested)?;
    let notes = body
        .notes
        .map(|notes| bookings::validate_notes(Some(notes)))
        .transpose()?;

    Ok((
        next,
        OrderStatusChanges {
            status: next.as_str().into(),
            notes,
            updated_by: Some(updated_by),
        },
    ))
}

/// Quantity to put back per inventory item. Lines whose item has since
/// been deleted are skipped.
fn restock_quantities(items: &[ShopOrderItemEntity]) -> HashMap<i32, i32> {
    let mut quantities: HashMap<i32, i32> = HashMap::new();
    for item in items {
        if let Some(inventory_item_id) = item.inventory_item_id {
            *quantities.entry(inventory_item_id).or_default() += item.quantity;
        }
    }
    quantities
}

async fn restock(
    conn: &mut AsyncPgConnection,
    shop_id: i32,
    items: &[ShopOrderItemEntity],
) -> Result<(), AppError> {
    let quantities = restock_quantities(items);
    let stock: Vec<InventoryItemEntity> = inventory_items::table
        .filter(inventory_items::shop_id.eq(shop_id))
        .filter(inventory_items::id.eq_any(quantities.keys().copied().collect::<Vec<_>>()))
        .order(inventory_items::id.asc())
        .select(InventoryItemEntity::as_select())
        .for_update()
        .load(conn)
        .await
        .context("Failed to lock inventory items")?;

    for item in stock {
        let returned = quantities.get(&item.id).copied().unwrap_or(0);
        let quantity = inventory::apply_stock_delta(item.quantity, returned)?;
        diesel::update(inventory_items::table.find(item.id))
            .set((
                inventory_items::quantity.eq(quantity),
                inventory_items::updated_at.eq(diesel::dsl::now),
            ))
            .execute(conn)
            .await
            .context("Failed to restock item")?;
    }
    Ok(())
}

/// Move an order along its fulfilment path. Cancelling or returning an
/// order puts its items back in stock.
#[utoipa::path(
    put,
    path = "/orders/{id}/status",
    tags = ["Shop orders"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Order ID")),
    request_body = UpdateOrderStatusReq,
    responses(
        (status = 200, description = "Order status updated", body = StdResponse<ShopOrderRes, String>),
        (status = 400, description = "Missing status or invalid transition"),
        (status = 404, description = "Not found")
    )
)]
async fn update_order_status(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateOrderStatusReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let updated = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let order: ShopOrderEntity = shop_orders::table
                    .find(id)
                    .filter(shop_orders::shop_id.eq(shop_id))
                    .select(ShopOrderEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                let current: OrderStatus = order.status.parse()?;
                let (next, changes) = status_changes(current, body, user.id)?;

                let items = order_items(conn, &[order.id])
                    .await?
                    .remove(&order.id)
                    .unwrap_or_default();
                if next.restocks() && !current.restocks() {
                    restock(conn, shop_id, &items).await?;
                }

                let updated: ShopOrderEntity = diesel::update(shop_orders::table.find(order.id))
                    .set((&changes, shop_orders::updated_at.eq(diesel::dsl::now)))
                    .returning(ShopOrderEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update order status")?;

                if next != current {
                    outbox::publish(
                        conn,
                        ShopOrderStatusChangedEvent::EVENT_TYPE.into(),
                        ShopOrderStatusChangedEvent {
                            order_id: updated.id,
                            shop_id: updated.shop_id,
                            order_number: updated.order_number.clone(),
                            previous_status: current.as_str().into(),
                            status: next.as_str().into(),
                            customer_email: updated.customer_email.clone(),
                        },
                    )
                    .await?;
                }

                Ok::<ShopOrderRes, AppError>(ShopOrderRes {
                    order: updated,
                    items,
                })
            })
        })
        .await?;

    info!(
        "Order {} of shop #{} is now {}",
        updated.order.order_number, shop_id, updated.order.status
    );
    Ok(StdResponse {
        data: Some(updated),
        message: Some("Order status updated successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stock_item(id: i32, name: &str, quantity: i32, unit_price: f32) -> InventoryItemEntity {
        InventoryItemEntity {
            id,
            shop_id: 2,
            name: name.into(),
            category: "Analgesic".into(),
            unit_price,
            quantity,
            minimum_quantity: 10,
            expiry_date: None,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }

    fn stock() -> HashMap<i32, InventoryItemEntity> {
        [
            stock_item(7, "Paracetamol 500mg", 40, 2.5),
            stock_item(9, "Cough Syrup", 3, 85.0),
        ]
        .into_iter()
        .map(|item| (item.id, item))
        .collect()
    }

    fn line(inventory_item_id: i32, quantity: i32) -> OrderLineReq {
        OrderLineReq {
            inventory_item_id,
            quantity,
            unit_price: None,
            discount_percent: None,
            gst_rate: None,
        }
    }

    fn request() -> CreateShopOrderReq {
        CreateShopOrderReq {
            customer: OrderCustomerReq {
                first_name: Some(" Ravi ".into()),
                last_name: Some("Kumar".into()),
                phone: Some("98765-43210".into()),
                email: Some("  ".into()),
            },
            items: vec![line(7, 10), line(9, 1)],
            payment_method: Some(PaymentMethod::Upi),
            paid_amount: None,
            notes: None,
        }
    }

    fn item_row(id: i32, inventory_item_id: Option<i32>, quantity: i32) -> ShopOrderItemEntity {
        ShopOrderItemEntity {
            id,
            order_id: 1,
            inventory_item_id,
            name: "Paracetamol 500mg".into(),
            category: "Analgesic".into(),
            quantity,
            unit_price: 2.5,
            discount_percent: 0.0,
            discount_amount: 0.0,
            gst_rate: 12,
            gst_amount: 0.0,
            total_amount: 0.0,
        }
    }

    #[test]
    fn test_validate_normalizes_customer() {
        let order = request().validate().unwrap();
        assert_eq!(order.customer.first_name, "Ravi");
        assert_eq!(order.customer.phone, "9876543210");
        assert_eq!(order.customer.email, None);
        assert_eq!(order.paid_amount, 0.0);
    }

    #[test]
    fn test_validate_reports_problems() {
        let cases: [(fn(&mut CreateShopOrderReq), &str); 6] = [
            (
                |r| r.customer.first_name = Some("R".into()),
                "Customer first name must be between 2 and 50 characters",
            ),
            (|r| r.customer.phone = None, "Customer phone is required"),
            (|r| r.items.clear(), "Order must contain at least one item"),
            (|r| r.items[1].quantity = 0, "Quantity must be at least 1"),
            (|r| r.items.push(line(7, 1)), "Product #7 appears more than once"),
            (|r| r.payment_method = None, "Payment method is required"),
        ];
        for (mutate, message) in cases {
            let mut body = request();
            mutate(&mut body);
            assert_eq!(body.validate().unwrap_err().0, message);
        }
    }

    #[test]
    fn test_plan_prices_lines_and_takes_stock() {
        let order = request().validate().unwrap();
        let planned = plan_order(2, Some(5), "ORD12345678001".into(), order, &stock()).unwrap();

        assert_eq!(planned.lines.len(), 2);
        assert_eq!(planned.lines[0].remaining_stock, 30);
        assert_eq!(planned.lines[1].remaining_stock, 2);
        // 10 x 2.50 and 1 x 85.00, both at 12% GST.
        assert_eq!(planned.order.subtotal, 110.0);
        assert_eq!(planned.order.total_gst, 13.2);
        assert_eq!(planned.order.final_amount, 123.0);
        assert_eq!(planned.order.status, "pending");
        assert_eq!(planned.order.payment_status, "pending");
        assert_eq!(planned.order.payment_method, "upi");

        let entity = planned.lines[1].clone().into_entity(44);
        assert_eq!(entity.order_id, 44);
        assert_eq!(entity.inventory_item_id, Some(9));
        assert_eq!(entity.name, "Cough Syrup");
    }

    #[test]
    fn test_plan_rejects_overselling() {
        let mut body = request();
        body.items[1].quantity = 4;
        let err = plan_order(2, None, "ORD".into(), body.validate().unwrap(), &stock()).unwrap_err();
        assert_eq!(err.0, "Insufficient stock for Cough Syrup. Available: 3");
    }

    #[test]
    fn test_plan_rejects_unknown_products() {
        let mut body = request();
        body.items.push(line(99, 1));
        let err = plan_order(2, None, "ORD".into(), body.validate().unwrap(), &stock()).unwrap_err();
        assert_eq!(err.0, "Product #99 not found in inventory");
    }

    #[test]
    fn test_plan_tracks_payment() {
        let mut body = request();
        body.paid_amount = Some(50.0);
        let planned = plan_order(2, None, "ORD".into(), body.validate().unwrap(), &stock()).unwrap();
        assert_eq!(planned.order.payment_status, "partial");

        let mut body = request();
        body.paid_amount = Some(500.0);
        let err = plan_order(2, None, "ORD".into(), body.validate().unwrap(), &stock()).unwrap_err();
        assert_eq!(err.0, "Paid amount cannot exceed the order total of 123.00");
    }

    #[test]
    fn test_status_changes_follow_fulfilment() {
        let body = UpdateOrderStatusReq {
            status: Some(OrderStatus::Ready),
            notes: Some("Packed".into()),
        };
        let (next, changes) = status_changes(OrderStatus::Processing, body, 5).unwrap();
        assert_eq!(next, OrderStatus::Ready);
        assert_eq!(changes.notes, Some(Some("Packed".into())));
        assert_eq!(changes.updated_by, Some(5));

        let missing = UpdateOrderStatusReq::default();
        assert_eq!(
            status_changes(OrderStatus::Pending, missing, 5).unwrap_err().0,
            "Status is required"
        );

        let backwards = UpdateOrderStatusReq {
            status: Some(OrderStatus::Pending),
            notes: None,
        };
        assert!(status_changes(OrderStatus::Delivered, backwards, 5).is_err());
    }

    #[test]
    fn test_restock_quantities_skip_deleted_items() {
        let quantities = restock_quantities(&[
            item_row(1, Some(7), 10),
            item_row(2, None, 4),
            item_row(3, Some(9), 1),
        ]);
        assert_eq!(quantities.len(), 2);
        assert_eq!(quantities[&7], 10);
        assert_eq!(quantities[&9], 1);
    }

    #[test]
    fn test_filter_validation() {
        let query = ShopOrderListQuery {
            status: Some("ready".into()),
            payment_status: Some("partial".into()),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 17),
            ..Default::default()
        };
        let filter = OrderFilter::from_query(2, &query).unwrap();
        assert_eq!(filter.status, Some(OrderStatus::Ready));
        assert_eq!(filter.payment_status, Some(PaymentStatus::Partial));
        assert_eq!(
            filter.created_before.map(|before| before.to_rfc3339()),
            Some("2026-10-18T00:00:00+00:00".to_string())
        );

        let reversed = ShopOrderListQuery {
            start_date: NaiveDate::from_ymd_opt(2026, 10, 17),
            end_date: NaiveDate::from_ymd_opt(2026, 10, 1),
            ..Default::default()
        };
        assert!(OrderFilter::from_query(2, &reversed).is_err());

        let bad_status = ShopOrderListQuery {
            status: Some("shipped".into()),
            ..Default::default()
        };
        assert!(OrderFilter::from_query(2, &bad_status).is_err());
    }
}
