use anyhow::Context;
use axum::{
    Extension,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::{
    ExpressionMethods, QueryDsl, SelectableHelper,
    dsl::{avg, count_star, sum},
};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::ShopScope,
    },
    domain::{
        inventory,
        order::{self, OrderStatus},
    },
    models::InventoryItemEntity,
    routes::hospitals::appointments::{StatsPeriod, StatsQuery},
    schema::{inventory_items, shop_order_items, shop_orders},
};

pub const TOP_CATEGORIES: usize = 5;

/// Orders that no longer count as sales.
const NOT_SOLD: [OrderStatus; 2] = [OrderStatus::Cancelled, OrderStatus::Returned];

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(get_stats))
}

#[derive(Serialize, ToSchema, Debug, Default, PartialEq)]
pub struct SalesSummary {
    pub total_orders: i64,
    pub total_revenue: f64,
    pub average_order_value: f64,
    pub total_discount: f64,
}

impl SalesSummary {
    fn from_row((total_orders, revenue, average, discount): SalesRow) -> Self {
        SalesSummary {
            total_orders,
            total_revenue: order::round_amount(revenue.unwrap_or(0.0)),
            average_order_value: order::round_amount(average.unwrap_or(0.0)),
            total_discount: order::round_amount(discount.unwrap_or(0.0)),
        }
    }
}

type SalesRow = (i64, Option<f64>, Option<f64>, Option<f64>);

#[derive(Serialize, ToSchema, Debug, Default, PartialEq)]
pub struct InventorySummary {
    pub total_products: i64,
    pub total_stock: i64,
    pub low_stock_items: i64,
    pub expired_items: i64,
    /// Shelf value at unit price.
    pub total_stock_value: f64,
}

impl InventorySummary {
    pub fn from_items(items: &[InventoryItemEntity], today: NaiveDate) -> Self {
        let mut summary = InventorySummary::default();
        let mut value = 0.0;
        for item in items {
            summary.total_products += 1;
            summary.total_stock += i64::from(item.quantity);
            if inventory::is_low_stock(item.quantity, item.minimum_quantity) {
                summary.low_stock_items += 1;
            }
            if inventory::is_expired(item.expiry_date, today) {
                summary.expired_items += 1;
            }
            value += f64::from(item.quantity) * f64::from(item.unit_price);
        }
        summary.total_stock_value = order::round_amount(value);
        summary
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct CategorySales {
    pub category: String,
    pub quantity: i64,
    pub revenue: f64,
}

fn top_categories(rows: Vec<(String, Option<i64>, Option<f64>)>) -> Vec<CategorySales> {
    let mut categories: Vec<CategorySales> = rows
        .into_iter()
        .map(|(category, quantity, revenue)| CategorySales {
            category,
            quantity: quantity.unwrap_or(0),
            revenue: order::round_amount(revenue.unwrap_or(0.0)),
        })
        .collect();
    categories.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then_with(|| a.category.cmp(&b.category))
    });
    categories.truncate(TOP_CATEGORIES);
    categories
}

#[derive(Serialize, ToSchema)]
pub struct ShopStatsRes {
    pub sales: SalesSummary,
    pub inventory: InventorySummary,
    pub top_categories: Vec<CategorySales>,
    pub period: StatsPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Sales for orders placed within the period, plus a snapshot of the
/// shelf. Cancelled and returned orders are left out of the sales figures.
#[utoipa::path(
    get,
    path = "/stats",
    tags = ["Shop orders"],
    security(("bearerAuth" = [])),
    params(StatsQuery),
    responses(
        (status = 200, description = "Shop statistics", body = StdResponse<ShopStatsRes, String>)
    )
)]
async fn get_stats(
    State(state): State<AppState>,
    Extension(ShopScope(shop_id)): Extension<ShopScope>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = query.period.unwrap_or_default();
    let now = Utc::now();
    let start_date = period.start(now);
    let not_sold = NOT_SOLD.map(|status| status.as_str());

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let sales: SalesRow = shop_orders::table
        .filter(shop_orders::shop_id.eq(shop_id))
        .filter(shop_orders::created_at.ge(start_date))
        .filter(shop_orders::status.ne_all(not_sold))
        .select((
            count_star(),
            sum(shop_orders::final_amount),
            avg(shop_orders::final_amount),
            sum(shop_orders::total_discount),
        ))
        .get_result(conn)
        .await
        .context("Failed to summarize sales")?;

    let items: Vec<InventoryItemEntity> = inventory_items::table
        .filter(inventory_items::shop_id.eq(shop_id))
        .select(InventoryItemEntity::as_select())
        .load(conn)
        .await
        .context("Failed to load inventory")?;

    let by_category: Vec<(String, Option<i64>, Option<f64>)> = shop_order_items::table
        .inner_join(shop_orders::table)
        .filter(shop_orders::shop_id.eq(shop_id))
        .filter(shop_orders::created_at.ge(start_date))
        .filter(shop_orders::status.ne_all(not_sold))
        .group_by(shop_order_items::category)
        .select((
            shop_order_items::category,
            sum(shop_order_items::quantity),
            sum(shop_order_items::total_amount),
        ))
        .load(conn)
        .await
        .context("Failed to summarize sales by category")?;

    Ok(StdResponse {
        data: Some(ShopStatsRes {
            sales: SalesSummary::from_row(sales),
            inventory: InventorySummary::from_items(&items, now.date_naive()),
            top_categories: top_categories(by_category),
            period,
            start_date,
            end_date: now,
        }),
        message: Some("Shop statistics retrieved successfully"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(quantity: i32, unit_price: f32, expiry_date: Option<NaiveDate>) -> InventoryItemEntity {
        InventoryItemEntity {
            id: 1,
            shop_id: 2,
            name: "Paracetamol 500mg".into(),
            category: "Analgesic".into(),
            unit_price,
            quantity,
            minimum_quantity: 10,
            expiry_date,
            created_at: DateTime::UNIX_EPOCH,
            updated_at: DateTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_inventory_summary() {
        let today = NaiveDate::from_ymd_opt(2026, 10, 17).unwrap();
        let items = [
            item(40, 2.5, None),
            item(4, 85.0, NaiveDate::from_ymd_opt(2027, 1, 1)),
            item(12, 10.0, NaiveDate::from_ymd_opt(2026, 9, 30)),
        ];
        let summary = InventorySummary::from_items(&items, today);
        assert_eq!(
            summary,
            InventorySummary {
                total_products: 3,
                total_stock: 56,
                low_stock_items: 1,
                expired_items: 1,
                total_stock_value: 560.0,
            }
        );
        assert_eq!(InventorySummary::from_items(&[], today), InventorySummary::default());
    }

    #[test]
    fn test_sales_summary_without_orders() {
        assert_eq!(SalesSummary::from_row((0, None, None, None)), SalesSummary::default());

        let summary = SalesSummary::from_row((3, Some(370.0), Some(123.333333), Some(12.5)));
        assert_eq!(summary.average_order_value, 123.33);
        assert_eq!(summary.total_revenue, 370.0);
    }

    #[test]
    fn test_top_categories_rank_by_revenue() {
        let rows = vec![
            ("Analgesic".to_string(), Some(30), Some(84.0)),
            ("Syrup".to_string(), Some(2), Some(190.4)),
            ("Vitamins".to_string(), Some(5), Some(84.0)),
            ("Antibiotic".to_string(), Some(1), Some(12.0)),
            ("Devices".to_string(), Some(1), Some(900.0)),
            ("Skin care".to_string(), None, None),
        ];
        let top = top_categories(rows);
        let names: Vec<&str> = top.iter().map(|c| c.category.as_str()).collect();
        assert_eq!(names, ["Devices", "Syrup", "Analgesic", "Vitamins", "Antibiotic"]);
        assert_eq!(top[0].quantity, 1);
    }
}
