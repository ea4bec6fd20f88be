use anyhow::Context;
use axum::{extract::State, response::IntoResponse};
use diesel::{ExpressionMethods, QueryDsl, dsl::count_star};
use diesel_async::RunQueryDsl;
use serde::Serialize;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        auth::Role,
    },
    routes::hospitals::appointments::StatusSummary,
    schema::{appointments, hospitals, shops, users},
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new().routes(utoipa_axum::routes!(get_system_stats))
}

#[derive(Serialize, ToSchema, Debug, Default, PartialEq, Eq)]
pub struct UserCounts {
    pub total: i64,
    pub super_admin: i64,
    pub hospital_admin: i64,
    pub shop_admin: i64,
    pub user: i64,
    pub active: i64,
}

impl UserCounts {
    /// Rows with an unknown role only count towards `total`.
    pub fn from_counts(by_role: &[(String, i64)], active: i64) -> Self {
        let mut counts = UserCounts {
            active,
            ..Default::default()
        };
        for (role, count) in by_role {
            counts.total += count;
            match role.parse() {
                Ok(Role::SuperAdmin) => counts.super_admin += count,
                Ok(Role::HospitalAdmin) => counts.hospital_admin += count,
                Ok(Role::ShopAdmin) => counts.shop_admin += count,
                Ok(Role::User) => counts.user += count,
                Err(_) => {}
            }
        }
        counts
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq, Eq)]
pub struct ActiveCount {
    pub total: i64,
    pub active: i64,
}

#[derive(Serialize, ToSchema)]
pub struct SystemStatsRes {
    pub users: UserCounts,
    pub hospitals: ActiveCount,
    pub shops: ActiveCount,
    pub appointments: StatusSummary,
}

/// Platform-wide counts.
#[utoipa::path(
    get,
    path = "/stats",
    tags = ["Admin stats"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "System statistics", body = StdResponse<SystemStatsRes, String>)
    )
)]
async fn get_system_stats(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let by_role: Vec<(String, i64)> = users::table
        .group_by(users::role)
        .select((users::role, count_star()))
        .load(conn)
        .await
        .context("Failed to count users")?;
    let active_users: i64 = users::table
        .filter(users::is_active.eq(true))
        .count()
        .get_result(conn)
        .await
        .context("Failed to count active users")?;

    let hospitals = ActiveCount {
        total: hospitals::table
            .count()
            .get_result(conn)
            .await
            .context("Failed to count hospitals")?,
        active: hospitals::table
            .filter(hospitals::is_active.eq(true))
            .count()
            .get_result(conn)
            .await
            .context("Failed to count active hospitals")?,
    };

    let shops = ActiveCount {
        total: shops::table
            .count()
            .get_result(conn)
            .await
            .context("Failed to count shops")?,
        active: shops::table
            .filter(shops::is_active.eq(true))
            .count()
            .get_result(conn)
            .await
            .context("Failed to count active shops")?,
    };

    let by_status: Vec<(String, i64)> = appointments::table
        .group_by(appointments::status)
        .select((appointments::status, count_star()))
        .load(conn)
        .await
        .context("Failed to count appointments")?;

    Ok(StdResponse {
        data: Some(SystemStatsRes {
            users: UserCounts::from_counts(&by_role, active_users),
            hospitals,
            shops,
            appointments: StatusSummary::from_counts(&by_status),
        }),
        message: Some("System statistics retrieved successfully"),
    })
}
