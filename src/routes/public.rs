//! Routes patients use: browsing hospitals and shops needs no account,
//! booking and managing appointments needs a bearer token of any role.

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
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    bookings::{self, BookAppointmentReq, CancelAppointmentReq, CancelledBy},
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{self, CurrentUser},
    },
    domain::{
        appointment::{AppointmentStatus, BookedBy},
        hospital::DoctorRef,
        pagination::{PageQuery, Paged},
        shop::ShopType,
        slots::Weekday,
        validation,
    },
    models::{AppointmentEntity, HospitalEntity, ShopEntity},
    schema::{appointments, hospitals, shops},
};

pub fn routes_with_openapi(state: AppState) -> OpenApiRouter<AppState> {
    OpenApiRouter::new().nest(
        "/public",
        OpenApiRouter::new()
            .routes(utoipa_axum::routes!(get_hospitals))
            .routes(utoipa_axum::routes!(get_hospital))
            .routes(utoipa_axum::routes!(get_available_slots))
            .routes(utoipa_axum::routes!(get_shops))
            .routes(utoipa_axum::routes!(get_shop))
            .merge(
                OpenApiRouter::new()
                    .routes(utoipa_axum::routes!(book_appointment))
                    .routes(utoipa_axum::routes!(get_my_appointments))
                    .routes(utoipa_axum::routes!(cancel_my_appointment))
                    .route_layer(axum::middleware::from_fn_with_state(
                        state,
                        middleware::users_authorization,
                    )),
            ),
    )
}

/// Trimmed, with blanks treated as absent.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct DirectoryQuery {
    pub city: Option<String>,
    /// Name fragment; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn active_hospitals(city: Option<&str>, search: Option<&str>) -> hospitals::BoxedQuery<'static, Pg> {
    let mut query = hospitals::table
        .filter(hospitals::is_active.eq(true))
        .into_boxed();
    if let Some(city) = city {
        query = query.filter(hospitals::city.ilike(validation::like_pattern(city)));
    }
    if let Some(search) = search {
        let pattern = validation::like_pattern(search);
        query = query.filter(
            hospitals::name
                .ilike(pattern.clone())
                .or(hospitals::city.ilike(pattern)),
        );
    }
    query
}

/// Active hospitals, best rated first.
#[utoipa::path(
    get,
    path = "/hospitals",
    tags = ["Public"],
    params(DirectoryQuery),
    responses(
        (status = 200, description = "A page of hospitals", body = StdResponse<Paged<HospitalEntity>, String>)
    )
)]
async fn get_hospitals(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let city = non_blank(query.city.as_deref());
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = active_hospitals(city, search.as_deref())
        .count()
        .get_result(conn)
        .await
        .context("Failed to count hospitals")?;

    let items: Vec<HospitalEntity> = active_hospitals(city, search.as_deref())
        .order((hospitals::rating.desc(), hospitals::name.asc()))
        .limit(page.limit())
        .offset(page.offset())
        .select(HospitalEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get hospitals")?;

    Ok(StdResponse {
        data: Some(Paged {
            items,
            pagination: page.paginate(total),
        }),
        message: Some("Hospitals retrieved successfully"),
    })
}

#[utoipa::path(
    get,
    path = "/hospitals/{id}",
    tags = ["Public"],
    params(("id" = i32, Path, description = "Hospital ID")),
    responses(
        (status = 200, description = "Hospital detail", body = StdResponse<HospitalEntity, String>),
        (status = 404, description = "Not found or inactive")
    )
)]
async fn get_hospital(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let hospital: HospitalEntity = hospitals::table
        .find(id)
        .filter(hospitals::is_active.eq(true))
        .select(HospitalEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Hospital retrieved successfully"),
    })
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct AvailableSlotsQuery {
    /// `YYYY-MM-DD`
    pub date: Option<NaiveDate>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct AvailableSlotsRes {
    pub date: NaiveDate,
    pub day: Weekday,
    /// Offered and still free.
    #[schema(value_type = Vec<String>)]
    pub slots: Vec<String>,
    #[schema(value_type = Vec<String>)]
    pub booked_slots: Vec<String>,
}

/// A doctor's free and taken slots for one day.
#[utoipa::path(
    get,
    path = "/hospitals/{id}/departments/{department}/doctors/{doctor}/available-slots",
    tags = ["Public"],
    params(
        ("id" = i32, Path, description = "Hospital ID"),
        ("department" = i32, Path, description = "Department index"),
        ("doctor" = i32, Path, description = "Doctor index within the department"),
        AvailableSlotsQuery
    ),
    responses(
        (status = 200, description = "Slot board", body = StdResponse<AvailableSlotsRes, String>),
        (status = 400, description = "Missing date or unknown doctor"),
        (status = 404, description = "Hospital not found or inactive")
    )
)]
async fn get_available_slots(
    State(state): State<AppState>,
    Path((id, department, doctor)): Path<(i32, i32, i32)>,
    Query(query): Query<AvailableSlotsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let date = query
        .date
        .ok_or_else(|| AppError::BadRequest("Date is required".into()))?;
    let doctor = DoctorRef {
        department_index: department,
        doctor_index: doctor,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let board = bookings::slot_board(conn, id, doctor, date).await?;

    Ok(StdResponse {
        data: Some(AvailableSlotsRes {
            date,
            day: Weekday::of(date),
            slots: board.slots.iter().map(ToString::to_string).collect(),
            booked_slots: board.booked_slots.iter().map(ToString::to_string).collect(),
        }),
        message: Some("Available slots retrieved successfully"),
    })
}

/// Book a slot as the signed-in user.
#[utoipa::path(
    post,
    path = "/appointments",
    tags = ["Public"],
    security(("bearerAuth" = [])),
    request_body = BookAppointmentReq,
    responses(
        (status = 201, description = "Appointment booked", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Invalid booking"),
        (status = 401, description = "Not signed in"),
        (status = 409, description = "This time slot is already booked")
    )
)]
async fn book_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BookAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.validate(None)?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment = bookings::book(conn, request, BookedBy::Patient, Some(user.id)).await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(appointment),
            message: Some("Appointment booked successfully"),
        },
    ))
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct MyAppointmentsQuery {
    pub status: Option<AppointmentStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn booked_by_user(user_id: i32, status: Option<AppointmentStatus>) -> appointments::BoxedQuery<'static, Pg> {
    let mut query = appointments::table
        .filter(appointments::created_by.eq(user_id))
        .into_boxed();
    if let Some(status) = status {
        query = query.filter(appointments::status.eq(status.as_str()));
    }
    query
}

/// Appointments the caller booked, latest first.
#[utoipa::path(
    get,
    path = "/appointments/my",
    tags = ["Public"],
    security(("bearerAuth" = [])),
    params(MyAppointmentsQuery),
    responses(
        (status = 200, description = "A page of appointments", body = StdResponse<Paged<AppointmentEntity>, String>)
    )
)]
async fn get_my_appointments(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Query(query): Query<MyAppointmentsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = booked_by_user(user.id, query.status)
        .count()
        .get_result(conn)
        .await
        .context("Failed to count appointments")?;

    let items: Vec<AppointmentEntity> = booked_by_user(user.id, query.status)
        .order((
            appointments::appointment_date.desc(),
            appointments::slot.desc(),
        ))
        .limit(page.limit())
        .offset(page.offset())
        .select(AppointmentEntity::as_select())
        .load(conn)
        .await
        .context("Failed to get appointments")?;

    Ok(StdResponse {
        data: Some(Paged {
            items,
            pagination: page.paginate(total),
        }),
        message: Some("Appointments retrieved successfully"),
    })
}

/// Cancel one of the caller's own appointments, at least 24 hours ahead.
#[utoipa::path(
    post,
    path = "/appointments/{id}/cancel",
    tags = ["Public"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = CancelAppointmentReq,
    responses(
        (status = 200, description = "Appointment cancelled", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Too late to cancel, or already finished"),
        (status = 403, description = "Booked by someone else"),
        (status = 404, description = "Not found")
    )
)]
async fn cancel_my_appointment(
    State(state): State<AppState>,
    Extension(user): Extension<CurrentUser>,
    Path(id): Path<i32>,
    Json(body): Json<CancelAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let appointment: AppointmentEntity = appointments::table
                    .find(id)
                    .select(AppointmentEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                if appointment.created_by != Some(user.id) {
                    return Err(AppError::ForbiddenResource(
                        "Not authorized to cancel this appointment".into(),
                    ));
                }

                bookings::cancel(conn, &appointment, CancelledBy::Patient, body.reason, Utc::now())
                    .await
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment cancelled successfully"),
    })
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct ShopDirectoryQuery {
    pub city: Option<String>,
    /// Name fragment; at least 2 characters.
    pub search: Option<String>,
    pub shop_type: Option<ShopType>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn active_shops(
    city: Option<&str>,
    search: Option<&str>,
    shop_type: Option<ShopType>,
) -> shops::BoxedQuery<'static, Pg> {
    let mut query = shops::table.filter(shops::is_active.eq(true)).into_boxed();
    if let Some(city) = city {
        query = query.filter(shops::city.ilike(validation::like_pattern(city)));
    }
    if let Some(search) = search {
        query = query.filter(shops::name.ilike(validation::like_pattern(search)));
    }
    if let Some(shop_type) = shop_type {
        query = query.filter(shops::shop_type.eq(shop_type.as_str()));
    }
    query
}

/// Active shops by name.
#[utoipa::path(
    get,
    path = "/shops",
    tags = ["Public"],
    params(ShopDirectoryQuery),
    responses(
        (status = 200, description = "A page of shops", body = StdResponse<Paged<ShopEntity>, String>)
    )
)]
async fn get_shops(
    State(state): State<AppState>,
    Query(query): Query<ShopDirectoryQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let city = non_blank(query.city.as_deref());
    let shop_type = query.shop_type;
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = active_shops(city, search.as_deref(), shop_type)
        .count()
        .get_result(conn)
        .await
        .context("Failed to count shops")?;

    let items: Vec<ShopEntity> = active_shops(city, search.as_deref(), shop_type)
        .order((shops::name.asc(), shops::id.asc()))
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

#[utoipa::path(
    get,
    path = "/shops/{id}",
    tags = ["Public"],
    params(("id" = i32, Path, description = "Shop ID")),
    responses(
        (status = 200, description = "Shop detail", body = StdResponse<ShopEntity, String>),
        (status = 404, description = "Not found or inactive")
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
        .filter(shops::is_active.eq(true))
        .select(ShopEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(shop),
        message: Some("Shop retrieved successfully"),
    })
}

#[cfg(test)]
mod tests {
    use axum::{Router, http::StatusCode};
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;
    use crate::core::test_support::{body_json, empty_request, json_request, test_state};

    fn app() -> Router {
        let state = test_state();
        let (router, _) = routes_with_openapi(state.clone()).split_for_parts();
        router.with_state(state)
    }

    #[tokio::test]
    async fn test_booking_requires_token() {
        let response = app()
            .oneshot(json_request("POST", "/public/appointments", None, json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["message"], "Not authorized, no token");
    }

    #[tokio::test]
    async fn test_my_appointments_requires_token() {
        let response = app()
            .oneshot(empty_request("GET", "/public/appointments/my", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_available_slots_requires_date() {
        let response = app()
            .oneshot(empty_request(
                "GET",
                "/public/hospitals/1/departments/0/doctors/0/available-slots",
                None,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Date is required");
    }

    #[tokio::test]
    async fn test_short_search_is_rejected() {
        let response = app()
            .oneshot(empty_request("GET", "/public/hospitals?search=a", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["message"],
            "Search query must be at least 2 characters"
        );
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  Pune ")), Some("Pune"));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
