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
        validation,
    },
    models::{CreateHospitalEntity, HospitalEntity, UpdateHospitalEntity, UserEntity},
    routes::auth::insert_user,
    schema::hospitals,
};

pub const MAX_NAME_LEN: usize = 100;

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_hospitals, create_hospital))
        .routes(utoipa_axum::routes!(get_hospital, update_hospital, delete_hospital))
}

fn map_duplicate(err: DieselError) -> AppError {
    match err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => AppError::Conflict(
            "Hospital with this registration number already exists".into(),
        ),
        err => err.into(),
    }
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct HospitalListQuery {
    pub is_active: Option<bool>,
    pub city: Option<String>,
    /// Name, registration number or email fragment; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

fn filtered(
    is_active: Option<bool>,
    city: Option<&str>,
    search: Option<&str>,
) -> hospitals::BoxedQuery<'static, Pg> {
    let mut query = hospitals::table.into_boxed();
    if let Some(is_active) = is_active {
        query = query.filter(hospitals::is_active.eq(is_active));
    }
    if let Some(city) = city {
        query = query.filter(hospitals::city.ilike(validation::like_pattern(city)));
    }
    if let Some(search) = search {
        let pattern = validation::like_pattern(search);
        query = query.filter(
            hospitals::name
                .ilike(pattern.clone())
                .or(hospitals::registration_number.ilike(pattern.clone()))
                .or(hospitals::email.ilike(pattern)),
        );
    }
    query
}

/// Every hospital, active or not, newest first.
#[utoipa::path(
    get,
    path = "/hospitals",
    tags = ["Admin hospitals"],
    security(("bearerAuth" = [])),
    params(HospitalListQuery),
    responses(
        (status = 200, description = "A page of hospitals", body = StdResponse<Paged<HospitalEntity>, String>)
    )
)]
async fn get_hospitals(
    State(state): State<AppState>,
    Query(query): Query<HospitalListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let search = validation::search_term(query.search.as_deref())?;
    let city = query
        .city
        .as_deref()
        .map(str::trim)
        .filter(|city| !city.is_empty());
    let page = PageQuery {
        page: query.page,
        limit: query.limit,
    };

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let total: i64 = filtered(query.is_active, city, search.as_deref())
        .count()
        .get_result(conn)
        .await
        .context("Failed to count hospitals")?;

    let items: Vec<HospitalEntity> = filtered(query.is_active, city, search.as_deref())
        .order((hospitals::created_at.desc(), hospitals::id.desc()))
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

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CreateHospitalReq {
    pub name: Option<String>,
    pub registration_number: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    /// When present, a hospital admin account is created alongside.
    pub admin: Option<AccountReq>,
}

fn hospital_name(value: Option<&str>) -> Result<String, ValidationError> {
    let name = validation::required("Hospital name", value)?;
    validation::max_len("Hospital name", &name, MAX_NAME_LEN)?;
    Ok(name)
}

fn optional_registration(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

impl CreateHospitalReq {
    fn validate(&self, created_by: i32) -> Result<CreateHospitalEntity, ValidationError> {
        Ok(CreateHospitalEntity {
            name: hospital_name(self.name.as_deref())?,
            registration_number: optional_registration(self.registration_number.as_deref()),
            address: validation::required("Address", self.address.as_deref())?,
            city: validation::required("City", self.city.as_deref())?,
            state: validation::required("State", self.state.as_deref())?,
            pincode: validation::required("Pincode", self.pincode.as_deref())?,
            phone: validation::phone(&validation::required("Phone", self.phone.as_deref())?)?,
            email: validation::email(&validation::required("Email", self.email.as_deref())?)?,
            created_by: Some(created_by),
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct CreatedHospitalRes {
    pub hospital: HospitalEntity,
    pub admin: Option<UserEntity>,
}

/// Register a hospital, optionally with its admin account.
#[utoipa::path(
    post,
    path = "/hospitals",
    tags = ["Admin hospitals"],
    security(("bearerAuth" = [])),
    request_body = CreateHospitalReq,
    responses(
        (status = 201, description = "Hospital registered", body = StdResponse<CreatedHospitalRes, String>),
        (status = 400, description = "Invalid hospital or admin details"),
        (status = 409, description = "Duplicate registration number or admin email")
    )
)]
async fn create_hospital(
    State(state): State<AppState>,
    Extension(acting): Extension<CurrentUser>,
    Json(mut body): Json<CreateHospitalReq>,
) -> Result<impl IntoResponse, AppError> {
    let new_hospital = body.validate(acting.id)?;
    // hospital_id is filled in once the hospital row exists.
    let admin = body
        .admin
        .take()
        .map(|account| account.into_user(Role::HospitalAdmin, AdminScope::None))
        .transpose()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let created = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let mut hospital: HospitalEntity = diesel::insert_into(hospitals::table)
                    .values(new_hospital)
                    .returning(HospitalEntity::as_returning())
                    .get_result(conn)
                    .await
                    .map_err(map_duplicate)?;

                let admin = match admin {
                    Some(mut new_admin) => {
                        new_admin.hospital_id = Some(hospital.id);
                        let admin = insert_user(conn, new_admin).await?;
                        hospital = diesel::update(hospitals::table.find(hospital.id))
                            .set(hospitals::admin_id.eq(admin.id))
                            .returning(HospitalEntity::as_returning())
                            .get_result(conn)
                            .await
                            .context("Failed to assign hospital admin")?;
                        Some(admin)
                    }
                    None => None,
                };

                Ok::<CreatedHospitalRes, AppError>(CreatedHospitalRes { hospital, admin })
            })
        })
        .await?;

    info!(
        "Registered hospital #{} (admin: {:?})",
        created.hospital.id, created.hospital.admin_id
    );
    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(created),
            message: Some("Hospital registered successfully"),
        },
    ))
}

#[utoipa::path(
    get,
    path = "/hospitals/{id}",
    tags = ["Admin hospitals"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Hospital ID")),
    responses(
        (status = 200, description = "Hospital", body = StdResponse<HospitalEntity, String>),
        (status = 404, description = "Not found")
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
        .select(HospitalEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Hospital retrieved successfully"),
    })
}

/// Omitted fields are left unchanged.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateHospitalReq {
    pub name: Option<String>,
    /// An empty string clears the registration number.
    pub registration_number: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub pincode: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: Option<bool>,
}

impl UpdateHospitalReq {
    fn validate(self) -> Result<UpdateHospitalEntity, ValidationError> {
        let required = |label: &str, value: Option<String>| {
            value
                .map(|value| validation::required(label, Some(&value)))
                .transpose()
        };

        Ok(UpdateHospitalEntity {
            name: self
                .name
                .map(|name| hospital_name(Some(&name)))
                .transpose()?,
            registration_number: self
                .registration_number
                .map(|value| optional_registration(Some(&value))),
            address: required("Address", self.address)?,
            city: required("City", self.city)?,
            state: required("State", self.state)?,
            pincode: required("Pincode", self.pincode)?,
            phone: self.phone.as_deref().map(validation::phone).transpose()?,
            email: self.email.as_deref().map(validation::email).transpose()?,
            is_active: self.is_active,
        })
    }
}

#[utoipa::path(
    put,
    path = "/hospitals/{id}",
    tags = ["Admin hospitals"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Hospital ID")),
    request_body = UpdateHospitalReq,
    responses(
        (status = 200, description = "Hospital updated", body = StdResponse<HospitalEntity, String>),
        (status = 400, description = "Invalid hospital"),
        (status = 404, description = "Not found"),
        (status = 409, description = "Duplicate registration number")
    )
)]
async fn update_hospital(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateHospitalReq>,
) -> Result<impl IntoResponse, AppError> {
    let changes = body.validate()?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let hospital: HospitalEntity = diesel::update(hospitals::table.find(id))
        .set((&changes, hospitals::updated_at.eq(diesel::dsl::now)))
        .returning(HospitalEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(map_duplicate)?;

    info!("Hospital #{} updated (active: {})", hospital.id, hospital.is_active);
    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Hospital updated successfully"),
    })
}

/// Delete a hospital together with its appointments.
#[utoipa::path(
    delete,
    path = "/hospitals/{id}",
    tags = ["Admin hospitals"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Hospital ID")),
    responses(
        (status = 200, description = "Hospital deleted", body = StdResponse<HospitalEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn delete_hospital(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let hospital: HospitalEntity = diesel::delete(hospitals::table.find(id))
        .returning(HospitalEntity::as_returning())
        .get_result(conn)
        .await?;

    info!("Deleted hospital #{}", hospital.id);
    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Hospital deleted successfully"),
    })
}
