use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use diesel::{
    BoolExpressionMethods, ExpressionMethods, PgTextExpressionMethods, QueryDsl, SelectableHelper,
    dsl::{count_star, max},
    pg::Pg,
};
use diesel_async::{AsyncConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::router::OpenApiRouter;

use crate::{
    bookings::{self, BookAppointmentReq, CancelAppointmentReq, CancelledBy},
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::{CurrentUser, HospitalScope},
    },
    domain::{
        ValidationError,
        appointment::{AppointmentStatus, BookedBy},
        hospital,
        pagination::{PageQuery, Paged},
        slots::Slot,
        validation,
    },
    models::{AppointmentEntity, HospitalEntity, UpdateAppointmentEntity},
    schema::{appointments, hospitals},
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_appointments, create_appointment))
        .routes(utoipa_axum::routes!(get_appointment_stats))
        .routes(utoipa_axum::routes!(
            get_appointment,
            update_appointment,
            delete_appointment
        ))
        .routes(utoipa_axum::routes!(cancel_appointment))
        .routes(utoipa_axum::routes!(search_patients))
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct AppointmentListQuery {
    /// One of scheduled, confirmed, completed, cancelled, no_show.
    pub status: Option<String>,
    /// Department index.
    pub department: Option<i32>,
    pub date: Option<NaiveDate>,
    /// Matches patient name, email, phone or confirmation code; at least 2 characters.
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// Validated list filters.
#[derive(Debug, Clone, PartialEq)]
struct AppointmentFilter {
    hospital_id: i32,
    status: Option<AppointmentStatus>,
    department: Option<i32>,
    date: Option<NaiveDate>,
    search: Option<String>,
}

impl AppointmentFilter {
    fn from_query(hospital_id: i32, query: &AppointmentListQuery) -> Result<Self, ValidationError> {
        Ok(Self {
            hospital_id,
            status: query
                .status
                .as_deref()
                .filter(|status| !status.trim().is_empty())
                .map(|status| status.parse::<AppointmentStatus>())
                .transpose()?,
            department: query.department,
            date: query.date,
            search: validation::search_term(query.search.as_deref())?,
        })
    }

    fn apply(&self) -> appointments::BoxedQuery<'static, Pg> {
        let mut query = appointments::table
            .filter(appointments::hospital_id.eq(self.hospital_id))
            .into_boxed();

        if let Some(status) = self.status {
            query = query.filter(appointments::status.eq(status.as_str()));
        }
        if let Some(department) = self.department {
            query = query.filter(appointments::department_index.eq(department));
        }
        if let Some(date) = self.date {
            query = query.filter(appointments::appointment_date.eq(date));
        }
        if let Some(search) = &self.search {
            let pattern = validation::like_pattern(search);
            query = query.filter(
                appointments::patient_name
                    .ilike(pattern.clone())
                    .or(appointments::patient_email.ilike(pattern.clone()))
                    .or(appointments::patient_phone.ilike(pattern.clone()))
                    .or(appointments::confirmation_code.ilike(pattern)),
            );
        }
        query
    }
}

/// List the hospital's appointments, newest date first.
#[utoipa::path(
    get,
    path = "/appointments",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(AppointmentListQuery),
    responses(
        (status = 200, description = "A page of appointments", body = StdResponse<Paged<AppointmentEntity>, String>),
        (status = 400, description = "Invalid filter")
    )
)]
async fn get_appointments(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Query(query): Query<AppointmentListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let filter = AppointmentFilter::from_query(hospital_id, &query)?;
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
        .context("Failed to count appointments")?;

    let items: Vec<AppointmentEntity> = filter
        .apply()
        .order((appointments::appointment_date.desc(), appointments::slot.asc()))
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

#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatsPeriod {
    Today,
    Week,
    #[default]
    Month,
    Year,
}

impl StatsPeriod {
    /// Start of the window ending at `now`.
    pub fn start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            StatsPeriod::Today => now
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|midnight| midnight.and_utc())
                .unwrap_or(now),
            StatsPeriod::Week => now - Duration::days(7),
            StatsPeriod::Month => now.checked_sub_months(Months::new(1)).unwrap_or(now),
            StatsPeriod::Year => now
                .with_year(now.year() - 1)
                .or_else(|| now.checked_sub_months(Months::new(12)))
                .unwrap_or(now),
        }
    }
}

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct StatsQuery {
    /// today, week, month (default) or year.
    pub period: Option<StatsPeriod>,
}

#[derive(Serialize, ToSchema, Debug, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub total: i64,
    pub scheduled: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub cancelled: i64,
    pub no_show: i64,
}

impl StatusSummary {
    /// Rows with a status outside the known set only count towards `total`.
    pub fn from_counts(counts: &[(String, i64)]) -> Self {
        let mut summary = StatusSummary::default();
        for (status, count) in counts {
            summary.total += count;
            match status.parse() {
                Ok(AppointmentStatus::Scheduled) => summary.scheduled += count,
                Ok(AppointmentStatus::Confirmed) => summary.confirmed += count,
                Ok(AppointmentStatus::Completed) => summary.completed += count,
                Ok(AppointmentStatus::Cancelled) => summary.cancelled += count,
                Ok(AppointmentStatus::NoShow) => summary.no_show += count,
                Err(_) => {}
            }
        }
        summary
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct DepartmentCount {
    pub department_index: i32,
    /// `None` when the department no longer exists.
    pub department: Option<String>,
    pub count: i64,
}

#[derive(Serialize, ToSchema)]
pub struct AppointmentStatsRes {
    pub summary: StatusSummary,
    pub department_breakdown: Vec<DepartmentCount>,
    /// Scheduled or confirmed appointments in the next 7 days.
    pub upcoming_appointments: i64,
    pub period: StatsPeriod,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
}

/// Appointment counts for appointments created within the period.
#[utoipa::path(
    get,
    path = "/appointments/stats",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(StatsQuery),
    responses(
        (status = 200, description = "Appointment statistics", body = StdResponse<AppointmentStatsRes, String>)
    )
)]
async fn get_appointment_stats(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let period = query.period.unwrap_or_default();
    let now = Utc::now();
    let start_date = period.start(now);
    let today = now.date_naive();

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let by_status: Vec<(String, i64)> = appointments::table
        .filter(appointments::hospital_id.eq(hospital_id))
        .filter(appointments::created_at.ge(start_date))
        .group_by(appointments::status)
        .select((appointments::status, count_star()))
        .load(conn)
        .await
        .context("Failed to count appointments by status")?;

    let mut by_department: Vec<(i32, i64)> = appointments::table
        .filter(appointments::hospital_id.eq(hospital_id))
        .filter(appointments::created_at.ge(start_date))
        .group_by(appointments::department_index)
        .select((appointments::department_index, count_star()))
        .load(conn)
        .await
        .context("Failed to count appointments by department")?;
    by_department.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));

    let upcoming_appointments: i64 = appointments::table
        .filter(appointments::hospital_id.eq(hospital_id))
        .filter(appointments::status.eq_any([
            AppointmentStatus::Scheduled.as_str(),
            AppointmentStatus::Confirmed.as_str(),
        ]))
        .filter(appointments::appointment_date.between(today, today + Duration::days(7)))
        .count()
        .get_result(conn)
        .await
        .context("Failed to count upcoming appointments")?;

    let services = hospitals::table
        .find(hospital_id)
        .select(HospitalEntity::as_select())
        .first(conn)
        .await?
        .departments()?;

    let department_breakdown = by_department
        .into_iter()
        .map(|(department_index, count)| DepartmentCount {
            department_index,
            department: hospital::find_department(&services, department_index)
                .map(|department| department.category.clone()),
            count,
        })
        .collect();

    Ok(StdResponse {
        data: Some(AppointmentStatsRes {
            summary: StatusSummary::from_counts(&by_status),
            department_breakdown,
            upcoming_appointments,
            period,
            start_date,
            end_date: now,
        }),
        message: Some("Appointment statistics retrieved successfully"),
    })
}

/// Fetch one of the hospital's appointments.
#[utoipa::path(
    get,
    path = "/appointments/{id}",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    responses(
        (status = 200, description = "Appointment", body = StdResponse<AppointmentEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn get_appointment(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment: AppointmentEntity = appointments::table
        .find(id)
        .filter(appointments::hospital_id.eq(hospital_id))
        .select(AppointmentEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment retrieved successfully"),
    })
}

/// Book a slot on behalf of a patient. The hospital is always the admin's own.
#[utoipa::path(
    post,
    path = "/appointments",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    request_body = BookAppointmentReq,
    responses(
        (status = 201, description = "Appointment booked", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Invalid booking"),
        (status = 409, description = "This time slot is already booked")
    )
)]
async fn create_appointment(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Extension(user): Extension<CurrentUser>,
    Json(body): Json<BookAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let request = body.validate(Some(hospital_id))?;

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let appointment =
        bookings::book(conn, request, BookedBy::HospitalStaff, Some(user.id)).await?;

    Ok((
        StatusCode::CREATED,
        StdResponse {
            data: Some(appointment),
            message: Some("Appointment created successfully"),
        },
    ))
}

/// Omitted fields are left unchanged. Send `notes: ""` to clear the notes.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateAppointmentReq {
    pub department_index: Option<i32>,
    pub doctor_index: Option<i32>,
    pub appointment_date: Option<NaiveDate>,
    #[schema(example = "10:30")]
    pub slot: Option<String>,
    pub patient_name: Option<String>,
    pub patient_phone: Option<String>,
    pub patient_email: Option<String>,
    pub notes: Option<String>,
    pub status: Option<AppointmentStatus>,
}

fn build_changes(
    current: AppointmentStatus,
    body: UpdateAppointmentReq,
    now: DateTime<Utc>,
) -> Result<UpdateAppointmentEntity, ValidationError> {
    let patient_name = match body.patient_name {
        Some(name) => {
            let name = validation::required("Patient name", Some(&name))?;
            validation::max_len("Patient name", &name, bookings::MAX_PATIENT_NAME_LEN)?;
            Some(name)
        }
        None => None,
    };
    let patient_phone = body.patient_phone.as_deref().map(validation::phone).transpose()?;
    let patient_email = body.patient_email.as_deref().map(validation::email).transpose()?;
    let notes = body.notes.map(|notes| bookings::validate_notes(Some(notes))).transpose()?;
    let slot = body
        .slot
        .as_deref()
        .map(|raw| Slot::parse(raw).map(|slot| slot.to_string()))
        .transpose()?;

    let next = body.status.map(|next| current.transition_to(next)).transpose()?;
    let newly_cancelled =
        next == Some(AppointmentStatus::Cancelled) && current != AppointmentStatus::Cancelled;

    Ok(UpdateAppointmentEntity {
        department_index: body.department_index,
        doctor_index: body.doctor_index,
        appointment_date: body.appointment_date,
        slot,
        patient_name,
        patient_phone,
        patient_email,
        notes,
        status: next.map(|status| status.as_str().to_string()),
        cancelled_at: newly_cancelled.then_some(now),
        cancelled_by: newly_cancelled.then(|| CancelledBy::Hospital.as_str().to_string()),
    })
}

/// Update contact details, notes or status, or move the appointment to
/// another doctor, date or slot.
#[utoipa::path(
    put,
    path = "/appointments/{id}",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = UpdateAppointmentReq,
    responses(
        (status = 200, description = "Appointment updated", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Invalid change or status transition"),
        (status = 404, description = "Not found"),
        (status = 409, description = "This time slot is already booked")
    )
)]
async fn update_appointment(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Path(id): Path<i32>,
    Json(body): Json<UpdateAppointmentReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let now = Utc::now();
    let appointment = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let appointment: AppointmentEntity = appointments::table
                    .find(id)
                    .filter(appointments::hospital_id.eq(hospital_id))
                    .select(AppointmentEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                let changes = build_changes(appointment.status.parse()?, body, now)?;
                bookings::reschedule(conn, &appointment, changes, now.naive_utc()).await
            })
        })
        .await?;

    info!("Appointment #{} updated ({})", appointment.id, appointment.status);
    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment updated successfully"),
    })
}

/// Cancel an appointment at least 24 hours ahead, freeing its slot.
#[utoipa::path(
    post,
    path = "/appointments/{id}/cancel",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    request_body = CancelAppointmentReq,
    responses(
        (status = 200, description = "Appointment cancelled", body = StdResponse<AppointmentEntity, String>),
        (status = 400, description = "Too late to cancel, or already finished"),
        (status = 404, description = "Not found")
    )
)]
async fn cancel_appointment(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
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
                    .filter(appointments::hospital_id.eq(hospital_id))
                    .select(AppointmentEntity::as_select())
                    .for_update()
                    .first(conn)
                    .await?;

                bookings::cancel(conn, &appointment, CancelledBy::Hospital, body.reason, Utc::now())
                    .await
            })
        })
        .await?;

    Ok(StdResponse {
        data: Some(appointment),
        message: Some("Appointment cancelled successfully"),
    })
}

/// Permanently remove an appointment.
#[utoipa::path(
    delete,
    path = "/appointments/{id}",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(("id" = i32, Path, description = "Appointment ID")),
    responses(
        (status = 200, description = "Appointment deleted", body = StdResponse<AppointmentEntity, String>),
        (status = 404, description = "Not found")
    )
)]
async fn delete_appointment(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Path(id): Path<i32>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let deleted: AppointmentEntity = diesel::delete(
        appointments::table
            .find(id)
            .filter(appointments::hospital_id.eq(hospital_id)),
    )
    .returning(AppointmentEntity::as_returning())
    .get_result(conn)
    .await?;

    info!("Appointment #{} deleted from hospital #{}", deleted.id, hospital_id);
    Ok(StdResponse {
        data: Some(deleted),
        message: Some("Appointment deleted successfully"),
    })
}

const DEFAULT_PATIENT_RESULTS: i64 = 10;
const MAX_PATIENT_RESULTS: i64 = 50;

#[derive(Deserialize, IntoParams, Debug)]
#[into_params(parameter_in = Query)]
pub struct PatientSearchQuery {
    /// Name, email or phone fragment; at least 2 characters.
    pub q: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct PatientSummary {
    pub email: String,
    pub name: Option<String>,
    pub phone: Option<String>,
    pub last_visit: Option<NaiveDate>,
    pub total_visits: i64,
}

/// Distinct patients (by email) who booked at this hospital.
#[utoipa::path(
    get,
    path = "/patients/search",
    tags = ["Hospital appointments"],
    security(("bearerAuth" = [])),
    params(PatientSearchQuery),
    responses(
        (status = 200, description = "Matching patients", body = StdResponse<Vec<PatientSummary>, String>),
        (status = 400, description = "Search query must be at least 2 characters")
    )
)]
async fn search_patients(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Query(query): Query<PatientSearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let term = validation::search_term(query.q.as_deref())?.ok_or_else(|| {
        AppError::BadRequest(format!(
            "Search query must be at least {} characters",
            validation::MIN_SEARCH_LEN
        ))
    })?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PATIENT_RESULTS)
        .clamp(1, MAX_PATIENT_RESULTS);
    let pattern = validation::like_pattern(&term);

    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let rows: Vec<(String, Option<String>, Option<String>, Option<NaiveDate>, i64)> =
        appointments::table
            .filter(appointments::hospital_id.eq(hospital_id))
            .filter(
                appointments::patient_name
                    .ilike(pattern.clone())
                    .or(appointments::patient_email.ilike(pattern.clone()))
                    .or(appointments::patient_phone.ilike(pattern)),
            )
            .group_by(appointments::patient_email)
            .select((
                appointments::patient_email,
                max(appointments::patient_name),
                max(appointments::patient_phone),
                max(appointments::appointment_date),
                count_star(),
            ))
            .order(max(appointments::appointment_date).desc())
            .limit(limit)
            .load(conn)
            .await
            .context("Failed to search patients")?;

    let patients: Vec<PatientSummary> = rows
        .into_iter()
        .map(|(email, name, phone, last_visit, total_visits)| PatientSummary {
            email,
            name,
            phone,
            last_visit,
            total_visits,
        })
        .collect();

    Ok(StdResponse {
        data: Some(patients),
        message: Some("Patient search completed"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 31, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_stats_period_start() {
        let now = noon();
        assert_eq!(
            StatsPeriod::Today.start(now),
            Utc.with_ymd_and_hms(2026, 3, 31, 0, 0, 0).unwrap()
        );
        assert_eq!(StatsPeriod::Week.start(now), now - Duration::days(7));
        // Month arithmetic clamps to the end of a shorter month.
        assert_eq!(
            StatsPeriod::Month.start(now),
            Utc.with_ymd_and_hms(2026, 2, 28, 12, 0, 0).unwrap()
        );
        assert_eq!(
            StatsPeriod::Year.start(now),
            Utc.with_ymd_and_hms(2025, 3, 31, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_status_summary_from_counts() {
        let summary = StatusSummary::from_counts(&[
            ("scheduled".into(), 4),
            ("cancelled".into(), 1),
            ("no_show".into(), 2),
            ("archived".into(), 3),
        ]);
        assert_eq!(
            summary,
            StatusSummary {
                total: 10,
                scheduled: 4,
                confirmed: 0,
                completed: 0,
                cancelled: 1,
                no_show: 2,
            }
        );
    }

    #[test]
    fn test_filter_validation() {
        let query = AppointmentListQuery {
            status: Some("confirmed".into()),
            search: Some("  as ".into()),
            ..Default::default()
        };
        let filter = AppointmentFilter::from_query(3, &query).unwrap();
        assert_eq!(filter.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(filter.search.as_deref(), Some("as"));

        let bad_status = AppointmentListQuery {
            status: Some("pending".into()),
            ..Default::default()
        };
        assert!(AppointmentFilter::from_query(3, &bad_status).is_err());

        let short_search = AppointmentListQuery {
            search: Some("a".into()),
            ..Default::default()
        };
        assert!(AppointmentFilter::from_query(3, &short_search).is_err());
    }

    #[test]
    fn test_build_changes_follows_status_machine() {
        let body = UpdateAppointmentReq {
            status: Some(AppointmentStatus::Confirmed),
            ..Default::default()
        };
        let changes = build_changes(AppointmentStatus::Scheduled, body, noon()).unwrap();
        assert_eq!(changes.status.as_deref(), Some("confirmed"));
        assert_eq!(changes.cancelled_at, None);

        let body = UpdateAppointmentReq {
            status: Some(AppointmentStatus::Scheduled),
            ..Default::default()
        };
        let err = build_changes(AppointmentStatus::Completed, body, noon()).unwrap_err();
        assert_eq!(err.0, "Cannot change appointment status from completed to scheduled");
    }

    #[test]
    fn test_build_changes_records_cancellation() {
        let body = UpdateAppointmentReq {
            status: Some(AppointmentStatus::Cancelled),
            ..Default::default()
        };
        let changes = build_changes(AppointmentStatus::Confirmed, body, noon()).unwrap();
        assert_eq!(changes.cancelled_at, Some(noon()));
        assert_eq!(changes.cancelled_by.as_deref(), Some("hospital"));
    }

    #[test]
    fn test_build_changes_normalizes_fields() {
        let body = UpdateAppointmentReq {
            slot: Some("2:30 pm".into()),
            patient_email: Some("Ravi@Example.COM".into()),
            notes: Some("".into()),
            ..Default::default()
        };
        let changes = build_changes(AppointmentStatus::Scheduled, body, noon()).unwrap();
        assert_eq!(changes.slot.as_deref(), Some("14:30"));
        assert_eq!(changes.patient_email.as_deref(), Some("ravi@example.com"));
        assert_eq!(changes.notes, Some(None));
        assert_eq!(changes.status, None);
    }
}
