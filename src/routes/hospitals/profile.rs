use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use chrono::Utc;
use diesel::{ExpressionMethods, QueryDsl, SelectableHelper};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;
use utoipa_axum::router::OpenApiRouter;

use crate::{
    core::{
        app_error::{AppError, StdResponse},
        app_state::AppState,
        middleware::HospitalScope,
    },
    domain::{
        ValidationError,
        appointment::AppointmentStatus,
        hospital::{self, Department, Doctor, DoctorRef, OpeningTime},
        profile::HospitalProfile,
        slots::{DayAvailability, normalize_availability},
        validation,
    },
    models::{HospitalEntity, UpdateHospitalProfileEntity},
    schema::{appointments, hospitals},
};

pub fn routes() -> OpenApiRouter<AppState> {
    OpenApiRouter::new()
        .routes(utoipa_axum::routes!(get_profile, update_profile))
        .routes(utoipa_axum::routes!(update_doctor_availability))
}

async fn lock_hospital(
    conn: &mut AsyncPgConnection,
    hospital_id: i32,
) -> Result<HospitalEntity, AppError> {
    Ok(hospitals::table
        .find(hospital_id)
        .select(HospitalEntity::as_select())
        .for_update()
        .first(conn)
        .await?)
}

/// Doctors that scheduled or confirmed appointments from today on still
/// point at.
async fn doctors_with_upcoming_appointments(
    conn: &mut AsyncPgConnection,
    hospital_id: i32,
) -> Result<Vec<DoctorRef>, AppError> {
    let held: Vec<(i32, i32)> = appointments::table
        .filter(appointments::hospital_id.eq(hospital_id))
        .filter(appointments::status.eq_any([
            AppointmentStatus::Scheduled.as_str(),
            AppointmentStatus::Confirmed.as_str(),
        ]))
        .filter(appointments::appointment_date.ge(Utc::now().date_naive()))
        .select((appointments::department_index, appointments::doctor_index))
        .distinct()
        .load(conn)
        .await
        .context("Failed to load upcoming appointments")?;

    Ok(held
        .into_iter()
        .map(|(department_index, doctor_index)| DoctorRef {
            department_index,
            doctor_index,
        })
        .collect())
}

fn displaced_doctors_error(stored: &[Department], displaced: &[DoctorRef]) -> AppError {
    let listed: Vec<String> = displaced
        .iter()
        .map(|doctor| match hospital::doctor_identity(stored, *doctor) {
            Some((category, name)) => format!("{} ({})", name, category),
            None => format!(
                "department #{} doctor #{}",
                doctor.department_index, doctor.doctor_index
            ),
        })
        .collect();
    AppError::Conflict(format!(
        "Cannot remove or move doctors with upcoming appointments: {}",
        listed.join(", ")
    ))
}

/// The admin's hospital.
#[utoipa::path(
    get,
    path = "/profile",
    tags = ["Hospital profile"],
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Hospital profile", body = StdResponse<HospitalEntity, String>)
    )
)]
async fn get_profile(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let hospital: HospitalEntity = hospitals::table
        .find(hospital_id)
        .select(HospitalEntity::as_select())
        .first(conn)
        .await?;

    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Get hospital profile successfully"),
    })
}

/// Omitted fields keep their stored values. `services` replaces the whole
/// department list.
#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct UpdateHospitalProfileReq {
    pub phone: Option<String>,
    pub images: Option<Vec<String>>,
    pub opening_times: Option<Vec<OpeningTime>>,
    #[schema(example = "10:00 PM")]
    pub closing_time: Option<String>,
    pub services: Option<Vec<Department>>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A profile update merged over the stored hospital.
#[derive(Debug, PartialEq)]
struct MergedProfile {
    phone: Option<String>,
    images: Vec<String>,
    opening_times: Vec<OpeningTime>,
    closing_time: Option<String>,
    services: Vec<Department>,
    services_changed: bool,
    latitude: Option<f64>,
    longitude: Option<f64>,
}

fn merge_profile(
    hospital: &HospitalEntity,
    body: UpdateHospitalProfileReq,
) -> Result<MergedProfile, AppError> {
    let phone = body
        .phone
        .as_deref()
        .map(validation::phone)
        .transpose()?;
    let closing_time = match body.closing_time {
        Some(closing_time) => Some(validation::required("Closing time", Some(&closing_time))?),
        None => None,
    };
    let (latitude, longitude) = match (body.latitude, body.longitude) {
        (Some(lat), _) if !(-90.0..=90.0).contains(&lat) => {
            return Err(ValidationError::new("Latitude must be between -90 and 90").into());
        }
        (_, Some(long)) if !(-180.0..=180.0).contains(&long) => {
            return Err(ValidationError::new("Longitude must be between -180 and 180").into());
        }
        (lat, long) => (lat.or(hospital.latitude), long.or(hospital.longitude)),
    };

    let services_changed = body.services.is_some();
    let services = match body.services {
        Some(services) => hospital::normalize_services(services)?,
        None => hospital.departments()?,
    };
    let images = match body.images {
        Some(images) => images,
        None => hospital.image_list()?,
    };
    let opening_times = match body.opening_times {
        Some(opening_times) => opening_times,
        None => hospital.opening_time_list()?,
    };

    Ok(MergedProfile {
        phone,
        images,
        opening_times,
        closing_time,
        services,
        services_changed,
        latitude,
        longitude,
    })
}

/// Update the admin's hospital profile, including departments, doctors and
/// their weekly slots. Removing a doctor who still has upcoming appointments,
/// or shifting one to another position, is refused.
#[utoipa::path(
    put,
    path = "/profile",
    tags = ["Hospital profile"],
    security(("bearerAuth" = [])),
    request_body = UpdateHospitalProfileReq,
    responses(
        (status = 200, description = "Profile updated", body = StdResponse<HospitalEntity, String>),
        (status = 400, description = "Invalid profile"),
        (status = 409, description = "A removed or moved doctor still has upcoming appointments")
    )
)]
async fn update_profile(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Json(body): Json<UpdateHospitalProfileReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let hospital = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let hospital = lock_hospital(conn, hospital_id).await?;
                let merged = merge_profile(&hospital, body)?;

                if merged.services_changed {
                    let stored = hospital.departments()?;
                    let held = doctors_with_upcoming_appointments(conn, hospital_id).await?;
                    let displaced = hospital::displaced_doctors(&stored, &merged.services, held);
                    if !displaced.is_empty() {
                        return Err(displaced_doctors_error(&stored, &displaced));
                    }
                }

                let profile_complete = HospitalProfile {
                    images: &merged.images,
                    opening_times: &merged.opening_times,
                    services: &merged.services,
                    latitude: merged.latitude,
                    longitude: merged.longitude,
                }
                .is_complete();

                let changes = UpdateHospitalProfileEntity {
                    phone: merged.phone,
                    images: serde_json::to_value(&merged.images)
                        .context("Failed to encode images")?,
                    opening_times: serde_json::to_value(&merged.opening_times)
                        .context("Failed to encode opening times")?,
                    closing_time: merged.closing_time,
                    services: serde_json::to_value(&merged.services)
                        .context("Failed to encode services")?,
                    latitude: merged.latitude,
                    longitude: merged.longitude,
                    profile_complete,
                };

                let hospital: HospitalEntity = diesel::update(hospitals::table.find(hospital_id))
                    .set((&changes, hospitals::updated_at.eq(diesel::dsl::now)))
                    .returning(HospitalEntity::as_returning())
                    .get_result(conn)
                    .await
                    .context("Failed to update hospital profile")?;

                Ok::<HospitalEntity, AppError>(hospital)
            })
        })
        .await?;

    info!(
        "Hospital #{} profile updated (complete: {})",
        hospital.id, hospital.profile_complete
    );
    Ok(StdResponse {
        data: Some(hospital),
        message: Some("Hospital profile updated successfully"),
    })
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct UpdateAvailabilityReq {
    pub availability: Vec<DayAvailability>,
}

#[derive(Serialize, ToSchema)]
pub struct DoctorAvailabilityRes {
    pub department_index: i32,
    pub doctor_index: i32,
    pub doctor: Doctor,
}

/// Replace one doctor's weekly slots. Appointments already booked keep
/// their slot even when it is no longer offered.
#[utoipa::path(
    put,
    path = "/departments/{department}/doctors/{doctor}/availability",
    tags = ["Hospital profile"],
    security(("bearerAuth" = [])),
    params(
        ("department" = i32, Path, description = "Department index in the hospital's services"),
        ("doctor" = i32, Path, description = "Doctor index within the department")
    ),
    request_body = UpdateAvailabilityReq,
    responses(
        (status = 200, description = "Availability replaced", body = StdResponse<DoctorAvailabilityRes, String>),
        (status = 404, description = "No such department or doctor")
    )
)]
async fn update_doctor_availability(
    State(state): State<AppState>,
    Extension(HospitalScope(hospital_id)): Extension<HospitalScope>,
    Path((department_index, doctor_index)): Path<(i32, i32)>,
    Json(body): Json<UpdateAvailabilityReq>,
) -> Result<impl IntoResponse, AppError> {
    let conn = &mut state
        .db_pool
        .get()
        .await
        .context("Failed to obtain a DB connection pool")?;

    let doctor_ref = DoctorRef {
        department_index,
        doctor_index,
    };

    let doctor = conn
        .transaction(move |conn| {
            Box::pin(async move {
                let hospital = lock_hospital(conn, hospital_id).await?;
                let mut services = hospital.departments()?;
                let doctor = hospital::find_doctor_mut(&mut services, doctor_ref)
                    .ok_or(AppError::NotFound)?;
                doctor.availability = normalize_availability(body.availability);
                let doctor = doctor.clone();

                diesel::update(hospitals::table.find(hospital_id))
                    .set((
                        hospitals::services
                            .eq(serde_json::to_value(&services).context("Failed to encode services")?),
                        hospitals::updated_at.eq(diesel::dsl::now),
                    ))
                    .execute(conn)
                    .await
                    .context("Failed to update availability")?;

                Ok::<Doctor, AppError>(doctor)
            })
        })
        .await?;

    info!(
        "Availability of doctor {}/{} at hospital #{} replaced",
        department_index, doctor_index, hospital_id
    );
    Ok(StdResponse {
        data: Some(DoctorAvailabilityRes {
            department_index,
            doctor_index,
            doctor,
        }),
        message: Some("Doctor availability updated successfully"),
    })
}

#[cfg(test)]
mod tests {
    use chrono::DateTime;
    use serde_json::json;

    use super::*;
    use crate::domain::slots::{Slot, Weekday};

    fn hospital() -> HospitalEntity {
        let epoch = DateTime::UNIX_EPOCH;
        HospitalEntity {
            id: 1,
            name: "City Care".into(),
            registration_number: None,
            address: "1 Main Road".into(),
            city: "Pune".into(),
            state: "MH".into(),
            pincode: "411001".into(),
            phone: "9876543210".into(),
            email: "care@example.com".into(),
            is_active: true,
            images: json!(["front.jpg"]),
            opening_times: json!([{ "day": "Monday", "time": "9:00 AM" }]),
            closing_time: "10:00 PM".into(),
            services: json!([{
                "category": "Cardiology",
                "description": "Heart care",
                "doctors": [{ "name": "Dr. Rao", "degree": "MD" }]
            }]),
            rating: 0.0,
            reviews_count: 0,
            latitude: Some(18.5),
            longitude: Some(73.8),
            admin_id: None,
            profile_complete: true,
            created_by: None,
            created_at: epoch,
            updated_at: epoch,
        }
    }

    #[test]
    fn test_merge_keeps_stored_values() {
        let merged = merge_profile(&hospital(), UpdateHospitalProfileReq::default()).unwrap();
        assert_eq!(merged.images, vec!["front.jpg".to_string()]);
        assert_eq!(merged.services[0].doctors[0].name, "Dr. Rao");
        assert!(!merged.services_changed);
        assert_eq!(merged.latitude, Some(18.5));
    }

    #[test]
    fn test_merge_normalizes_services() {
        let body = UpdateHospitalProfileReq {
            services: Some(vec![Department {
                category: " Neurology ".into(),
                description: "Brain".into(),
                image: None,
                doctors: vec![Doctor {
                    name: "Dr. Iyer".into(),
                    degree: "DM".into(),
                    image: None,
                    availability: vec![DayAvailability {
                        day: Weekday::Friday,
                        slots: vec![Slot::parse("2:00 PM").unwrap(), Slot::parse("14:00").unwrap()],
                    }],
                }],
            }]),
            ..Default::default()
        };
        let merged = merge_profile(&hospital(), body).unwrap();
        assert!(merged.services_changed);
        assert_eq!(merged.services[0].category, "Neurology");
        assert_eq!(merged.services[0].doctors[0].availability[0].slots.len(), 1);
    }

    #[test]
    fn test_merge_rejects_bad_coordinates() {
        let body = UpdateHospitalProfileReq {
            latitude: Some(120.0),
            ..Default::default()
        };
        assert!(matches!(
            merge_profile(&hospital(), body),
            Err(AppError::BadRequest(m)) if m == "Latitude must be between -90 and 90"
        ));
    }

    #[test]
    fn test_merge_rejects_blank_closing_time() {
        let body = UpdateHospitalProfileReq {
            closing_time: Some("  ".into()),
            ..Default::default()
        };
        assert!(matches!(
            merge_profile(&hospital(), body),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn test_merge_refuses_to_overwrite_malformed_stored_services() {
        let mut stored = hospital();
        stored.services = json!({ "category": "not a list" });

        let err = merge_profile(&stored, UpdateHospitalProfileReq::default()).unwrap_err();
        assert!(matches!(err, AppError::Other(_)));

        // Replacing the services outright does not need the stored ones.
        let body = UpdateHospitalProfileReq {
            services: Some(vec![]),
            ..Default::default()
        };
        assert!(merge_profile(&stored, body).is_ok());
    }

    #[test]
    fn test_displaced_doctors_error_names_doctors() {
        let stored = hospital().departments().unwrap();
        let err = displaced_doctors_error(
            &stored,
            &[
                DoctorRef {
                    department_index: 0,
                    doctor_index: 0,
                },
                DoctorRef {
                    department_index: 0,
                    doctor_index: 2,
                },
            ],
        );
        assert!(matches!(
            err,
            AppError::Conflict(m) if m == "Cannot remove or move doctors with upcoming appointments: Dr. Rao (Cardiology), department #0 doctor #2"
        ));
    }
}
