//! Booking, rescheduling and cancelling appointments.
//!
//! The slot itself is arbitrated by the `appointments_active_slot_key`
//! partial unique index: two bookings racing for the same doctor, date and
//! slot both pass the availability check, and the second insert fails with a
//! unique violation that surfaces as 409.

use anyhow::Context;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use diesel::{
    ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper, dsl, pg::Pg,
    result::DatabaseErrorKind,
};
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;

use crate::{
    core::{aliases::DieselError, app_error::AppError, outbox},
    domain::{
        ValidationError,
        appointment::{self, AppointmentStatus, BookedBy},
        hospital::{self, Department, DoctorRef},
        slots::{self, Slot, SlotBoard, Weekday},
        validation,
    },
    events::{AppointmentBookedEvent, AppointmentCancelledEvent, AppointmentRescheduledEvent},
    models::{AppointmentEntity, CreateAppointmentEntity, HospitalEntity, UpdateAppointmentEntity},
    schema::{appointments, hospitals},
};

pub const ACTIVE_SLOT_CONSTRAINT: &str = "appointments_active_slot_key";
pub const MAX_NOTES_LEN: usize = 500;
pub const MAX_PATIENT_NAME_LEN: usize = 100;

/// Booking payload. Every field is optional on the wire so a missing one is
/// reported as a 400 naming the field.
#[derive(Deserialize, ToSchema, Debug, Default, Clone)]
pub struct BookAppointmentReq {
    /// Ignored on hospital-admin routes, where the admin's hospital is used.
    pub hospital_id: Option<i32>,
    pub department_index: Option<i32>,
    pub doctor_index: Option<i32>,
    pub appointment_date: Option<NaiveDate>,
    #[schema(example = "09:30")]
    pub slot: Option<String>,
    pub patient_name: Option<String>,
    pub patient_phone: Option<String>,
    pub patient_email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatientContact {
    pub name: String,
    pub phone: String,
    pub email: String,
}

/// A validated booking.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    pub hospital_id: i32,
    pub doctor: DoctorRef,
    pub date: NaiveDate,
    pub slot: Slot,
    pub patient: PatientContact,
    pub notes: Option<String>,
}

impl BookAppointmentReq {
    /// `scoped_hospital` takes precedence over the body's `hospital_id`.
    pub fn validate(self, scoped_hospital: Option<i32>) -> Result<BookingRequest, ValidationError> {
        let hospital_id = scoped_hospital
            .or(self.hospital_id)
            .ok_or_else(|| ValidationError::new("Hospital is required"))?;
        let department_index = self
            .department_index
            .ok_or_else(|| ValidationError::new("Department is required"))?;
        let doctor_index = self
            .doctor_index
            .ok_or_else(|| ValidationError::new("Doctor is required"))?;
        let date = self
            .appointment_date
            .ok_or_else(|| ValidationError::new("Appointment date is required"))?;
        let slot = Slot::parse(&validation::required("Time slot", self.slot.as_deref())?)?;

        let patient = validate_contact(
            self.patient_name.as_deref(),
            self.patient_phone.as_deref(),
            self.patient_email.as_deref(),
        )?;
        let notes = validate_notes(self.notes)?;

        Ok(BookingRequest {
            hospital_id,
            doctor: DoctorRef {
                department_index,
                doctor_index,
            },
            date,
            slot,
            patient,
            notes,
        })
    }
}

pub fn validate_contact(
    name: Option<&str>,
    phone: Option<&str>,
    email: Option<&str>,
) -> Result<PatientContact, ValidationError> {
    let name = validation::required("Patient name", name)?;
    validation::max_len("Patient name", &name, MAX_PATIENT_NAME_LEN)?;
    let phone = validation::phone(&validation::required("Patient phone", phone)?)?;
    let email = validation::email(&validation::required("Patient email", email)?)?;
    Ok(PatientContact { name, phone, email })
}

/// Blank notes are stored as `None`.
pub fn validate_notes(notes: Option<String>) -> Result<Option<String>, ValidationError> {
    match notes.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(notes) => {
            validation::max_len("Notes", notes, MAX_NOTES_LEN)?;
            Ok(Some(notes.to_string()))
        }
    }
}

/// Checks that `slot` on `date` is something the doctor offers and has not
/// already started.
pub fn check_slot(
    services: &[Department],
    doctor: DoctorRef,
    date: NaiveDate,
    slot: Slot,
    now: NaiveDateTime,
) -> Result<(), ValidationError> {
    hospital::find_department(services, doctor.department_index)
        .ok_or_else(|| ValidationError::new("Department not found"))?;
    let found = hospital::find_doctor(services, doctor)
        .ok_or_else(|| ValidationError::new("Doctor not found"))?;

    if date < now.date() || slot.starts_at(date) < now {
        return Err(ValidationError::new("Appointment date cannot be in the past"));
    }

    if !slots::slots_for(&found.availability, date).contains(&slot) {
        return Err(ValidationError(format!(
            "Time slot {} is not available on {:?}s for {}",
            slot,
            Weekday::of(date),
            found.name
        )));
    }

    Ok(())
}

/// Maps a unique violation on the active-slot index to the booking conflict
/// the client refetches on; other errors convert as usual.
pub fn map_slot_conflict(err: DieselError) -> AppError {
    match &err {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info)
            if info.constraint_name() == Some(ACTIVE_SLOT_CONSTRAINT) =>
        {
            warn!("Slot conflict: {}", info.message());
            AppError::Conflict("This time slot is already booked".into())
        }
        _ => err.into(),
    }
}

type ActiveHospital = dsl::ForShare<
    dsl::Select<
        dsl::Filter<dsl::Find<hospitals::table, i32>, dsl::Eq<hospitals::is_active, bool>>,
        dsl::AsSelect<HospitalEntity, Pg>,
    >,
>;

/// Share-locks the hospital row: a booking waits for a profile edit that
/// holds `FOR UPDATE`, and the edit waits for bookings in flight, so a
/// doctor cannot be removed under a booking.
fn active_hospital(hospital_id: i32) -> ActiveHospital {
    hospitals::table
        .find(hospital_id)
        .filter(hospitals::is_active.eq(true))
        .select(HospitalEntity::as_select())
        .for_share()
}

async fn load_active_hospital(
    conn: &mut AsyncPgConnection,
    hospital_id: i32,
) -> Result<HospitalEntity, AppError> {
    active_hospital(hospital_id)
        .first(conn)
        .await
        .optional()
        .context("Failed to load hospital")?
        .ok_or_else(|| AppError::BadRequest("Hospital not found or inactive".into()))
}

/// Books `request` in one transaction and queues the booking notification.
pub async fn book(
    conn: &mut AsyncPgConnection,
    request: BookingRequest,
    booked_by: BookedBy,
    created_by: Option<i32>,
) -> Result<AppointmentEntity, AppError> {
    let now = Utc::now().naive_utc();

    conn.transaction(move |conn| {
        Box::pin(async move {
            let hospital = load_active_hospital(conn, request.hospital_id).await?;
            check_slot(
                &hospital.departments()?,
                request.doctor,
                request.date,
                request.slot,
                now,
            )?;

            let appointment: AppointmentEntity = diesel::insert_into(appointments::table)
                .values(CreateAppointmentEntity {
                    hospital_id: hospital.id,
                    department_index: request.doctor.department_index,
                    doctor_index: request.doctor.doctor_index,
                    appointment_date: request.date,
                    slot: request.slot.to_string(),
                    patient_name: request.patient.name,
                    patient_phone: request.patient.phone,
                    patient_email: request.patient.email,
                    notes: request.notes,
                    status: AppointmentStatus::Scheduled.as_str().into(),
                    confirmation_code: appointment::generate_confirmation_code(),
                    booked_by: booked_by.as_str().into(),
                    created_by,
                })
                .returning(AppointmentEntity::as_returning())
                .get_result(conn)
                .await
                .map_err(map_slot_conflict)?;

            outbox::publish(
                conn,
                AppointmentBookedEvent::EVENT_TYPE.into(),
                AppointmentBookedEvent {
                    appointment_id: appointment.id,
                    hospital_id: appointment.hospital_id,
                    department_index: appointment.department_index,
                    doctor_index: appointment.doctor_index,
                    appointment_date: appointment.appointment_date,
                    slot: appointment.slot.clone(),
                    confirmation_code: appointment.confirmation_code.clone(),
                    patient_name: appointment.patient_name.clone(),
                    patient_email: appointment.patient_email.clone(),
                    booked_by: appointment.booked_by.clone(),
                },
            )
            .await?;

            info!(
                "Appointment #{} booked for hospital #{} on {} at {}",
                appointment.id, appointment.hospital_id, appointment.appointment_date, appointment.slot
            );
            Ok::<AppointmentEntity, AppError>(appointment)
        })
    })
    .await
}

/// Applies `changes` to `appointment`. When the doctor, date or slot moves,
/// the new slot is checked against the doctor's availability and the
/// active-slot index decides any race. Must run inside the caller's
/// transaction, with `appointment` loaded `FOR UPDATE`.
pub async fn reschedule(
    conn: &mut AsyncPgConnection,
    appointment: &AppointmentEntity,
    mut changes: UpdateAppointmentEntity,
    now: NaiveDateTime,
) -> Result<AppointmentEntity, AppError> {
    let current_slot = Slot::parse(&appointment.slot)?;
    let target_doctor = DoctorRef {
        department_index: changes.department_index.unwrap_or(appointment.department_index),
        doctor_index: changes.doctor_index.unwrap_or(appointment.doctor_index),
    };
    let target_date = changes.appointment_date.unwrap_or(appointment.appointment_date);
    let target_slot = match changes.slot.as_deref() {
        Some(raw) => Slot::parse(raw)?,
        None => current_slot,
    };

    let moved = target_doctor
        != DoctorRef {
            department_index: appointment.department_index,
            doctor_index: appointment.doctor_index,
        }
        || target_date != appointment.appointment_date
        || target_slot != current_slot;

    if moved {
        let status: AppointmentStatus = changes
            .status
            .as_deref()
            .unwrap_or(&appointment.status)
            .parse()?;
        if !status.is_active() {
            return Err(AppError::BadRequest(
                "Only scheduled or confirmed appointments can be rescheduled".into(),
            ));
        }

        let hospital = load_active_hospital(conn, appointment.hospital_id).await?;
        check_slot(&hospital.departments()?, target_doctor, target_date, target_slot, now)?;
        changes.slot = Some(target_slot.to_string());
    }

    let updated: AppointmentEntity = diesel::update(appointments::table.find(appointment.id))
        .set((&changes, appointments::updated_at.eq(diesel::dsl::now)))
        .returning(AppointmentEntity::as_returning())
        .get_result(conn)
        .await
        .map_err(map_slot_conflict)?;

    if moved {
        outbox::publish(
            conn,
            AppointmentRescheduledEvent::EVENT_TYPE.into(),
            AppointmentRescheduledEvent {
                appointment_id: updated.id,
                hospital_id: updated.hospital_id,
                previous_date: appointment.appointment_date,
                previous_slot: appointment.slot.clone(),
                appointment_date: updated.appointment_date,
                slot: updated.slot.clone(),
                patient_email: updated.patient_email.clone(),
            },
        )
        .await?;
        info!(
            "Appointment #{} moved from {} {} to {} {}",
            updated.id, appointment.appointment_date, appointment.slot, updated.appointment_date, updated.slot
        );
    }

    Ok(updated)
}

/// Who cancelled, as recorded on the appointment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Hospital,
}

impl CancelledBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancelledBy::Patient => "patient",
            CancelledBy::Hospital => "hospital",
        }
    }

    fn default_reason(&self) -> &'static str {
        match self {
            CancelledBy::Patient => "Cancelled by patient",
            CancelledBy::Hospital => "Cancelled by hospital",
        }
    }
}

#[derive(Deserialize, ToSchema, Debug, Default)]
pub struct CancelAppointmentReq {
    /// At most 500 characters.
    pub reason: Option<String>,
}

/// Soft-cancels `appointment`, freeing its slot. Must run inside the
/// caller's transaction, with `appointment` loaded `FOR UPDATE`.
pub async fn cancel(
    conn: &mut AsyncPgConnection,
    appointment: &AppointmentEntity,
    cancelled_by: CancelledBy,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<AppointmentEntity, AppError> {
    let status: AppointmentStatus = appointment.status.parse()?;
    let starts_at = Slot::parse(&appointment.slot)?.starts_at(appointment.appointment_date);
    if !appointment::can_be_cancelled(status, starts_at, now.naive_utc()) {
        return Err(AppError::BadRequest(
            "Appointment cannot be cancelled (less than 24 hours notice or already completed)"
                .into(),
        ));
    }

    let reason = match reason.as_deref().map(str::trim) {
        None | Some("") => cancelled_by.default_reason().to_string(),
        Some(reason) => {
            validation::max_len("Cancellation reason", reason, MAX_NOTES_LEN)?;
            reason.to_string()
        }
    };

    let cancelled: AppointmentEntity = diesel::update(appointments::table.find(appointment.id))
        .set((
            appointments::status.eq(AppointmentStatus::Cancelled.as_str()),
            appointments::cancelled_at.eq(now),
            appointments::cancelled_by.eq(cancelled_by.as_str()),
            appointments::cancellation_reason.eq(&reason),
            appointments::updated_at.eq(diesel::dsl::now),
        ))
        .returning(AppointmentEntity::as_returning())
        .get_result(conn)
        .await
        .context("Failed to cancel appointment")?;

    outbox::publish(
        conn,
        AppointmentCancelledEvent::EVENT_TYPE.into(),
        AppointmentCancelledEvent {
            appointment_id: cancelled.id,
            hospital_id: cancelled.hospital_id,
            appointment_date: cancelled.appointment_date,
            slot: cancelled.slot.clone(),
            cancelled_by: cancelled_by.as_str().into(),
            reason,
            patient_email: cancelled.patient_email.clone(),
        },
    )
    .await?;

    info!("Appointment #{} cancelled by {}", cancelled.id, cancelled_by.as_str());
    Ok(cancelled)
}

/// The bookable and taken slots of one doctor on `date`.
pub async fn slot_board(
    conn: &mut AsyncPgConnection,
    hospital_id: i32,
    doctor: DoctorRef,
    date: NaiveDate,
) -> Result<SlotBoard, AppError> {
    let hospital: HospitalEntity = hospitals::table
        .find(hospital_id)
        .filter(hospitals::is_active.eq(true))
        .select(HospitalEntity::as_select())
        .first(conn)
        .await
        .optional()
        .context("Failed to load hospital")?
        .ok_or(AppError::NotFound)?;

    let services = hospital.departments()?;
    let found = hospital::find_doctor(&services, doctor)
        .ok_or_else(|| AppError::BadRequest("Doctor not found".into()))?;
    let offered = slots::slots_for(&found.availability, date);

    let taken: Vec<String> = appointments::table
        .filter(appointments::hospital_id.eq(hospital_id))
        .filter(appointments::department_index.eq(doctor.department_index))
        .filter(appointments::doctor_index.eq(doctor.doctor_index))
        .filter(appointments::appointment_date.eq(date))
        .filter(appointments::status.ne(AppointmentStatus::Cancelled.as_str()))
        .select(appointments::slot)
        .load(conn)
        .await
        .context("Failed to load booked slots")?;

    let booked = taken.iter().filter_map(|raw| match Slot::parse(raw) {
        Ok(slot) => Some(slot),
        Err(err) => {
            warn!("Skipping stored slot for hospital #{}: {}", hospital_id, err);
            None
        }
    });

    Ok(SlotBoard::derive(&offered, booked))
}

#[cfg(test)]
mod tests {
    use chrono::NaiveTime;

    use super::*;
    use crate::domain::{
        hospital::Doctor,
        slots::{DayAvailability, Weekday},
    };

    // 2026-10-19 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn at(date: NaiveDate, hh: u32, mm: u32) -> NaiveDateTime {
        date.and_time(NaiveTime::from_hms_opt(hh, mm, 0).unwrap())
    }

    fn services() -> Vec<Department> {
        vec![Department {
            category: "Cardiology".into(),
            description: "Heart care".into(),
            image: None,
            doctors: vec![Doctor {
                name: "Dr. Rao".into(),
                degree: "MD".into(),
                image: None,
                availability: vec![DayAvailability {
                    day: Weekday::Monday,
                    slots: vec![Slot::parse("09:00").unwrap(), Slot::parse("09:30").unwrap()],
                }],
            }],
        }]
    }

    fn rao() -> DoctorRef {
        DoctorRef {
            department_index: 0,
            doctor_index: 0,
        }
    }

    fn full_request() -> BookAppointmentReq {
        BookAppointmentReq {
            hospital_id: Some(3),
            department_index: Some(0),
            doctor_index: Some(0),
            appointment_date: Some(monday()),
            slot: Some("9:30 AM".into()),
            patient_name: Some(" Asha Menon ".into()),
            patient_phone: Some("98765-43210".into()),
            patient_email: Some("Asha@Example.com".into()),
            notes: Some("   ".into()),
        }
    }

    #[test]
    fn test_validate_normalizes_fields() {
        let request = full_request().validate(None).unwrap();
        assert_eq!(request.hospital_id, 3);
        assert_eq!(request.slot.to_string(), "09:30");
        assert_eq!(request.patient.name, "Asha Menon");
        assert_eq!(request.patient.phone, "9876543210");
        assert_eq!(request.patient.email, "asha@example.com");
        assert_eq!(request.notes, None);
    }

    #[test]
    fn test_validate_prefers_scoped_hospital() {
        let request = full_request().validate(Some(9)).unwrap();
        assert_eq!(request.hospital_id, 9);
    }

    #[test]
    fn test_validate_reports_missing_fields() {
        let cases: [(fn(&mut BookAppointmentReq), &str); 8] = [
            (|r| r.hospital_id = None, "Hospital is required"),
            (|r| r.department_index = None, "Department is required"),
            (|r| r.doctor_index = None, "Doctor is required"),
            (|r| r.appointment_date = None, "Appointment date is required"),
            (|r| r.slot = None, "Time slot is required"),
            (|r| r.patient_name = Some(" ".into()), "Patient name is required"),
            (|r| r.patient_phone = None, "Patient phone is required"),
            (|r| r.patient_email = None, "Patient email is required"),
        ];
        for (mutate, message) in cases {
            let mut request = full_request();
            mutate(&mut request);
            assert_eq!(request.validate(None).unwrap_err().0, message);
        }
    }

    #[test]
    fn test_validate_rejects_bad_slot() {
        let mut request = full_request();
        request.slot = Some("25:00".into());
        assert_eq!(
            request.validate(None).unwrap_err().0,
            "\"25:00\" is not a valid time slot"
        );
    }

    #[test]
    fn test_validate_rejects_long_notes() {
        let mut request = full_request();
        request.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
        assert!(request.validate(None).is_err());
    }

    #[test]
    fn test_check_slot_accepts_offered_slot() {
        let now = at(monday(), 8, 0);
        let slot = Slot::parse("09:00").unwrap();
        assert!(check_slot(&services(), rao(), monday(), slot, now).is_ok());
    }

    #[test]
    fn test_check_slot_rejects_unknown_doctor() {
        let now = at(monday(), 8, 0);
        let slot = Slot::parse("09:00").unwrap();
        let unknown = DoctorRef {
            department_index: 0,
            doctor_index: 4,
        };
        assert_eq!(
            check_slot(&services(), unknown, monday(), slot, now).unwrap_err().0,
            "Doctor not found"
        );
        let no_department = DoctorRef {
            department_index: 2,
            doctor_index: 0,
        };
        assert_eq!(
            check_slot(&services(), no_department, monday(), slot, now).unwrap_err().0,
            "Department not found"
        );
    }

    #[test]
    fn test_check_slot_rejects_past() {
        let slot = Slot::parse("09:00").unwrap();
        let later_that_day = at(monday(), 10, 0);
        assert!(check_slot(&services(), rao(), monday(), slot, later_that_day).is_err());

        let next_day = at(monday().succ_opt().unwrap(), 7, 0);
        assert!(check_slot(&services(), rao(), monday(), slot, next_day).is_err());
    }

    #[test]
    fn test_check_slot_rejects_slot_not_offered() {
        let now = at(monday(), 8, 0);
        let off_grid = Slot::parse("10:00").unwrap();
        let err = check_slot(&services(), rao(), monday(), off_grid, now).unwrap_err();
        assert_eq!(err.0, "Time slot 10:00 is not available on Mondays for Dr. Rao");

        let tuesday = monday().succ_opt().unwrap();
        let slot = Slot::parse("09:00").unwrap();
        assert!(check_slot(&services(), rao(), tuesday, slot, now).is_err());
    }

    #[test]
    fn test_map_slot_conflict_passes_other_errors_through() {
        assert!(matches!(map_slot_conflict(DieselError::NotFound), AppError::NotFound));
    }

    #[test]
    fn test_booking_share_locks_the_hospital() {
        let sql = diesel::debug_query::<Pg, _>(&active_hospital(3)).to_string();
        assert!(sql.contains("FOR SHARE"), "{sql}");
        assert!(sql.contains("\"is_active\""), "{sql}");
    }

    #[test]
    fn test_cancelled_by() {
        assert_eq!(CancelledBy::Hospital.as_str(), "hospital");
        assert_eq!(CancelledBy::Patient.default_reason(), "Cancelled by patient");
    }
}
