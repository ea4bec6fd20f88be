use std::{fmt, str::FromStr};

use chrono::{Duration, NaiveDateTime};
use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ValidationError;

/// Minimum notice required to cancel an appointment.
pub const CANCELLATION_NOTICE_HOURS: i64 = 24;

const CONFIRMATION_CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const CONFIRMATION_CODE_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ALL: [AppointmentStatus; 5] = [
        AppointmentStatus::Scheduled,
        AppointmentStatus::Confirmed,
        AppointmentStatus::Completed,
        AppointmentStatus::Cancelled,
        AppointmentStatus::NoShow,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow
        )
    }

    /// Every status except `cancelled` keeps the slot taken.
    pub fn occupies_slot(&self) -> bool {
        *self != AppointmentStatus::Cancelled
    }

    /// Statuses that still expect the patient to show up.
    pub fn is_active(&self) -> bool {
        matches!(self, AppointmentStatus::Scheduled | AppointmentStatus::Confirmed)
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        use AppointmentStatus::*;

        if *self == next {
            return true;
        }
        match self {
            Scheduled => matches!(next, Confirmed | Completed | Cancelled | NoShow),
            Confirmed => matches!(next, Completed | Cancelled | NoShow),
            Completed | Cancelled | NoShow => false,
        }
    }

    pub fn transition_to(&self, next: AppointmentStatus) -> Result<AppointmentStatus, ValidationError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ValidationError(format!(
                "Cannot change appointment status from {} to {}",
                self, next
            )))
        }
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AppointmentStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ValidationError(format!("{} is not a valid appointment status", s)))
    }
}

/// Who put the appointment on the books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookedBy {
    Patient,
    HospitalStaff,
}

impl BookedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookedBy::Patient => "patient",
            BookedBy::HospitalStaff => "hospital_staff",
        }
    }
}

/// An appointment may be cancelled while it is still active and at least
/// [`CANCELLATION_NOTICE_HOURS`] away.
pub fn can_be_cancelled(status: AppointmentStatus, starts_at: NaiveDateTime, now: NaiveDateTime) -> bool {
    status.is_active() && starts_at - now >= Duration::hours(CANCELLATION_NOTICE_HOURS)
}

pub fn generate_confirmation_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CONFIRMATION_CODE_LEN)
        .map(|_| CONFIRMATION_CODE_CHARSET[rng.gen_range(0..CONFIRMATION_CODE_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use AppointmentStatus::*;

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_round_trips_through_str() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.as_str().parse::<AppointmentStatus>().unwrap(), status);
        }
        assert!("pending".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn test_serde_names_match_db_values() {
        assert_eq!(serde_json::to_string(&NoShow).unwrap(), "\"no_show\"");
        assert_eq!(serde_json::from_str::<AppointmentStatus>("\"confirmed\"").unwrap(), Confirmed);
    }

    #[test]
    fn test_allowed_transitions() {
        assert!(Scheduled.can_transition_to(Confirmed));
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(NoShow));
        assert!(Confirmed.can_transition_to(Cancelled));
    }

    #[test]
    fn test_terminal_states_are_final() {
        for from in [Completed, Cancelled, NoShow] {
            assert!(from.is_terminal());
            for to in AppointmentStatus::ALL.into_iter().filter(|to| *to != from) {
                assert!(!from.can_transition_to(to), "{from} -> {to} should be rejected");
            }
        }
    }

    #[test]
    fn test_confirmed_cannot_go_back() {
        assert!(!Confirmed.can_transition_to(Scheduled));
        let err = Confirmed.transition_to(Scheduled).unwrap_err();
        assert_eq!(err.0, "Cannot change appointment status from confirmed to scheduled");
    }

    #[test]
    fn test_same_status_is_a_no_op() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.transition_to(status), Ok(status));
        }
    }

    #[test]
    fn test_only_cancelled_releases_the_slot() {
        for status in AppointmentStatus::ALL {
            assert_eq!(status.occupies_slot(), status != Cancelled);
        }
    }

    #[test]
    fn test_cancellation_window() {
        let now = at(17, 9);
        assert!(can_be_cancelled(Scheduled, at(18, 9), now));
        assert!(can_be_cancelled(Confirmed, at(20, 9), now));
        assert!(!can_be_cancelled(Scheduled, at(18, 8), now));
        assert!(!can_be_cancelled(Scheduled, at(16, 9), now));
        assert!(!can_be_cancelled(Completed, at(25, 9), now));
        assert!(!can_be_cancelled(Cancelled, at(25, 9), now));
    }

    #[test]
    fn test_confirmation_code_shape() {
        for _ in 0..50 {
            let code = generate_confirmation_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
        }
    }
}
