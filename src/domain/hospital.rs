use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{
    ValidationError,
    slots::{DayAvailability, Weekday, normalize_availability},
};

/// A department (service) on a hospital profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Department {
    pub category: String,
    pub description: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Doctor {
    pub name: String,
    pub degree: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub availability: Vec<DayAvailability>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OpeningTime {
    pub day: Weekday,
    pub time: String,
}

/// Appointments point at doctors by position, so these are the coordinates
/// of one doctor inside a hospital's `services`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DoctorRef {
    pub department_index: i32,
    pub doctor_index: i32,
}

pub fn find_department(services: &[Department], department_index: i32) -> Option<&Department> {
    usize::try_from(department_index)
        .ok()
        .and_then(|index| services.get(index))
}

pub fn find_doctor(services: &[Department], doctor: DoctorRef) -> Option<&Doctor> {
    find_department(services, doctor.department_index).and_then(|department| {
        usize::try_from(doctor.doctor_index)
            .ok()
            .and_then(|index| department.doctors.get(index))
    })
}

pub fn find_doctor_mut(services: &mut [Department], doctor: DoctorRef) -> Option<&mut Doctor> {
    let department = usize::try_from(doctor.department_index)
        .ok()
        .and_then(|index| services.get_mut(index))?;
    usize::try_from(doctor.doctor_index)
        .ok()
        .and_then(|index| department.doctors.get_mut(index))
}

/// Trims names, requires the mandatory fields and normalizes every doctor's
/// weekly availability.
pub fn normalize_services(services: Vec<Department>) -> Result<Vec<Department>, ValidationError> {
    services
        .into_iter()
        .enumerate()
        .map(|(department_index, department)| {
            let category = department.category.trim().to_string();
            if category.is_empty() {
                return Err(ValidationError(format!(
                    "Department #{} needs a category",
                    department_index
                )));
            }

            let doctors = department
                .doctors
                .into_iter()
                .enumerate()
                .map(|(doctor_index, doctor)| {
                    let name = doctor.name.trim().to_string();
                    if name.is_empty() {
                        return Err(ValidationError(format!(
                            "Doctor #{} in {} needs a name",
                            doctor_index, category
                        )));
                    }
                    Ok(Doctor {
                        name,
                        degree: doctor.degree.trim().to_string(),
                        image: doctor.image,
                        availability: normalize_availability(doctor.availability),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Department {
                category,
                description: department.description.trim().to_string(),
                image: department.image,
                doctors,
            })
        })
        .collect()
}

/// Department category and doctor name at `doctor`.
pub fn doctor_identity(services: &[Department], doctor: DoctorRef) -> Option<(&str, &str)> {
    let department = find_department(services, doctor.department_index)?;
    let found = find_doctor(services, doctor)?;
    Some((department.category.as_str(), found.name.as_str()))
}

/// Doctors in `held` whose position in `after` no longer holds the doctor
/// it held in `before`. Removing an entry shifts the ones behind it down,
/// so a position that still resolves may now name someone else.
pub fn displaced_doctors(
    before: &[Department],
    after: &[Department],
    held: impl IntoIterator<Item = DoctorRef>,
) -> Vec<DoctorRef> {
    let mut displaced: Vec<DoctorRef> = held
        .into_iter()
        .filter(|doctor| match doctor_identity(after, *doctor) {
            Some(now) => doctor_identity(before, *doctor) != Some(now),
            None => true,
        })
        .collect();
    displaced.sort();
    displaced.dedup();
    displaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::slots::Slot;

    fn doctor(name: &str) -> Doctor {
        Doctor {
            name: name.into(),
            degree: "MBBS".into(),
            image: None,
            availability: vec![],
        }
    }

    fn services() -> Vec<Department> {
        vec![
            Department {
                category: "Cardiology".into(),
                description: "Heart".into(),
                image: None,
                doctors: vec![doctor("Dr. Sarayu"), doctor("Dr. Siddhu")],
            },
            Department {
                category: "Neurology".into(),
                description: "Brain".into(),
                image: None,
                doctors: vec![doctor("Dr. Rishitha")],
            },
        ]
    }

    fn at(department_index: i32, doctor_index: i32) -> DoctorRef {
        DoctorRef {
            department_index,
            doctor_index,
        }
    }

    #[test]
    fn test_find_doctor_by_position() {
        let services = services();
        assert_eq!(find_doctor(&services, at(0, 1)).unwrap().name, "Dr. Siddhu");
        assert_eq!(find_doctor(&services, at(1, 0)).unwrap().name, "Dr. Rishitha");
        assert!(find_doctor(&services, at(1, 1)).is_none());
        assert!(find_doctor(&services, at(2, 0)).is_none());
        assert!(find_doctor(&services, at(-1, 0)).is_none());
    }

    #[test]
    fn test_find_doctor_mut_edits_in_place() {
        let mut services = services();
        find_doctor_mut(&mut services, at(0, 0)).unwrap().degree = "MD".into();
        assert_eq!(services[0].doctors[0].degree, "MD");
    }

    #[test]
    fn test_normalize_services_trims_and_sorts_slots() {
        let mut input = services();
        input[0].category = "  Cardiology ".into();
        input[0].doctors[0].availability = vec![DayAvailability {
            day: Weekday::Monday,
            slots: vec![Slot::parse("11:00").unwrap(), Slot::parse("9:00 AM").unwrap()],
        }];

        let normalized = normalize_services(input).unwrap();
        assert_eq!(normalized[0].category, "Cardiology");
        assert_eq!(
            normalized[0].doctors[0].availability[0].slots,
            vec![Slot::parse("09:00").unwrap(), Slot::parse("11:00").unwrap()]
        );
    }

    #[test]
    fn test_normalize_services_requires_names() {
        let mut input = services();
        input[1].doctors[0].name = "   ".into();
        let err = normalize_services(input).unwrap_err();
        assert_eq!(err.0, "Doctor #0 in Neurology needs a name");

        let mut input = services();
        input[0].category = String::new();
        assert!(normalize_services(input).is_err());
    }

    #[test]
    fn test_displaced_doctors_after_removing_the_last_one() {
        let mut edited = services();
        edited[0].doctors.pop();

        let displaced = displaced_doctors(&services(), &edited, [at(0, 0), at(0, 1), at(0, 1), at(1, 0)]);
        assert_eq!(displaced, vec![at(0, 1)]);
        assert!(displaced_doctors(&services(), &services(), [at(0, 1)]).is_empty());
    }

    #[test]
    fn test_removing_the_first_doctor_displaces_its_appointments() {
        let mut edited = services();
        edited[0].doctors.remove(0);

        // (0, 0) now resolves to Dr. Siddhu, who did not hold it before.
        assert_eq!(find_doctor(&edited, at(0, 0)).unwrap().name, "Dr. Siddhu");
        assert_eq!(displaced_doctors(&services(), &edited, [at(0, 0)]), vec![at(0, 0)]);
        assert_eq!(
            displaced_doctors(&services(), &edited, [at(0, 0), at(0, 1)]),
            vec![at(0, 0), at(0, 1)]
        );
    }

    #[test]
    fn test_removing_the_first_department_displaces_its_appointments() {
        let mut edited = services();
        edited.remove(0);

        assert_eq!(find_doctor(&edited, at(0, 0)).unwrap().name, "Dr. Rishitha");
        assert_eq!(
            displaced_doctors(&services(), &edited, [at(0, 0), at(1, 0)]),
            vec![at(0, 0), at(1, 0)]
        );
    }

    #[test]
    fn test_profile_edits_that_keep_positions_displace_nobody() {
        let mut edited = services();
        edited[0].description = "Cardiac care".into();
        edited[1].doctors[0].degree = "DM".into();
        edited[1].doctors.push(doctor("Dr. Kavya"));

        assert!(displaced_doctors(&services(), &edited, [at(0, 0), at(0, 1), at(1, 0)]).is_empty());
    }

    #[test]
    fn test_renaming_a_held_doctor_counts_as_a_replacement() {
        let mut edited = services();
        edited[0].doctors[1].name = "Dr. Someone Else".into();
        assert_eq!(displaced_doctors(&services(), &edited, [at(0, 1)]), vec![at(0, 1)]);
    }
}
