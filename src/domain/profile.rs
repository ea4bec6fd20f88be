//! Whether a hospital or shop has filled in enough to be publicly listed.

use super::hospital::{Department, OpeningTime};

pub struct HospitalProfile<'a> {
    pub images: &'a [String],
    pub opening_times: &'a [OpeningTime],
    pub services: &'a [Department],
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl HospitalProfile<'_> {
    pub fn is_complete(&self) -> bool {
        !self.images.is_empty()
            && !self.opening_times.is_empty()
            && self.services.iter().any(|department| !department.doctors.is_empty())
            && self.latitude.is_some()
            && self.longitude.is_some()
    }
}

pub struct ShopProfile<'a> {
    pub images: &'a [String],
    pub services: &'a [serde_json::Value],
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub closing_time: Option<&'a str>,
    pub owner_name: Option<&'a str>,
    pub owner_phone: Option<&'a str>,
}

impl ShopProfile<'_> {
    pub fn is_complete(&self) -> bool {
        let filled = |value: Option<&str>| value.is_some_and(|value| !value.trim().is_empty());

        !self.images.is_empty()
            && !self.services.is_empty()
            && self.latitude.is_some()
            && self.longitude.is_some()
            && filled(self.closing_time)
            && filled(self.owner_name)
            && filled(self.owner_phone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{hospital::Doctor, slots::Weekday};

    fn department(doctors: usize) -> Department {
        Department {
            category: "Cardiology".into(),
            description: String::new(),
            image: None,
            doctors: (0..doctors)
                .map(|i| Doctor {
                    name: format!("Dr. {}", i),
                    degree: "MBBS".into(),
                    image: None,
                    availability: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn test_hospital_profile() {
        let images = vec!["front.jpg".to_string()];
        let opening_times = vec![OpeningTime {
            day: Weekday::Monday,
            time: "9:00 AM".into(),
        }];
        let staffed = vec![department(1)];
        let empty = vec![department(0)];

        let complete = HospitalProfile {
            images: &images,
            opening_times: &opening_times,
            services: &staffed,
            latitude: Some(17.38),
            longitude: Some(78.48),
        };
        assert!(complete.is_complete());

        let no_doctors = HospitalProfile {
            services: &empty,
            ..complete
        };
        assert!(!no_doctors.is_complete());

        let no_location = HospitalProfile {
            longitude: None,
            ..complete
        };
        assert!(!no_location.is_complete());
    }

    #[test]
    fn test_shop_profile() {
        let images = vec!["shop.jpg".to_string()];
        let services = vec![serde_json::json!({ "category": "Medicines", "items": [] })];

        let complete = ShopProfile {
            images: &images,
            services: &services,
            latitude: Some(17.38),
            longitude: Some(78.48),
            closing_time: Some("10:00 PM"),
            owner_name: Some("Ravi"),
            owner_phone: Some("9876543210"),
        };
        assert!(complete.is_complete());

        let blank_owner = ShopProfile {
            owner_name: Some("  "),
            ..complete
        };
        assert!(!blank_owner.is_complete());

        let no_images = ShopProfile {
            images: &[],
            ..complete
        };
        assert!(!no_images.is_complete());
    }
}
