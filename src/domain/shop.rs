use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::ValidationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ShopType {
    #[default]
    Pharmacy,
    MedicalStore,
    SurgicalStore,
    HerbalStore,
}

impl ShopType {
    pub const ALL: [ShopType; 4] = [
        ShopType::Pharmacy,
        ShopType::MedicalStore,
        ShopType::SurgicalStore,
        ShopType::HerbalStore,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShopType::Pharmacy => "pharmacy",
            ShopType::MedicalStore => "medical_store",
            ShopType::SurgicalStore => "surgical_store",
            ShopType::HerbalStore => "herbal_store",
        }
    }
}

impl fmt::Display for ShopType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShopType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ShopType::ALL
            .into_iter()
            .find(|shop_type| shop_type.as_str() == s)
            .ok_or_else(|| ValidationError(format!("{} is not a valid shop type", s)))
    }
}

/// Licence numbers are stored trimmed and uppercased so lookups ignore case.
pub fn normalize_license_number(value: &str) -> Result<String, ValidationError> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(ValidationError::new("License number is required"));
    }
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shop_type_parsing() {
        assert_eq!("medical_store".parse::<ShopType>(), Ok(ShopType::MedicalStore));
        assert_eq!(
            "clinic".parse::<ShopType>().unwrap_err().0,
            "clinic is not a valid shop type"
        );
        assert_eq!(ShopType::default().as_str(), "pharmacy");
    }

    #[test]
    fn test_license_number() {
        assert_eq!(normalize_license_number(" dl-mh-0042 ").unwrap(), "DL-MH-0042");
        assert!(normalize_license_number("  ").is_err());
    }
}
