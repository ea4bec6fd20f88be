//! Database-free rules shared by the HTTP handlers: slot handling, the
//! appointment and shop order lifecycles, hospital/shop profile checks and
//! input validation.

pub mod appointment;
pub mod hospital;
pub mod inventory;
pub mod order;
pub mod pagination;
pub mod profile;
pub mod shop;
pub mod slots;
pub mod validation;

use thiserror::Error;

/// A request that is well-formed JSON but breaks a business rule.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}
