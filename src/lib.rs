pub mod bookings;
pub mod core;
pub mod domain;
pub mod events;
pub mod models;
pub mod relay;
pub mod routes;
pub mod schema;
