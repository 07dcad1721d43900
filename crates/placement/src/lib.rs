//! Campus placement registry: students, companies, and the registrations linking them.

pub mod config;
pub mod error;
pub mod registry;
pub mod telemetry;
