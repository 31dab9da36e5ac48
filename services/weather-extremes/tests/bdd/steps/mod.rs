//! BDD step definitions for the weather extremes service

pub mod admin_steps;
pub mod import_steps;
pub mod tracking_steps;
