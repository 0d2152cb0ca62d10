//! Domain layer for the trialnet engine
//!
//! Core models, error taxonomy and the port traits external collaborators
//! implement.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{DomainError, DomainResult};
