//! Adapter Types
//!
//! Configuration, token, profile and grant definitions shared by every flow.

pub mod auth;
pub mod config;
pub mod profile;
pub mod token;

pub use auth::*;
pub use config::*;
pub use profile::*;
pub use token::*;
