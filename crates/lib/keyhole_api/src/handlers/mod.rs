//! Request handlers.

pub mod admin;
pub mod health;
pub mod session;
pub mod setup_code;
pub mod token;
