//! Request middleware and extractors.

pub mod api_key;
pub mod client;
