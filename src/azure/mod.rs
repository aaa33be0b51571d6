//! Client side of the cloud support API: auth, retry, wire types and calls.

pub mod api_types;
pub mod auth;
pub mod client;
pub mod retry;
pub mod types;

pub use auth::{ClientSecretCredential, TokenCache};
pub use client::SupportClient;
