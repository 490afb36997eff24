// ============================
// crates/backend-lib/src/auth/mod.rs
// ============================
//! Authentication module.
pub mod jwt;
mod service;

pub use jwt::{Claims, JwtVerifier};
pub use service::TokenVerifier;
