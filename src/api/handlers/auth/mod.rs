//! Session and access control: bearer credential issuance and rotation,
//! login throttling, and role/ownership checks.
//!
//! Access tokens are stateless and verified by signature + expiry alone;
//! refresh tokens are tracked server-side by hash so they can be revoked
//! before their natural expiry, and are rotated on every redemption.

pub(crate) mod error;
pub(crate) mod hasher;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod session;
mod state;
mod storage;
mod token;
pub(crate) mod types;
mod utils;

pub use state::{AuthConfig, AuthState};

pub(crate) use storage::principal_from_row;
pub(crate) use utils::is_unique_violation;
