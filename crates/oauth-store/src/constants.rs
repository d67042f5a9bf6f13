//! Identifier lengths and code lifetime defaults

use std::time::Duration;

/// Hex characters in a client id
pub const CLIENT_ID_LEN: usize = 16;

/// Hex characters in a client secret
pub const CLIENT_SECRET_LEN: usize = 128;

/// Hex characters in an authorization code
pub const CODE_LEN: usize = 32;

/// Hex characters in an access token
pub const TOKEN_LEN: usize = 64;

/// How long an issued authorization code stays redeemable.
pub const DEFAULT_CODE_TTL: Duration = Duration::from_secs(600); // 10 minutes

/// Fresh identifiers drawn before an insert gives up on a collision.
pub const MAX_ID_ATTEMPTS: usize = 3;
