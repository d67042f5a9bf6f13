//! Random identifier generation
//!
//! Every identifier is drawn from the thread-local CSPRNG and hex encoded, so
//! an identifier of `n` characters carries `4n` bits of entropy. Stores still
//! check for a live duplicate before inserting (see [`unique_id`]).

use std::collections::HashMap;

use rand::RngExt;
use tracing::warn;

use crate::constants::{CLIENT_ID_LEN, CLIENT_SECRET_LEN, CODE_LEN, MAX_ID_ATTEMPTS, TOKEN_LEN};
use crate::error::{Error, Result};

/// Hex string of exactly `len` characters. `len` must be even.
fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len / 2];
    rand::rng().fill(bytes.as_mut_slice());
    hex::encode(bytes)
}

pub fn new_client_id() -> String {
    random_hex(CLIENT_ID_LEN)
}

pub fn new_client_secret() -> String {
    random_hex(CLIENT_SECRET_LEN)
}

pub fn new_code_id() -> String {
    random_hex(CODE_LEN)
}

pub fn new_token_id() -> String {
    random_hex(TOKEN_LEN)
}

/// Draw identifiers until one is not already a key of `map`.
///
/// Gives up with [`Error::IdCollision`] after `MAX_ID_ATTEMPTS` draws.
pub(crate) fn unique_id<V>(
    map: &HashMap<String, V>,
    kind: &'static str,
    generate: fn() -> String,
) -> Result<String> {
    for attempt in 1..=MAX_ID_ATTEMPTS {
        let id = generate();
        if !map.contains_key(&id) {
            return Ok(id);
        }
        warn!(kind, attempt, "identifier collision, drawing another");
    }
    Err(Error::IdCollision(kind))
}
