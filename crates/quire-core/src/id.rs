//! External identifiers.
//!
//! An identifier is 24 lowercase hex characters: 8 digits of seconds since
//! the Unix epoch followed by 16 digits of OS randomness. It is generated
//! offline and is never the same thing as a table's internal row number.

use chrono::{DateTime, TimeZone, Utc};
use rand_core::{OsRng, RngCore};

/// Length of every external identifier.
pub const ID_LEN: usize = 24;

/// How many times `create` regenerates an identifier after a collision.
pub const MAX_ID_ATTEMPTS: u32 = 5;

const RANDOM_BYTES: usize = 8;

/// Generate a fresh identifier stamped with the current time.
pub fn generate() -> String { generate_at(Utc::now()) }

/// Generate an identifier whose time prefix is `at`.
pub fn generate_at(at: DateTime<Utc>) -> String {
  // Times outside the u32 range clamp; the random tail keeps them distinct.
  let secs = at.timestamp().clamp(0, i64::from(u32::MAX)) as u32;
  let mut tail = [0u8; RANDOM_BYTES];
  OsRng.fill_bytes(&mut tail);
  format!("{secs:08x}{}", hex::encode(tail))
}

/// Whether `s` has the shape of an external identifier.
pub fn is_valid(s: &str) -> bool {
  s.len() == ID_LEN
    && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Recover the creation second encoded in an identifier.
pub fn timestamp_of(id: &str) -> Option<DateTime<Utc>> {
  if !is_valid(id) {
    return None;
  }
  let secs = u32::from_str_radix(&id[..8], 16).ok()?;
  Utc.timestamp_opt(i64::from(secs), 0).single()
}
