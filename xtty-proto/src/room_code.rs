//! Room codes: the short shared secret two peers use to find each other.
//!
//! Generated codes avoid visually ambiguous characters (`I`, `O`, `0`, `1`)
//! so they can be read aloud or copied by hand.

use rand::Rng;

/// Characters a generated room code is drawn from.
pub const ROOM_CODE_ALPHABET: &[u8; 32] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a generated room code.
pub const ROOM_CODE_LEN: usize = 6;

/// Longest room code the relay accepts.
pub const MAX_ROOM_CODE_LEN: usize = 64;

/// Reasons a room code is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomCodeError {
    /// The code is empty after trimming.
    #[error("room code is empty")]
    Empty,
    /// The code exceeds [`MAX_ROOM_CODE_LEN`] characters.
    #[error("room code is {0} characters, limit is {MAX_ROOM_CODE_LEN}")]
    TooLong(usize),
}

/// Generates a fresh room code.
///
/// Each character is drawn uniformly from [`ROOM_CODE_ALPHABET`] using the
/// thread-local CSPRNG.
#[must_use]
pub fn generate() -> String {
    let mut rng = rand::rng();
    (0..ROOM_CODE_LEN)
        .map(|_| char::from(ROOM_CODE_ALPHABET[rng.random_range(0..ROOM_CODE_ALPHABET.len())]))
        .collect()
}

/// Trims surrounding whitespace and checks the length bounds.
///
/// Any non-empty code is accepted, not only ones this module generates, so
/// peers may agree on a code out of band.
///
/// # Errors
///
/// Returns [`RoomCodeError`] if the code is empty or too long.
pub fn normalize(code: &str) -> Result<&str, RoomCodeError> {
    let code = code.trim();
    let len = code.chars().count();
    if len == 0 {
        return Err(RoomCodeError::Empty);
    }
    if len > MAX_ROOM_CODE_LEN {
        return Err(RoomCodeError::TooLong(len));
    }
    Ok(code)
}
