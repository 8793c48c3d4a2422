//! Room codes: the short ids players type in to join a session.

use rand::Rng;

use crate::{ProtocolError, SessionId};

/// Characters used for generated codes. `0/O` and `1/I` are left out so
/// codes survive being read aloud.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Length of a room code.
pub const CODE_LEN: usize = 6;

/// Generates a fresh random room code.
pub fn generate_session_code() -> SessionId {
    let mut rng = rand::rng();
    let code: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    SessionId(code)
}

/// Accepts exactly six uppercase ASCII letters or digits.
///
/// This is looser than [`CODE_ALPHABET`] on purpose: codes minted by older
/// clients may contain any alphanumeric.
pub fn is_valid_session_code(code: &str) -> bool {
    code.len() == CODE_LEN
        && code
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

/// Renders a code as `ABC-DEF` for display. Codes of any other length are
/// returned unchanged.
pub fn format_session_code(code: &str) -> String {
    if code.len() == CODE_LEN && code.is_ascii() {
        format!("{}-{}", &code[..3], &code[3..])
    } else {
        code.to_owned()
    }
}

/// Normalizes user input: strips everything that is not alphanumeric and
/// uppercases the rest, so `"abc-234 "` becomes `"ABC234"`.
pub fn clean_session_code(input: &str) -> String {
    input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Cleans and validates user input in one step.
///
/// # Errors
/// Returns `ProtocolError::InvalidValue` if the cleaned input is not a
/// valid code.
pub fn parse_session_code(input: &str) -> Result<SessionId, ProtocolError> {
    let cleaned = clean_session_code(input);
    if is_valid_session_code(&cleaned) {
        Ok(SessionId(cleaned))
    } else {
        Err(ProtocolError::InvalidValue(format!(
            "'{input}' is not a valid room code"
        )))
    }
}
