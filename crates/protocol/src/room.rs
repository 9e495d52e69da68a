use std::fmt;

use rand::Rng;

use crate::ProtocolError;

/// Length of a generated room code.
pub const GENERATED_ROOM_CODE_LEN: usize = 6;

/// Minimum length accepted when joining.
pub const MIN_ROOM_CODE_LEN: usize = 3;

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Case-insensitive alphanumeric room identifier, stored uppercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generates a fresh 6-character code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..GENERATED_ROOM_CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalizes and validates user input.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() < MIN_ROOM_CODE_LEN {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "`{code}` is shorter than {MIN_ROOM_CODE_LEN} characters"
            )));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "`{code}` must be alphanumeric"
            )));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_are_valid() {
        for _ in 0..64 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), GENERATED_ROOM_CODE_LEN);
            assert!(
                code.as_str()
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            );
            assert_eq!(RoomCode::parse(code.as_str()).unwrap(), code);
        }
    }

    #[test]
    fn parse_normalizes_case() {
        let code: RoomCode = " ab3d ".parse().unwrap();
        assert_eq!(code.to_string(), "AB3D");
    }

    #[test]
    fn parse_rejects_short_codes() {
        assert!(RoomCode::parse("ab").is_err());
        assert!(RoomCode::parse("abc").is_ok());
    }

    #[test]
    fn parse_rejects_symbols() {
        assert!(matches!(
            RoomCode::parse("ab-cd"),
            Err(ProtocolError::InvalidRoomCode(_))
        ));
    }
}
