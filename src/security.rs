use anyhow::{Context, Result};
use uuid::Uuid;

use crate::error::SessionError;

/// Parses the configured secret identifier into its 16 raw bytes.
/// Accepts both the hyphenated and the bare-hex UUID forms.
pub fn parse_identifier(text: &str) -> Result<[u8; 16]> {
    let uuid = Uuid::parse_str(text.trim())
        .with_context(|| format!("Invalid secret identifier: {text}"))?;
    Ok(uuid.into_bytes())
}

/// Checks the identifier a client presented against the configured secret.
/// The comparison is plain byte equality.
pub fn verify_identifier(presented: &[u8; 16], secret: &[u8; 16]) -> Result<(), SessionError> {
    if presented == secret {
        Ok(())
    } else {
        Err(SessionError::Auth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET_TEXT: &str = "36a58feb-57c1-4baa-bf49-023ed216fa5b";

    #[test]
    fn parses_hyphenated_identifier() {
        let bytes = parse_identifier(SECRET_TEXT).unwrap();
        assert_eq!(bytes[0], 0x36);
        assert_eq!(bytes[15], 0x5b);
    }

    #[test]
    fn hyphenated_and_bare_forms_are_equivalent() {
        let hyphenated = parse_identifier(SECRET_TEXT).unwrap();
        let bare = parse_identifier("36a58feb57c14baabf49023ed216fa5b").unwrap();
        assert_eq!(hyphenated, bare);
    }

    #[test]
    fn rejects_malformed_identifier() {
        assert!(parse_identifier("not-a-uuid").is_err());
    }

    #[test]
    fn accepts_matching_identifier() {
        let secret = parse_identifier(SECRET_TEXT).unwrap();
        assert!(verify_identifier(&secret, &secret).is_ok());
    }

    #[test]
    fn rejects_identifier_differing_in_last_byte() {
        let secret = parse_identifier(SECRET_TEXT).unwrap();
        let mut presented = secret;
        presented[15] ^= 0x01;
        let err = verify_identifier(&presented, &secret).unwrap_err();
        assert!(matches!(err, SessionError::Auth));
    }
}
