//! HMAC-SHA256 request signing, grounded in the `HmacSha256 = Hmac<Sha256>`
//! idiom from `ProfessorChill-crypto-com-api/src/prelude.rs`. Per-exchange
//! REST clients differ in which fields get concatenated before signing, but
//! all seven venues named in spec.md §6.2 use this primitive underneath.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SignerError {
    #[error("invalid secret key length")]
    InvalidKeyLength,
}

/// Signs `payload` with `secret`, returning the lowercase hex digest used
/// as the exchange request's signature header/param.
pub fn sign_hex(secret: &str, payload: &str) -> Result<String, SignerError> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignerError::InvalidKeyLength)?;
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_hex_is_deterministic() {
        let a = sign_hex("secret", "payload").unwrap();
        let b = sign_hex("secret", "payload").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sign_hex_differs_per_payload() {
        let a = sign_hex("secret", "payload-a").unwrap();
        let b = sign_hex("secret", "payload-b").unwrap();
        assert_ne!(a, b);
    }
}
