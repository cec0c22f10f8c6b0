//! PKCE (RFC 7636) verifier and S256 challenge for the desktop login flow.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// 32 random bytes, base64url encoded (43 characters).
    pub fn generate() -> Self {
        let random_bytes: [u8; 32] = rand::thread_rng().gen();
        Self(URL_SAFE_NO_PAD.encode(random_bytes))
    }

    pub fn from_string(verifier: String) -> Self {
        Self(verifier)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn challenge(&self) -> PkceChallenge {
        let hash = Sha256::digest(self.0.as_bytes());
        PkceChallenge(URL_SAFE_NO_PAD.encode(hash))
    }
}

#[derive(Debug, Clone)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    pub const METHOD: &'static str = "S256";

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Opaque anti-CSRF value echoed back by the authorization redirect.
pub fn random_state() -> String {
    let random_bytes: [u8; 16] = rand::thread_rng().gen();
    URL_SAFE_NO_PAD.encode(random_bytes)
}
