use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng, RngCore};
use sha2::{Digest, Sha256};

/// PKCE code verifier and challenge pair (RFC 7636, S256).
#[derive(Debug, Clone)]
pub struct PkcePair {
    verifier: String,
    challenge: String,
}

impl PkcePair {
    /// Create a new random verifier/challenge pair.
    pub fn generate() -> Self {
        Self::from_verifier(&generate_verifier())
    }

    /// Derive the challenge for an externally supplied verifier.
    pub fn from_verifier(verifier: &str) -> Self {
        Self {
            verifier: verifier.to_owned(),
            challenge: generate_challenge(verifier),
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

/// Random opaque value suitable for the OAuth2 `state` parameter.
pub fn random_state(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn generate_verifier() -> String {
    const BYTE_LEN: usize = 32;
    let mut bytes = [0u8; BYTE_LEN];
    thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn generate_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
