use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};

use crate::{CredentialVerifier, Principal, API_KEY_PREFIX};

fn fingerprint(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Verifies `x-api-key: agentflow_<token>` headers against a table of
/// hashed keys mapped to a `userId`. Keys are stored as
/// SHA-256 fingerprints, never plaintext.
pub struct ApiKeyVerifier {
    keys: RwLock<HashMap<String, String>>,
}

impl ApiKeyVerifier {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn issue(&self, key: &str, user_id: &str) {
        self.keys
            .write()
            .expect("api key table poisoned")
            .insert(fingerprint(key), user_id.to_string());
    }

    pub fn revoke(&self, key: &str) {
        self.keys
            .write()
            .expect("api key table poisoned")
            .remove(&fingerprint(key));
    }
}

impl Default for ApiKeyVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier for ApiKeyVerifier {
    fn verify(&self, credential: &str) -> Option<Principal> {
        if !credential.starts_with(API_KEY_PREFIX) {
            return None;
        }
        let user_id = self
            .keys
            .read()
            .expect("api key table poisoned")
            .get(&fingerprint(credential))
            .cloned()?;
        Some(Principal { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_prefix() {
        let verifier = ApiKeyVerifier::new();
        verifier.issue("not-prefixed", "u1");
        assert!(verifier.verify("not-prefixed").is_none());
    }

    #[test]
    fn accepts_issued_key() {
        let verifier = ApiKeyVerifier::new();
        verifier.issue("agentflow_abc123", "u1");
        let principal = verifier.verify("agentflow_abc123").unwrap();
        assert_eq!(principal.user_id, "u1");
    }

    #[test]
    fn revoked_key_is_rejected() {
        let verifier = ApiKeyVerifier::new();
        verifier.issue("agentflow_abc123", "u1");
        verifier.revoke("agentflow_abc123");
        assert!(verifier.verify("agentflow_abc123").is_none());
    }
}
