use std::collections::HashMap;
use std::sync::RwLock;

use crate::{CredentialVerifier, Principal};

/// Stands in for the external identity provider's session-cookie check.
/// Production wiring against a real identity provider is out of scope;
/// this table-backed implementation is enough for server-side bootstrap
/// and for tests to exercise the cookie path without a live provider.
pub struct SessionCookieVerifier {
    sessions: RwLock<HashMap<String, String>>,
}

impl SessionCookieVerifier {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a session token as belonging to `user_id`, as a
    /// successful sign-in would. Public sign-up is disabled, but
    /// server-side creation for invite redemption and test bootstrap is
    /// permitted.
    pub fn create_session(&self, token: &str, user_id: &str) {
        self.sessions
            .write()
            .expect("session table poisoned")
            .insert(token.to_string(), user_id.to_string());
    }

    pub fn revoke_session(&self, token: &str) {
        self.sessions
            .write()
            .expect("session table poisoned")
            .remove(token);
    }
}

impl Default for SessionCookieVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialVerifier for SessionCookieVerifier {
    fn verify(&self, credential: &str) -> Option<Principal> {
        let user_id = self
            .sessions
            .read()
            .expect("session table poisoned")
            .get(credential)
            .cloned()?;
        Some(Principal { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_created_session() {
        let verifier = SessionCookieVerifier::new();
        verifier.create_session("tok-1", "u1");
        let principal = verifier.verify("tok-1").unwrap();
        assert_eq!(principal.user_id, "u1");
    }

    #[test]
    fn unknown_token_is_rejected() {
        let verifier = SessionCookieVerifier::new();
        assert!(verifier.verify("tok-1").is_none());
    }

    #[test]
    fn revoked_session_is_rejected() {
        let verifier = SessionCookieVerifier::new();
        verifier.create_session("tok-1", "u1");
        verifier.revoke_session("tok-1");
        assert!(verifier.verify("tok-1").is_none());
    }
}
