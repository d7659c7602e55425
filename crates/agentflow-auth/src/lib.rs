//! C7 — Auth: credential verification and admission. The
//! identity provider itself is an external collaborator; this
//! crate owns only the `x-api-key` path and the trait boundary a real
//! session-cookie verifier plugs into.

mod api_key;
mod principal;
mod session_cookie;

pub use api_key::ApiKeyVerifier;
pub use principal::Principal;
pub use session_cookie::SessionCookieVerifier;

use thiserror::Error;

/// Prefix every opaque API key must carry.
pub const API_KEY_PREFIX: &str = "agentflow_";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("unauthorized")]
    Unauthorized,
}

/// Something that can turn a request's credentials into a principal.
/// `verify` takes the raw credential string already extracted from the
/// `x-api-key` header or session cookie — extraction is the caller's job
/// so this trait stays transport-agnostic.
pub trait CredentialVerifier: Send + Sync {
    fn verify(&self, credential: &str) -> Option<Principal>;
}

/// Tries each verifier in order; the request is admitted on the first
/// success.
pub struct Admission {
    verifiers: Vec<Box<dyn CredentialVerifier>>,
}

impl Admission {
    pub fn new(verifiers: Vec<Box<dyn CredentialVerifier>>) -> Self {
        Self { verifiers }
    }

    pub fn admit(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        let credential = credential.ok_or(AuthError::Unauthorized)?;
        self.verifiers
            .iter()
            .find_map(|verifier| verifier.verify(credential))
            .ok_or(AuthError::Unauthorized)
    }
}
