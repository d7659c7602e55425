use std::sync::{Arc, OnceLock};

use agentflow_auth::{Admission, ApiKeyVerifier, SessionCookieVerifier};
use agentflow_bus::EventBus;
use agentflow_store::Store;

use crate::config::AppConfig;
use crate::insight::InsightScheduler;

/// The process-wide singletons every handler and background worker shares:
/// the store handle, the event bus, and the admission chain. Cheap to
/// clone — every field is an `Arc`.
///
/// `insight_scheduler` is set once after construction (`set_insight_scheduler`)
/// because `InsightScheduler` itself is built from a reference to this
/// `AppState` — a `OnceLock` breaks what would otherwise be a circular
/// construction without introducing an `Option` every caller has to unwrap.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub bus: Arc<EventBus>,
    pub admission: Arc<Admission>,
    pub api_keys: Arc<ApiKeyVerifier>,
    pub sessions: Arc<SessionCookieVerifier>,
    pub config: Arc<AppConfig>,
    pub insight_scheduler: Arc<OnceLock<Arc<InsightScheduler>>>,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: AppConfig) -> Self {
        let api_keys = Arc::new(ApiKeyVerifier::new());
        let sessions = Arc::new(SessionCookieVerifier::new());
        let admission = Arc::new(Admission::new(vec![
            Box::new(clone_api_key_verifier(&api_keys)),
            Box::new(clone_session_cookie_verifier(&sessions)),
        ]));
        Self {
            store,
            bus: Arc::new(EventBus::new()),
            admission,
            api_keys,
            sessions,
            config: Arc::new(config),
            insight_scheduler: Arc::new(OnceLock::new()),
        }
    }

    /// Called once from `commands::serve` after the scheduler is built.
    /// A no-op if called twice (e.g. in a test fixture).
    pub fn set_insight_scheduler(&self, scheduler: Arc<InsightScheduler>) {
        let _ = self.insight_scheduler.set(scheduler);
    }
}

// `Admission` holds verifiers by boxed value; `AppState` also needs direct
// access to issue/revoke keys and sessions. `ArcVerifier` shares the same
// underlying table both ways since `issue`/`revoke` take `&self`.
fn clone_api_key_verifier(verifier: &Arc<ApiKeyVerifier>) -> ArcVerifier<ApiKeyVerifier> {
    ArcVerifier(verifier.clone())
}

fn clone_session_cookie_verifier(
    verifier: &Arc<SessionCookieVerifier>,
) -> ArcVerifier<SessionCookieVerifier> {
    ArcVerifier(verifier.clone())
}

struct ArcVerifier<T>(Arc<T>);

impl<T: agentflow_auth::CredentialVerifier> agentflow_auth::CredentialVerifier for ArcVerifier<T> {
    fn verify(&self, credential: &str) -> Option<agentflow_auth::Principal> {
        self.0.verify(credential)
    }
}
