//! Application state shared by all handlers.

use exam_registration_core::engine::RegistrationEngine;
use exam_registration_core::reconciler::Reconciler;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registration engine
    pub engine: RegistrationEngine,
    /// Payment webhook reconciler over the same engine
    pub reconciler: Reconciler,
    admin_token: Option<Arc<SecretString>>,
}

impl AppState {
    /// Create the state. `admin_token` of `None` disables the admin routes.
    #[must_use]
    pub fn new(
        engine: RegistrationEngine,
        reconciler: Reconciler,
        admin_token: Option<SecretString>,
    ) -> Self {
        let admin_token = admin_token
            .filter(|t| !t.expose_secret().trim().is_empty())
            .map(Arc::new);
        Self {
            engine,
            reconciler,
            admin_token,
        }
    }

    /// Token expected on admin routes, if they are enabled.
    #[must_use]
    pub fn admin_token(&self) -> Option<&SecretString> {
        self.admin_token.as_deref()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("admin_token", &self.admin_token)
            .finish_non_exhaustive()
    }
}
