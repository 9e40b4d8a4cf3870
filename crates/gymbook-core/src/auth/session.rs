use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::credentials::{Credential, PersistedSession};
use crate::api::transport::{HttpRequest, LOGIN_PATH, LOGOUT_PATH};
use crate::api::{ApiError, ErrorKind, RequestPipeline};
use crate::models::UserProfile;

/// Snapshot of the authentication state shown to the UI layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub is_authenticated: bool,
    pub user: Option<UserProfile>,
    pub credential: Option<Credential>,
    pub last_error: Option<ErrorKind>,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    access_token: String,
    user: UserProfile,
}

/// Login, logout and startup restore. The only writer of [`Session`].
pub struct SessionFacade {
    pipeline: RequestPipeline,
    state: RwLock<Session>,
}

impl SessionFacade {
    pub fn new(pipeline: RequestPipeline) -> Self {
        Self {
            pipeline,
            state: RwLock::new(Session::default()),
        }
    }

    /// Authenticate with email and password.
    ///
    /// On failure the session stays unauthenticated and the classified error
    /// is recorded in `last_error`.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, ApiError> {
        match self.authenticate(email, password).await {
            Ok(data) => {
                let credential = Credential::new(data.access_token);
                let store = self.pipeline.store();
                store.set(credential.clone());
                store.save_session(&PersistedSession {
                    user: Some(data.user.clone()),
                    is_authenticated: true,
                });

                info!(user_id = %data.user.id, "Logged in");
                let session = Session {
                    is_authenticated: true,
                    user: Some(data.user),
                    credential: Some(credential),
                    last_error: None,
                };
                *self.state.write() = session.clone();
                Ok(session)
            }
            Err(e) => {
                warn!(error = %e, kind = %e.kind(), "Login failed");
                *self.state.write() = Session {
                    last_error: Some(e.kind()),
                    ..Session::default()
                };
                Err(e)
            }
        }
    }

    async fn authenticate(&self, email: &str, password: &str) -> Result<LoginData, ApiError> {
        let email = email.trim();
        validate_login(email, password)?;

        let request = HttpRequest::post(LOGIN_PATH).json(&LoginRequest { email, password })?;
        self.pipeline
            .execute_json::<LoginData>(request)
            .await
            .map_err(|e| match e {
                ApiError::Unauthorized => {
                    ApiError::InvalidCredentials("Invalid email or password".to_string())
                }
                ApiError::Rejected(message) => ApiError::InvalidCredentials(message),
                other => other,
            })
    }

    /// End the session. Server-side invalidation is best-effort.
    pub async fn logout(&self) {
        let request = HttpRequest::post(LOGOUT_PATH).without_refresh();
        if let Err(e) = self.pipeline.execute(request).await {
            debug!(error = %e, "Server logout failed, clearing local session anyway");
        }

        self.pipeline.store().clear();
        *self.state.write() = Session::default();
        info!("Logged out");
    }

    /// Validate a stored credential at startup with one refresh.
    ///
    /// A credential that cannot be refreshed ends the session silently.
    pub async fn restore_session(&self) -> Session {
        let store = self.pipeline.store();
        if store.load().is_none() {
            debug!("No stored credential, starting unauthenticated");
            *self.state.write() = Session::default();
            return Session::default();
        }

        let user = store.load_session().and_then(|s| s.user);
        let session = match self.pipeline.coordinator().ensure_valid_credential().await {
            Ok(credential) => {
                store.save_session(&PersistedSession {
                    user: user.clone(),
                    is_authenticated: true,
                });
                info!("Stored session restored");
                Session {
                    is_authenticated: true,
                    user,
                    credential: Some(credential),
                    last_error: None,
                }
            }
            Err(e) => {
                // The coordinator has already cleared the store
                debug!(error = %e, "Stored session expired");
                Session::default()
            }
        };

        *self.state.write() = session.clone();
        session
    }

    /// Current session, reconciled with the credential store.
    ///
    /// If the pipeline cleared the credential (failed refresh, 403) the
    /// session is reset here and `last_error` reports `auth`.
    pub fn session(&self) -> Session {
        let current = self.pipeline.store().get();
        let mut state = self.state.write();
        if state.is_authenticated {
            match current {
                Some(credential) => state.credential = Some(credential),
                None => {
                    info!("Credential cleared, session ended");
                    *state = Session {
                        last_error: Some(ErrorKind::Auth),
                        ..Session::default()
                    };
                }
            }
        }
        state.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.session().is_authenticated
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.session().user
    }

    pub fn last_error(&self) -> Option<ErrorKind> {
        self.session().last_error
    }

    /// Notified whenever the credential changes; `None` means "go to login".
    pub fn subscribe(&self) -> watch::Receiver<Option<Credential>> {
        self.pipeline.store().subscribe()
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }
}

fn validate_login(email: &str, password: &str) -> Result<(), ApiError> {
    if email.is_empty() {
        return Err(ApiError::Validation("Email is required".to_string()));
    }
    let valid_email = match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.') && !domain.starts_with('.'),
        None => false,
    };
    if !valid_email {
        return Err(ApiError::Validation("Email address is not valid".to_string()));
    }
    if password.is_empty() {
        return Err(ApiError::Validation("Password is required".to_string()));
    }
    Ok(())
}
