//! Single-flight credential refresh around a reqwest client.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

/// HTTP request timeout. Also bounds a refresh exchange; a timed-out
/// refresh counts as a refresh failure and clears credentials.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Errors from the coordinated client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No credentials cached, or the refresh cycle failed and cleared them
    #[error("not authenticated")]
    Unauthorized,
    /// Transport-level failure
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// Server rejected the call with a non-401 error status
    #[error("server returned {status}: {message}")]
    Api {
        status: StatusCode,
        message: String,
    },
}

/// The client-held credential pair.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

/// Authenticated user as returned by login/registration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponseBody {
    user: UserProfile,
    access_token: String,
    refresh_token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponseBody {
    access_token: String,
    refresh_token: Option<String>,
}

/// Credential slot shared by all clones of the client.
///
/// `generation` increments on every credential change (login, refresh,
/// logout/clear). A request that saw a 401 records the generation it used;
/// if the generation moved by the time it reaches the refresh gate, another
/// task already resolved the cycle and the request just retries.
#[derive(Default)]
struct TokenSlot {
    tokens: Option<Tokens>,
    generation: u64,
}

/// HTTP client with automatic, single-flight credential refresh.
///
/// Clone is cheap; all clones share the credential slot and the refresh
/// gate, so the at-most-one-refresh guarantee holds process-wide.
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: String,
    slot: Arc<Mutex<TokenSlot>>,
    refresh_gate: Arc<AsyncMutex<()>>,
}

impl AuthClient {
    /// Create a client for the given server base URL (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            slot: Arc::new(Mutex::new(TokenSlot::default())),
            refresh_gate: Arc::new(AsyncMutex::new(())),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Snapshot of the cached credential pair, e.g. for persisting across
    /// process restarts.
    pub fn tokens(&self) -> Option<Tokens> {
        self.slot.lock().expect("token slot poisoned").tokens.clone()
    }

    /// Install a previously persisted credential pair.
    pub fn restore(&self, tokens: Tokens) {
        let mut slot = self.slot.lock().expect("token slot poisoned");
        slot.tokens = Some(tokens);
        slot.generation += 1;
    }

    fn clear(&self) {
        let mut slot = self.slot.lock().expect("token slot poisoned");
        slot.tokens = None;
        slot.generation += 1;
    }

    /// Log in and cache the returned credential pair.
    /// Never attaches credentials and never triggers refresh-on-401.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/login"))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        self.install_auth_response(response).await
    }

    /// Register a new account and cache the returned credential pair.
    pub async fn register(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        password: &str,
    ) -> Result<UserProfile, ClientError> {
        let response = self
            .http
            .post(self.url("/auth/register"))
            .json(&serde_json::json!({
                "email": email,
                "firstName": first_name,
                "lastName": last_name,
                "password": password,
            }))
            .send()
            .await?;

        self.install_auth_response(response).await
    }

    async fn install_auth_response(
        &self,
        response: reqwest::Response,
    ) -> Result<UserProfile, ClientError> {
        let response = check_status(response).await?;
        let body: AuthResponseBody = response.json().await?;

        let mut slot = self.slot.lock().expect("token slot poisoned");
        slot.tokens = Some(Tokens {
            access: body.access_token,
            refresh: body.refresh_token,
        });
        slot.generation += 1;

        Ok(body.user)
    }

    /// Log out: best-effort server revocation, then clear local credentials.
    /// Clearing bumps the generation, so an in-flight refresh that completes
    /// afterwards discards its result - logout wins races.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let access = {
            let slot = self.slot.lock().expect("token slot poisoned");
            slot.tokens.as_ref().map(|t| t.access.clone())
        };

        if let Some(access) = access {
            let result = self
                .http
                .post(self.url("/auth/logout"))
                .bearer_auth(&access)
                .send()
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Logout request failed; clearing local credentials anyway");
            }
        }

        self.clear();
        Ok(())
    }

    /// Send an authenticated GET request.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, ClientError> {
        self.send(Method::GET, path, None).await
    }

    /// Send an authenticated request with an optional JSON body.
    ///
    /// On a 401 the request enters the refresh cycle and is retried exactly
    /// once with whatever credential the cycle produced; the retry's
    /// response is returned as-is.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, ClientError> {
        let (access, generation) = {
            let slot = self.slot.lock().expect("token slot poisoned");
            match &slot.tokens {
                Some(t) => (t.access.clone(), slot.generation),
                None => return Err(ClientError::Unauthorized),
            }
        };

        let response = self.dispatch(&method, path, body.as_ref(), &access).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let access = self.refresh_credentials(generation).await?;
        self.dispatch(&method, path, body.as_ref(), &access).await
    }

    async fn dispatch(
        &self,
        method: &Method,
        path: &str,
        body: Option<&serde_json::Value>,
        access: &str,
    ) -> Result<reqwest::Response, ClientError> {
        let mut request = self
            .http
            .request(method.clone(), self.url(path))
            .bearer_auth(access);
        if let Some(body) = body {
            request = request.json(body);
        }
        Ok(request.send().await?)
    }

    /// Resolve a 401 observed at `observed_generation` into a usable access
    /// token, refreshing at most once per expiry event.
    ///
    /// The async mutex is the single-flight mechanism: the first arrival
    /// holds it across the exchange, every later arrival blocks here and
    /// then finds the generation already moved.
    async fn refresh_credentials(&self, observed_generation: u64) -> Result<String, ClientError> {
        let _gate = self.refresh_gate.lock().await;

        let refresh = {
            let slot = self.slot.lock().expect("token slot poisoned");
            if slot.generation != observed_generation {
                // Another task already refreshed (or logged out) while we
                // waited for the gate.
                return match &slot.tokens {
                    Some(t) => Ok(t.access.clone()),
                    None => Err(ClientError::Unauthorized),
                };
            }
            match &slot.tokens {
                Some(t) => t.refresh.clone(),
                None => return Err(ClientError::Unauthorized),
            }
        };

        debug!("Refreshing credentials");

        // The refresh exchange itself must never recurse into refresh-on-401.
        let result = self
            .http
            .post(self.url("/auth/refresh"))
            .bearer_auth(&refresh)
            .send()
            .await;

        let body = match result {
            Ok(response) if response.status().is_success() => {
                response.json::<RefreshResponseBody>().await.ok()
            }
            Ok(_) | Err(_) => None,
        };

        let mut slot = self.slot.lock().expect("token slot poisoned");

        let Some(body) = body else {
            // Refresh failed: clear credentials unless logout already did.
            if slot.generation == observed_generation {
                slot.tokens = None;
                slot.generation += 1;
            }
            return Err(ClientError::Unauthorized);
        };

        if slot.generation != observed_generation {
            // Logout won the race; discard the refresh result.
            return match &slot.tokens {
                Some(t) => Ok(t.access.clone()),
                None => Err(ClientError::Unauthorized),
            };
        }

        if let Some(tokens) = slot.tokens.as_mut() {
            tokens.access = body.access_token.clone();
            // A refresh token is only replaced when the server rotated it;
            // otherwise the previous one stays valid and is kept.
            if let Some(rotated) = body.refresh_token {
                tokens.refresh = rotated;
            }
        }
        slot.generation += 1;

        Ok(body.access_token)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Api { status, message })
}
