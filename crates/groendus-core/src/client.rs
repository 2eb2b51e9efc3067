//! Authenticated GraphQL client for the portal's AppSync endpoint.
//!
//! The client owns the current [`Credential`]. Callers holding a fresh
//! credential never contend; a stale or missing credential is renewed under
//! a single refresh lock, so concurrent callers trigger exactly one
//! authentication exchange between them.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use groendus_types::{Driver, TransactionPage};

use crate::auth::Authenticator;
use crate::credential::{Clock, Credential, SystemClock};
use crate::error::{Error, Result};
use crate::queries;
use crate::traits::{ChargingApi, PageRequest};

/// AppSync GraphQL endpoint of the driver portal.
pub const DEFAULT_GRAPHQL_URL: &str =
    "https://kylqo4g6gres3lmw4rtqaoftke.appsync-api.eu-central-1.amazonaws.com/graphql";

/// Per-request network timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const AUTHORIZATION_MARKERS: &[&str] = &[
    "unauthorized",
    "notauthorized",
    "not authorized",
    "token has expired",
    "token is expired",
    "expired token",
];

/// Transport settings for [`GraphQlClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub graphql_url: String,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            graphql_url: DEFAULT_GRAPHQL_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

enum Attempt {
    Data(Value),
    Unauthorized(Value),
}

/// GraphQL client that authenticates transparently.
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    email: String,
    password: String,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
    credential: RwLock<Option<Credential>>,
    refresh_lock: Mutex<()>,
}

impl std::fmt::Debug for GraphQlClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphQlClient")
            .field("endpoint", &self.endpoint)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl GraphQlClient {
    /// Create a client for the default endpoint.
    pub fn new(
        email: impl Into<String>,
        password: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self> {
        Self::with_options(email, password, authenticator, ClientOptions::default())
    }

    /// Create a client with explicit transport settings.
    pub fn with_options(
        email: impl Into<String>,
        password: impl Into<String>,
        authenticator: Arc<dyn Authenticator>,
        options: ClientOptions,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .build()?;
        Ok(Self {
            http,
            endpoint: options.graphql_url,
            email: email.into(),
            password: password.into(),
            authenticator,
            clock: Arc::new(SystemClock),
            credential: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        })
    }

    /// Use a different clock to age credentials.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether a credential is currently held (fresh or not).
    pub async fn has_credential(&self) -> bool {
        self.credential.read().await.is_some()
    }

    /// Run a query and return its `data` object.
    ///
    /// Authenticates first when no fresh credential is held. An
    /// authorization failure on the first attempt discards the credential
    /// and retries once; a second one fails with [`Error::Api`].
    pub async fn execute(&self, query: &str, variables: Option<Value>) -> Result<Value> {
        let mut retried = false;
        loop {
            let credential = self.valid_credential().await?;
            match self.send(query, variables.as_ref(), &credential).await? {
                Attempt::Data(data) => return Ok(data),
                Attempt::Unauthorized(_) if !retried => {
                    warn!("Portal rejected the current token, re-authenticating");
                    self.discard(&credential).await;
                    retried = true;
                }
                Attempt::Unauthorized(payload) => {
                    return Err(Error::api(
                        "Not authorized after re-authentication",
                        payload,
                    ));
                }
            }
        }
    }

    async fn fresh_credential(&self) -> Option<Credential> {
        let now = self.clock.now();
        self.credential
            .read()
            .await
            .as_ref()
            .filter(|c| !c.needs_refresh(now))
            .cloned()
    }

    async fn valid_credential(&self) -> Result<Credential> {
        if let Some(credential) = self.fresh_credential().await {
            return Ok(credential);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(credential) = self.fresh_credential().await {
            return Ok(credential);
        }

        info!("Authenticating with the charging portal");
        let credential = self
            .authenticator
            .authenticate(&self.email, &self.password)
            .await?;
        *self.credential.write().await = Some(credential.clone());
        Ok(credential)
    }

    /// Drop `used` unless it was already replaced by a newer credential.
    async fn discard(&self, used: &Credential) {
        let mut slot = self.credential.write().await;
        if slot.as_ref() == Some(used) {
            *slot = None;
        }
    }

    async fn send(
        &self,
        query: &str,
        variables: Option<&Value>,
        credential: &Credential,
    ) -> Result<Attempt> {
        let mut body = json!({ "query": query });
        if let Some(variables) = variables {
            body["variables"] = variables.clone();
        }
        let token = HeaderValue::from_str(credential.id_token())
            .map_err(|e| Error::authentication_with("Identity token is not a valid header", e))?;

        debug!("POST {}", self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .header(AUTHORIZATION, token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let payload = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Ok(Attempt::Unauthorized(payload));
        }

        let envelope: Value = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                return Err(Error::api(
                    format!("Malformed GraphQL response (HTTP {status}): {e}"),
                    Value::String(text),
                ));
            }
        };

        if let Some(errors) = envelope.get("errors").filter(|e| has_errors(e)) {
            if is_authorization_error(errors) {
                return Ok(Attempt::Unauthorized(errors.clone()));
            }
            return Err(Error::api(
                format!("GraphQL error: {}", summarize_errors(errors)),
                errors.clone(),
            ));
        }

        if !status.is_success() {
            return Err(Error::api(
                format!("GraphQL endpoint returned HTTP {status}"),
                envelope,
            ));
        }

        match envelope.get("data") {
            Some(data @ Value::Object(_)) => Ok(Attempt::Data(data.clone())),
            _ => Ok(Attempt::Data(Value::Object(Map::new()))),
        }
    }
}

#[async_trait]
impl ChargingApi for GraphQlClient {
    async fn fetch_metadata(&self) -> Result<Driver> {
        let data = self.execute(queries::BOOTSTRAP, None).await?;
        decode_field(data, "getDriver")
    }

    async fn list_transactions(&self, request: &PageRequest) -> Result<TransactionPage> {
        if request.page == 0 {
            return Err(Error::invalid_config("page numbers start at 1"));
        }
        let data = self
            .execute(queries::TRANSACTION_LIST_PAGE, Some(request.variables()))
            .await?;
        decode_field(data, "listTransactions")
    }
}

fn decode_field<T: DeserializeOwned + Default>(mut data: Value, field: &str) -> Result<T> {
    match data.get_mut(field).map(Value::take) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value)
            .map_err(|e| Error::api(format!("Malformed {field} payload: {e}"), Value::Null)),
    }
}

fn has_errors(errors: &Value) -> bool {
    match errors {
        Value::Null => false,
        Value::Array(items) => !items.is_empty(),
        _ => true,
    }
}

/// Whether a GraphQL error payload reports a rejected or expired token.
pub fn is_authorization_error(errors: &Value) -> bool {
    match errors {
        Value::Array(items) => items.iter().any(is_authorization_error),
        Value::String(text) => mentions_authorization(text),
        Value::Object(map) => ["errorType", "message", "errorCode"]
            .iter()
            .filter_map(|key| map.get(*key))
            .filter_map(Value::as_str)
            .any(mentions_authorization),
        _ => false,
    }
}

fn mentions_authorization(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    AUTHORIZATION_MARKERS.iter().any(|m| lower.contains(m))
}

fn summarize_errors(errors: &Value) -> String {
    let describe = |e: &Value| match e {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| e.to_string()),
        other => other.to_string(),
    };
    match errors {
        Value::Array(items) => items.iter().map(describe).collect::<Vec<_>>().join("; "),
        other => describe(other),
    }
}
