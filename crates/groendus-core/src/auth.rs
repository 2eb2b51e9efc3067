//! Password authentication against the portal's Cognito user pool.
//!
//! [`SrpAuthSession`] speaks the Cognito JSON 1.1 protocol directly:
//! `InitiateAuth` with `USER_SRP_AUTH`, then `RespondToAuthChallenge` with
//! the `PASSWORD_VERIFIER` claim computed by [`SrpClient`]. Requests are
//! unsigned; the app client has no secret.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::credential::{Clock, Credential, DEFAULT_TTL_SECONDS, SystemClock};
use crate::error::{Error, Result};
use crate::srp::{PasswordVerifierChallenge, SrpClient, format_timestamp};

/// Cognito identity endpoint for the portal's region.
pub const DEFAULT_IDENTITY_URL: &str = "https://cognito-idp.eu-central-1.amazonaws.com/";
/// User pool backing the Athlon driver portal.
pub const USER_POOL_ID: &str = "eu-central-1_8IPEVy8kc";
/// Public app client of the driver portal.
pub const CLIENT_ID: &str = "387nbhei8uvf13f7ck4c5ivaa2";

const AMZ_JSON: &str = "application/x-amz-json-1.1";
const TARGET_PREFIX: &str = "AWSCognitoIdentityProviderService";
const PASSWORD_VERIFIER: &str = "PASSWORD_VERIFIER";
const NEW_PASSWORD_REQUIRED: &str = "NEW_PASSWORD_REQUIRED";

/// Anything that can turn an email and password into a [`Credential`].
///
/// The GraphQL client only depends on this trait, so tests can substitute
/// [`crate::MockAuthenticator`] for the real Cognito exchange.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Run a complete authentication exchange.
    async fn authenticate(&self, email: &str, password: &str) -> Result<Credential>;
}

/// Cognito user pool and app client to authenticate against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPool {
    pub pool_id: String,
    pub client_id: String,
}

impl Default for UserPool {
    fn default() -> Self {
        Self {
            pool_id: USER_POOL_ID.to_string(),
            client_id: CLIENT_ID.to_string(),
        }
    }
}

/// Client metadata the tenant's pre-authentication hook requires on every
/// call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetadata {
    pub client: String,
    pub label: String,
    pub portal_url: String,
}

impl Default for ClientMetadata {
    fn default() -> Self {
        Self {
            client: "Portal".to_string(),
            label: "athlon".to_string(),
            portal_url: "https://athlon.groendus.nl/".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChallengeReply {
    #[serde(default)]
    challenge_name: Option<String>,
    #[serde(default)]
    challenge_parameters: Option<Value>,
    #[serde(default)]
    authentication_result: Option<AuthenticationResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AuthenticationResult {
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Cognito `USER_SRP_AUTH` exchange over HTTPS.
pub struct SrpAuthSession {
    http: reqwest::Client,
    endpoint: String,
    pool: UserPool,
    metadata: ClientMetadata,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SrpAuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SrpAuthSession")
            .field("endpoint", &self.endpoint)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

impl SrpAuthSession {
    /// Create a session against the default endpoint with a per-request
    /// timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: DEFAULT_IDENTITY_URL.to_string(),
            pool: UserPool::default(),
            metadata: ClientMetadata::default(),
            clock: Arc::new(SystemClock),
        })
    }

    /// Use a different identity endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Use a different user pool or app client.
    #[must_use]
    pub fn with_user_pool(mut self, pool: UserPool) -> Self {
        self.pool = pool;
        self
    }

    /// Use a different clock for issue times and SRP timestamps.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    async fn call(&self, operation: &str, body: &Value) -> Result<ChallengeReply> {
        debug!("Cognito {} -> {}", operation, self.endpoint);
        let response = self
            .http
            .post(&self.endpoint)
            .header("X-Amz-Target", format!("{TARGET_PREFIX}.{operation}"))
            .header(CONTENT_TYPE, AMZ_JSON)
            .body(serde_json::to_vec(body).map_err(|e| {
                Error::authentication_with(format!("{operation} request could not be encoded"), e)
            })?)
            .send()
            .await
            .map_err(|e| Error::authentication_with(format!("{operation} request failed"), e))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            Error::authentication_with(format!("{operation} response could not be read"), e)
        })?;
        let payload: Value = serde_json::from_str(&text).map_err(|e| {
            Error::authentication_with(format!("{operation} returned malformed JSON ({status})"), e)
        })?;

        if !status.is_success() {
            return Err(Error::authentication(provider_error(&payload)));
        }

        serde_json::from_value(payload).map_err(|e| {
            Error::authentication_with(format!("{operation} returned an unexpected shape"), e)
        })
    }

    fn credential_from(&self, result: AuthenticationResult) -> Result<Credential> {
        let id_token = result.id_token.filter(|t| !t.is_empty());
        let access_token = result.access_token.filter(|t| !t.is_empty());
        let (Some(id_token), Some(access_token)) = (id_token, access_token) else {
            return Err(Error::authentication("Missing Cognito tokens"));
        };
        let ttl = result.expires_in.unwrap_or(DEFAULT_TTL_SECONDS);
        info!("Authenticated with Cognito, token valid for {}s", ttl);
        Ok(Credential::new(
            id_token,
            access_token,
            result.refresh_token,
            self.clock.now(),
            ttl,
        ))
    }
}

#[async_trait]
impl Authenticator for SrpAuthSession {
    async fn authenticate(&self, email: &str, password: &str) -> Result<Credential> {
        let pool_id = self.pool.pool_id.clone();
        let srp = run_blocking(move || {
            SrpClient::new(&pool_id)
                .map_err(|e| Error::authentication_with("Cannot start SRP exchange", e))
        })
        .await?;

        let init = self
            .call(
                "InitiateAuth",
                &json!({
                    "AuthFlow": "USER_SRP_AUTH",
                    "ClientId": self.pool.client_id,
                    "AuthParameters": {
                        "USERNAME": email,
                        "SRP_A": srp.large_a_hex(),
                    },
                    "ClientMetadata": self.metadata,
                }),
            )
            .await?;

        if init.challenge_name.as_deref() != Some(PASSWORD_VERIFIER) {
            return Err(Error::authentication(format!(
                "Unexpected challenge from InitiateAuth: {}",
                init.challenge_name.as_deref().unwrap_or("none")
            )));
        }
        let challenge: PasswordVerifierChallenge =
            serde_json::from_value(init.challenge_parameters.unwrap_or(Value::Null)).map_err(
                |e| Error::authentication_with("Incomplete PASSWORD_VERIFIER parameters", e),
            )?;

        let timestamp = format_timestamp(self.clock.now())?;
        let password = password.to_owned();
        let responses =
            run_blocking(move || srp.process_challenge(&challenge, &password, &timestamp)).await?;

        let reply = self
            .call(
                "RespondToAuthChallenge",
                &json!({
                    "ClientId": self.pool.client_id,
                    "ChallengeName": PASSWORD_VERIFIER,
                    "ChallengeResponses": responses,
                    "ClientMetadata": self.metadata,
                }),
            )
            .await?;

        if let Some(result) = reply.authentication_result {
            return self.credential_from(result);
        }
        match reply.challenge_name.as_deref() {
            Some(NEW_PASSWORD_REQUIRED) => Err(Error::authentication(
                "Password change required; sign in to the portal once to set a new password",
            )),
            Some(other) => Err(Error::authentication(format!(
                "Unsupported challenge: {other}"
            ))),
            None => Err(Error::authentication("Missing Cognito tokens")),
        }
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::authentication_with("SRP computation did not complete", e))?
}

/// `"<ExceptionName>: <message>"` from a Cognito error body.
fn provider_error(payload: &Value) -> String {
    let kind = payload
        .get("__type")
        .and_then(Value::as_str)
        .map(|t| t.rsplit('#').next().unwrap_or(t))
        .unwrap_or("UnknownError");
    let message = payload
        .get("message")
        .or_else(|| payload.get("Message"))
        .and_then(Value::as_str)
        .unwrap_or("no message");
    format!("{kind}: {message}")
}
