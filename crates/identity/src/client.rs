//! App-credential client for the identity service.
//!
//! The scheduler authenticates itself by exchanging a signed assertion for a
//! long-lived app access token via the service's challenge–authenticate RPC
//! pair. Every RPC runs inside a retry envelope; exhaustion is fatal for the
//! broker adapter.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use fahrplan_core::config::IdentityConfig;
use fahrplan_funkturm::{BrokerError, CredentialSource};

use crate::error::IdentityError;

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

/// Lifetime of the self-signed assertion presented during authentication.
const ASSERTION_LIFETIME: Duration = Duration::from_secs(10 * 60);

/// Per-attempt bound on identity RPCs.
const RPC_TIMEOUT: Duration = Duration::from_secs(3);

const RPC_RETRY_COUNT: u32 = 5;
const BASE_RETRY_DELAY: Duration = Duration::from_secs(5);

// ── Wire types ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChallengeRequest<'a> {
    app_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChallengeResponse {
    challenge: String,
}

#[derive(Debug, Serialize)]
struct AuthenticateRequest<'a> {
    app_id: &'a str,
    assertion_type: &'a str,
    assertion: String,
}

#[derive(Debug, Deserialize)]
struct AuthenticateResponse {
    access_token: String,
    /// Expiry, seconds since the epoch.
    expires_at: i64,
}

/// Claims of the self-signed assertion exchanged for an app token.
#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    exp: i64,
    nbf: i64,
    iat: i64,
    jti: String,
    /// The challenge returned by the identity service; signing it protects
    /// against assertion replay.
    nonce: String,
}

#[derive(Debug, Clone, Default)]
struct AppToken {
    access_token: String,
    expires_at: Option<DateTime<Utc>>,
}

impl AppToken {
    fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }
}

// ── Client ────────────────────────────────────────────────────

pub struct IdentityClient {
    http: reqwest::Client,
    base_url: String,
    app_id: String,
    signing_key: EncodingKey,
    token: RwLock<AppToken>,
    shutdown: watch::Receiver<bool>,
}

impl IdentityClient {
    /// Build the client from configuration. Reads the app's PEM private key
    /// from the env var named in the config; no network traffic yet.
    pub fn new(
        config: &IdentityConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, IdentityError> {
        let pem = std::env::var(&config.private_key_env).map_err(|_| {
            IdentityError::InvalidPrivateKey(format!(
                "env var {} is unset or empty",
                config.private_key_env
            ))
        })?;
        let signing_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| IdentityError::InvalidPrivateKey(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| IdentityError::Rpc(e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url(),
            app_id: config.app_id.clone(),
            signing_key,
            token: RwLock::new(AppToken::default()),
            shutdown,
        })
    }

    /// Ping the identity service and acquire the initial app token. Called
    /// once at startup, before the broker adapter is constructed.
    pub async fn start(&self) -> Result<(), IdentityError> {
        self.retry_with_backoff(|| self.ping()).await?;
        self.retry_with_backoff(|| self.fetch_app_token()).await?;
        info!("retrieved an app access token from the identity service");
        Ok(())
    }

    /// Current app token, refreshing it first when expired.
    pub async fn access_token(&self) -> Result<String, IdentityError> {
        if self.token.read().await.is_expired() {
            self.retry_with_backoff(|| self.fetch_app_token()).await?;
        }
        Ok(self.token.read().await.access_token.clone())
    }

    /// Whether the cached app token has passed its expiry.
    pub async fn is_token_expired(&self) -> bool {
        self.token.read().await.is_expired()
    }

    /// Force-acquire a fresh app token regardless of cached expiry.
    pub async fn refresh_token(&self) -> Result<(), IdentityError> {
        self.retry_with_backoff(|| self.fetch_app_token()).await
    }

    async fn ping(&self) -> Result<(), IdentityError> {
        self.http
            .get(format!("{}/v1/ping", self.base_url))
            .send()
            .await
            .map_err(|e| IdentityError::Rpc(format!("ping failed: {e}")))?
            .error_for_status()
            .map_err(|e| IdentityError::Rpc(format!("ping failed: {e}")))?;
        Ok(())
    }

    /// One full challenge–authenticate exchange.
    async fn fetch_app_token(&self) -> Result<(), IdentityError> {
        let challenge: ChallengeResponse = self
            .post_json("/v1/app/authentication_challenge", &ChallengeRequest {
                app_id: &self.app_id,
            })
            .await?;

        let assertion = self.signed_assertion(&challenge.challenge)?;

        let auth: AuthenticateResponse = self
            .post_json("/v1/app/authenticate", &AuthenticateRequest {
                app_id: &self.app_id,
                assertion_type: ASSERTION_TYPE,
                assertion,
            })
            .await?;

        let expires_at = Utc
            .timestamp_opt(auth.expires_at, 0)
            .single()
            .ok_or_else(|| IdentityError::Rpc("unparseable token expiry".into()))?;

        *self.token.write().await = AppToken {
            access_token: auth.access_token,
            expires_at: Some(expires_at),
        };
        Ok(())
    }

    /// Construct the RS512 self-assertion: `iss = sub = app_id`, a ten
    /// minute lifetime, a unique `jti`, and the service's challenge nonce.
    fn signed_assertion(&self, challenge: &str) -> Result<String, IdentityError> {
        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.app_id,
            sub: &self.app_id,
            exp: (now + ASSERTION_LIFETIME).timestamp(),
            nbf: now.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            nonce: challenge.to_string(),
        };
        encode(&Header::new(Algorithm::RS512), &claims, &self.signing_key)
            .map_err(|e| IdentityError::Rpc(format!("failed to sign client assertion: {e}")))
    }

    async fn post_json<Req: Serialize, Resp: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp, IdentityError> {
        self.http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| IdentityError::Rpc(format!("{path}: {e}")))?
            .error_for_status()
            .map_err(|e| IdentityError::Rpc(format!("{path}: {e}")))?
            .json()
            .await
            .map_err(|e| IdentityError::Rpc(format!("{path}: {e}")))
    }

    /// Retry an identity RPC with exponential backoff: five attempts spaced
    /// `2^i × 5s` apart, each bounded by the 3-second client timeout, and
    /// cancellation-aware between attempts.
    async fn retry_with_backoff<F, Fut>(&self, operation: F) -> Result<(), IdentityError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), IdentityError>>,
    {
        let mut last_error = String::new();
        for attempt in 0..RPC_RETRY_COUNT {
            match operation().await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    let delay = BASE_RETRY_DELAY * 2u32.pow(attempt);
                    warn!(
                        attempt = attempt + 1,
                        retry_in = ?delay,
                        error = %err,
                        "identity RPC call failed"
                    );
                    last_error = err.to_string();

                    if attempt + 1 < RPC_RETRY_COUNT {
                        let mut shutdown = self.shutdown.clone();
                        if *shutdown.borrow() {
                            return Err(IdentityError::Shutdown);
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = shutdown.changed() => return Err(IdentityError::Shutdown),
                        }
                    }
                }
            }
        }

        error!("all attempts to make the identity RPC call failed");
        Err(IdentityError::RetriesExhausted(last_error))
    }
}

/// The broker adapter draws its session credential from the identity client.
#[async_trait]
impl CredentialSource for IdentityClient {
    async fn access_token(&self) -> Result<String, BrokerError> {
        IdentityClient::access_token(self)
            .await
            .map_err(|e| BrokerError::CredentialRefresh(e.to_string()))
    }

    async fn is_expired(&self) -> bool {
        self.is_token_expired().await
    }

    async fn refresh(&self) -> Result<(), BrokerError> {
        self.refresh_token()
            .await
            .map_err(|e| BrokerError::CredentialRefresh(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_without_expiry_counts_as_expired() {
        let token = AppToken::default();
        assert!(token.is_expired());
    }

    #[test]
    fn token_expiry_is_checked_against_now() {
        let live = AppToken {
            access_token: "t".into(),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        };
        assert!(!live.is_expired());

        let stale = AppToken {
            access_token: "t".into(),
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        };
        assert!(stale.is_expired());
    }

    #[test]
    fn authenticate_response_parses() {
        let json = r#"{"access_token":"abc","expires_at":4102444800}"#;
        let resp: AuthenticateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.access_token, "abc");
        assert_eq!(resp.expires_at, 4102444800);
    }
}
