//! Door server HTTP client.
//!
//! The server decides who may unlock and when a code is required; this
//! module only speaks its request/response contract:
//!
//! | Method | Path                                   | Body                      | Response                  |
//! |--------|----------------------------------------|---------------------------|---------------------------|
//! | GET    | `/esp32/door/check-if-validation-needed` |                         | `bool`                    |
//! | POST   | `/esp32/door/check-geo-authorization`  | `{deviceId}`              | `{authorized, message?}`  |
//! | POST   | `/esp32/door/validate-with-geo`        | `{deviceId}`              | `{success, message?}`     |
//! | POST   | `/esp32/door/unlock-via-geo`           | `{deviceId}`              | `{success, message?}`     |
//! | POST   | `/esp32/door/validate`                 | `{secretCode}`            | `{success, message?}`     |
//! | POST   | `/esp32/door/register-push-token`      | `{pushToken, deviceId}`   | `{success}`               |
//!
//! Nothing is cached: every call goes to the server.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;
use utoipa::ToSchema;

use crate::config::ApiConfig;
use crate::error::Result;

/// Validation-needed query path.
pub const CHECK_VALIDATION_NEEDED_PATH: &str = "esp32/door/check-if-validation-needed";
/// Geo authorization query path.
pub const CHECK_GEO_AUTHORIZATION_PATH: &str = "esp32/door/check-geo-authorization";
/// Geo validation path.
pub const VALIDATE_WITH_GEO_PATH: &str = "esp32/door/validate-with-geo";
/// Geo unlock path.
pub const UNLOCK_VIA_GEO_PATH: &str = "esp32/door/unlock-via-geo";
/// Manual secret-code validation path.
pub const VALIDATE_CODE_PATH: &str = "esp32/door/validate";
/// Push token registration path.
pub const REGISTER_PUSH_TOKEN_PATH: &str = "esp32/door/register-push-token";

/// Errors raised by [`HttpDoorClient`].
#[derive(Debug, Error)]
pub enum DoorClientError {
    /// The endpoint URL could not be built from the base URL.
    #[error("Invalid URL for {endpoint}: {source}")]
    InvalidUrl {
        /// Server path.
        endpoint: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// The request could not be sent or the response not received.
    #[error("Request to {endpoint} failed: {source}")]
    Transport {
        /// Server path.
        endpoint: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with a non-success status.
    #[error("Server returned {status} for {endpoint}")]
    Status {
        /// Server path.
        endpoint: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body could not be decoded.
    #[error("Failed to decode response from {endpoint}: {source}")]
    Decode {
        /// Server path.
        endpoint: String,
        /// Decode error.
        #[source]
        source: reqwest::Error,
    },
}

/// Server verdict on whether a device may auto-unlock.
///
/// Transient: never persisted, re-queried for every decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AuthorizationResult {
    /// Whether the device may auto-unlock.
    pub authorized: bool,

    /// Server explanation, usually present on refusal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthorizationResult {
    /// Server message, or `fallback` when the server sent none.
    #[must_use]
    pub fn message_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.message.as_deref().unwrap_or(fallback)
    }
}

/// Server answer to a validation or unlock request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ValidationResult {
    /// Whether the server accepted the request.
    pub success: bool,

    /// Server explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidationResult {
    /// A refusal produced locally, without calling the server.
    #[must_use]
    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRequest<'a> {
    device_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SecretCodeRequest<'a> {
    secret_code: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PushTokenRequest<'a> {
    push_token: &'a str,
    device_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct PushTokenResponse {
    #[serde(default)]
    success: bool,
}

/// The door server's HTTP contract.
#[async_trait]
pub trait DoorApi: Send + Sync {
    /// Whether the door is currently waiting for a code.
    async fn check_validation_needed(&self) -> Result<bool>;

    /// Whether `device_id` may auto-unlock.
    async fn check_geo_authorization(&self, device_id: &str) -> Result<AuthorizationResult>;

    /// Submit a location-based validation for `device_id`.
    async fn validate_with_geo(&self, device_id: &str) -> Result<ValidationResult>;

    /// Unlock directly on the strength of location. Not used by auto-validation.
    async fn unlock_via_geo(&self, device_id: &str) -> Result<ValidationResult>;

    /// Submit a secret code typed by the user.
    async fn validate_code(&self, secret_code: &str) -> Result<ValidationResult>;

    /// Register a push token for `device_id`. Returns the server's `success`.
    async fn register_push_token(&self, push_token: &str, device_id: &str) -> Result<bool>;
}

/// [`DoorApi`] over HTTP with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDoorClient {
    client: Client,
    base_url: Url,
}

impl HttpDoorClient {
    /// Create a client for `base_url` with the given timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot
    /// be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = normalize_base(base_url).map_err(|source| DoorClientError::InvalidUrl {
            endpoint: base_url.to_string(),
            source,
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| DoorClientError::Transport {
                endpoint: base_url.to_string(),
                source,
            })?;

        Ok(Self { client, base_url })
    }

    /// Create a client from configuration.
    ///
    /// # Errors
    ///
    /// See [`HttpDoorClient::new`].
    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(
            &config.base_url,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Base URL endpoints are resolved against.
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, DoorClientError> {
        self.base_url
            .join(path)
            .map_err(|source| DoorClientError::InvalidUrl {
                endpoint: path.to_string(),
                source,
            })
    }

    async fn call<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> std::result::Result<T, DoorClientError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        debug!(%method, %url, "Calling door server");

        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|source| DoorClientError::Transport {
                endpoint: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DoorClientError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| DoorClientError::Decode {
                endpoint: path.to_string(),
                source,
            })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        Ok(self.call(Method::POST, path, Some(body)).await?)
    }
}

/// Ensure the base URL ends in `/` so relative joins append instead of replace.
fn normalize_base(base_url: &str) -> std::result::Result<Url, url::ParseError> {
    let trimmed = base_url.trim();
    if trimmed.ends_with('/') {
        Url::parse(trimmed)
    } else {
        Url::parse(&format!("{trimmed}/"))
    }
}

#[async_trait]
impl DoorApi for HttpDoorClient {
    async fn check_validation_needed(&self) -> Result<bool> {
        Ok(self
            .call::<(), bool>(Method::GET, CHECK_VALIDATION_NEEDED_PATH, None)
            .await?)
    }

    async fn check_geo_authorization(&self, device_id: &str) -> Result<AuthorizationResult> {
        self.post(CHECK_GEO_AUTHORIZATION_PATH, &DeviceRequest { device_id })
            .await
    }

    async fn validate_with_geo(&self, device_id: &str) -> Result<ValidationResult> {
        self.post(VALIDATE_WITH_GEO_PATH, &DeviceRequest { device_id })
            .await
    }

    async fn unlock_via_geo(&self, device_id: &str) -> Result<ValidationResult> {
        self.post(UNLOCK_VIA_GEO_PATH, &DeviceRequest { device_id })
            .await
    }

    async fn validate_code(&self, secret_code: &str) -> Result<ValidationResult> {
        self.post(VALIDATE_CODE_PATH, &SecretCodeRequest { secret_code })
            .await
    }

    async fn register_push_token(&self, push_token: &str, device_id: &str) -> Result<bool> {
        let response: PushTokenResponse = self
            .post(
                REGISTER_PUSH_TOKEN_PATH,
                &PushTokenRequest {
                    push_token,
                    device_id,
                },
            )
            .await?;
        Ok(response.success)
    }
}
