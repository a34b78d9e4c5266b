//! songgate HTTP client implementation.

use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;

use songgate_core::{GuestId, TransactionId};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, AuthorizeRequest, AuthorizeResponse, Caller, CompletedResponse,
    ConsumeResponse, CreditResponse, GenerationCompleted, HealthResponse, MergeRequest,
    MergeResponse, QuotaResponse,
};

/// Header carrying the visitor's guest identifier.
const GUEST_ID_HEADER: &str = "x-guest-id";

/// songgate API client.
///
/// Service-key methods are for the generation pipeline; caller methods
/// forward an end user's identity from the web front end's server side.
#[derive(Debug, Clone)]
pub struct SonggateClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
}

impl SonggateClient {
    /// Create a new songgate client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the songgate service (e.g., `"http://songgate:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new songgate client with custom options.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Configuration` if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
        })
    }

    // ========================================================================
    // End-user calls
    // ========================================================================

    /// Is the caller's next generation free?
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn quota(&self, caller: &Caller) -> Result<QuotaResponse, ClientError> {
        let url = format!("{}/v1/quota", self.base_url);

        let response = self.as_caller(self.client.get(&url), caller).send().await?;

        self.handle_response(response).await
    }

    /// Authorize a generation, spending `transaction_id` if the free one is
    /// gone.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PaymentRequired` if the caller must buy a
    /// credit, or another error if the request fails.
    pub async fn authorize(
        &self,
        caller: &Caller,
        transaction_id: Option<TransactionId>,
    ) -> Result<AuthorizeResponse, ClientError> {
        let url = format!("{}/v1/generations/authorize", self.base_url);
        let request = AuthorizeRequest { transaction_id };

        let response = self
            .as_caller(self.client.post(&url), caller)
            .json(&request)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Fold the caller's guest history into their account. Call once per
    /// login.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the session is invalid. A
    /// store outage is not an error; it comes back as `deferred`.
    pub async fn merge(
        &self,
        account_token: &str,
        guest_id: GuestId,
        last_known_address: Option<String>,
    ) -> Result<MergeResponse, ClientError> {
        let url = format!("{}/v1/identity/merge", self.base_url);
        let request = MergeRequest {
            guest_id: Some(guest_id),
            last_known_address,
        };

        let response = self
            .client
            .post(&url)
            .header("authorization", format!("Bearer {account_token}"))
            .json(&request)
            .send()
            .await?;

        let merged: MergeResponse = self.handle_response(response).await?;
        if merged.deferred {
            tracing::warn!("songgate deferred the merge to the next login");
        }
        Ok(merged)
    }

    // ========================================================================
    // Service calls
    // ========================================================================

    /// Report a completed generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn generation_completed(
        &self,
        event: &GenerationCompleted,
    ) -> Result<CompletedResponse, ClientError> {
        let url = format!("{}/v1/generations/completed", self.base_url);

        let response = self
            .as_service(self.client.post(&url))
            .json(event)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Look up a payment credit.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::CreditNotFound` if no credit exists.
    pub async fn credit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<CreditResponse, ClientError> {
        let url = format!("{}/v1/credits/{transaction_id}", self.base_url);

        let response = self.as_service(self.client.get(&url)).send().await?;

        match self.handle_response(response).await {
            Err(ClientError::Api { status: 404, .. }) => Err(ClientError::CreditNotFound {
                transaction_id: transaction_id.to_string(),
            }),
            other => other,
        }
    }

    /// Spend a payment credit.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::PaymentRequired` if the credit is spent or
    /// unknown.
    pub async fn consume_credit(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<ConsumeResponse, ClientError> {
        let url = format!("{}/v1/credits/{transaction_id}/consume", self.base_url);

        let response = self.as_service(self.client.post(&url)).send().await?;

        self.handle_response(response).await
    }

    /// Service health.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        let url = format!("{}/health", self.base_url);

        let response = self.client.get(&url).send().await?;

        self.handle_response(response).await
    }

    fn as_service(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    fn as_caller(&self, builder: RequestBuilder, caller: &Caller) -> RequestBuilder {
        let mut builder = builder.header("x-service-name", &self.service_name);
        if let Some(token) = &caller.account_token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        if let Some(guest) = &caller.guest_id {
            builder = builder.header(GUEST_ID_HEADER, guest.as_str());
        }
        builder
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let retry_after_seconds = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        // Try to parse error response
        let error_body: Result<ApiErrorResponse, _> = response.json().await;

        match error_body {
            Ok(api_error) => {
                let details = api_error.error.details.as_ref();
                match api_error.error.code.as_str() {
                    "payment_required" => Err(ClientError::PaymentRequired {
                        reason: details
                            .and_then(|d| d.get("reason"))
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("unknown")
                            .to_string(),
                        free_credits_used: details
                            .and_then(|d| d.get("free_credits_used"))
                            .and_then(serde_json::Value::as_i64)
                            .unwrap_or(0),
                        transaction_id: details
                            .and_then(|d| d.get("transaction_id"))
                            .and_then(serde_json::Value::as_str)
                            .map(String::from),
                    }),
                    "store_unavailable" => Err(ClientError::Unavailable {
                        message: api_error.error.message,
                        retry_after_seconds,
                    }),
                    code => Err(ClientError::Api {
                        code: code.to_string(),
                        message: api_error.error.message,
                        status: status.as_u16(),
                    }),
                }
            }
            Err(_) if status == StatusCode::SERVICE_UNAVAILABLE => Err(ClientError::Unavailable {
                message: format!("HTTP {status}"),
                retry_after_seconds,
            }),
            Err(_) => Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_creation() {
        let client = SonggateClient::new("http://localhost:8080", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_trims_trailing_slash() {
        let client = SonggateClient::new("http://localhost:8080/", "test-api-key").unwrap();
        assert_eq!(client.base_url, "http://localhost:8080");
    }

    #[test]
    fn client_options() {
        let options = ClientOptions::with_service_name("song-pipeline");
        let client =
            SonggateClient::with_options("http://localhost:8080", "key", options).unwrap();
        assert_eq!(client.service_name, "song-pipeline");
    }
}
