use super::{InferenceBackend, PlanDraft};
use async_trait::async_trait;
use deskpilot_common::{ConversationContext, InterpretationError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    #[error("Invalid endpoint URL: {0}")]
    Parse(#[from] url::ParseError),
    #[error("Unsupported endpoint scheme: {0}")]
    Scheme(String),
}

#[derive(Serialize)]
struct TranslateRequest<'a> {
    text: &'a str,
    context: &'a ConversationContext,
}

/// Error body an inference service returns with a non-2xx status.
#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    detail: String,
}

/// Remote inference service speaking JSON over HTTP.
///
/// Request: `POST {endpoint}` with `{"text": ..., "context": {"turns": [...]}}`.
/// Response: a [`PlanDraft`] on success, `{"error": kind, "detail": ...}`
/// otherwise.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpBackend {
    pub fn new(endpoint: &str) -> Result<Self, EndpointError> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "http" | "https") {
            return Err(EndpointError::Scheme(endpoint.scheme().to_string()));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_transport(&self, err: reqwest::Error, timeout: Duration) -> InterpretationError {
        if err.is_timeout() {
            InterpretationError::timeout(timeout)
        } else {
            InterpretationError::BackendUnavailable(format!("{}: {}", self.endpoint, err))
        }
    }
}

fn map_error_body(status: reqwest::StatusCode, body: Option<ErrorBody>) -> InterpretationError {
    match body {
        Some(b) => match b.error.as_str() {
            "ambiguous" => InterpretationError::Ambiguous(b.detail),
            "unsupported_intent" | "unsupported" => InterpretationError::UnsupportedIntent(b.detail),
            "timeout" => InterpretationError::BackendUnavailable(format!("backend timed out: {}", b.detail)),
            other => InterpretationError::BackendUnavailable(format!("{} ({}): {}", status, other, b.detail)),
        },
        None => InterpretationError::BackendUnavailable(format!("backend returned {}", status)),
    }
}

#[async_trait]
impl InferenceBackend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn translate(
        &self,
        text: &str,
        context: &ConversationContext,
        timeout: Duration,
    ) -> Result<PlanDraft, InterpretationError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .timeout(timeout)
            .json(&TranslateRequest { text, context })
            .send()
            .await
            .map_err(|e| self.map_transport(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.json::<ErrorBody>().await.ok();
            let err = map_error_body(status, body);
            tracing::debug!(%status, error = %err, "inference backend rejected command");
            return Err(err);
        }

        response
            .json::<PlanDraft>()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InterpretationError::timeout(timeout)
                } else {
                    InterpretationError::BackendUnavailable(format!("malformed response: {}", e))
                }
            })
    }
}
