//! HTTP adapter for hosted image-generation endpoints

use super::error::TransportFailure;
use super::types::{GenerationRequest, ResponseEnvelope};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;

/// Performs one generation call and returns the base64 image payload
#[async_trait]
pub trait ImageClient: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportFailure>;
}

/// reqwest-backed client for inference endpoints
pub struct InferenceClient {
    client: reqwest::Client,
    envelope: ResponseEnvelope,
}

impl InferenceClient {
    /// Create a client that reads success bodies with the given envelope
    pub fn new(envelope: ResponseEnvelope) -> Self {
        Self::with_client(reqwest::Client::new(), envelope)
    }

    /// Create a client on top of a preconfigured reqwest client
    pub fn with_client(client: reqwest::Client, envelope: ResponseEnvelope) -> Self {
        Self { client, envelope }
    }

    pub fn envelope(&self) -> &ResponseEnvelope {
        &self.envelope
    }
}

impl Default for InferenceClient {
    fn default() -> Self {
        Self::new(ResponseEnvelope::default())
    }
}

#[async_trait]
impl ImageClient for InferenceClient {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportFailure> {
        let credential = request
            .credential
            .as_ref()
            .filter(|credential| !credential.is_empty())
            .ok_or_else(|| {
                TransportFailure::Local(
                    "no bearer credential configured (set HF_TOKEN or `token` in the config file)"
                        .to_string(),
                )
            })?;

        tracing::debug!(
            endpoint = %request.endpoint,
            prompt_len = request.prompt.len(),
            response_format = %request.response_format,
            "sending generation request"
        );

        let response = self
            .client
            .post(&request.endpoint)
            .bearer_auth(credential.expose())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json")
            .json(&request.body())
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TransportFailure::NoResponse(e.to_string()))?;

        tracing::debug!(status = status.as_u16(), body_len = bytes.len(), "response received");

        if !status.is_success() {
            return Err(TransportFailure::Status {
                status: status.as_u16(),
                body: parse_error_body(&bytes),
            });
        }

        extract_payload(&self.envelope, &bytes)
    }
}

/// Builder errors never left the process; everything else did
fn classify_send_error(error: reqwest::Error) -> TransportFailure {
    if error.is_builder() {
        TransportFailure::Local(error.to_string())
    } else {
        TransportFailure::NoResponse(error.to_string())
    }
}

fn parse_error_body(bytes: &[u8]) -> Value {
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

/// Pull the base64 image out of a successful body
fn extract_payload(envelope: &ResponseEnvelope, bytes: &[u8]) -> Result<String, TransportFailure> {
    if bytes.is_empty() {
        return Err(TransportFailure::Local("response body was empty".to_string()));
    }

    match envelope {
        ResponseEnvelope::Base64Text => {
            let text = std::str::from_utf8(bytes).map_err(|_| {
                TransportFailure::Local(
                    "response body is not text; the endpoint may return raw image bytes (try the binary envelope)"
                        .to_string(),
                )
            })?;
            let text = text.trim();

            match serde_json::from_str::<Value>(text) {
                Ok(Value::String(payload)) => Ok(payload),
                Ok(other) if other.is_object() || other.is_array() => Err(TransportFailure::Local(
                    "response body is JSON, not a base64 string (try a json pointer envelope)"
                        .to_string(),
                )),
                _ => Ok(text.to_string()),
            }
        }
        ResponseEnvelope::Binary => Ok(STANDARD.encode(bytes)),
        ResponseEnvelope::JsonPointer { pointer } => {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| TransportFailure::Local(format!("response body is not JSON: {}", e)))?;

            value
                .pointer(pointer)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| {
                    TransportFailure::Local(format!("no base64 string at '{}' in response", pointer))
                })
        }
    }
}
