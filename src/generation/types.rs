// Core types for the request lifecycle

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Scheme prepended to every successful payload to make it displayable
pub const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Bearer token for the inference endpoint.
///
/// Never printed: `Debug` and `Display` both redact the value.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for attaching to a request header
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Everything the adapter needs to issue one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub endpoint: String,
    pub prompt: String,
    pub response_format: String,
    pub credential: Option<Credential>,
}

impl GenerationRequest {
    /// JSON body sent to the endpoint
    pub fn body(&self) -> RequestBody<'_> {
        RequestBody {
            inputs: &self.prompt,
            response_format: &self.response_format,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RequestBody<'a> {
    pub inputs: &'a str,
    pub response_format: &'a str,
}

/// Shape of a successful response body around the base64 image
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ResponseEnvelope {
    /// The body itself is the base64 string (a JSON string literal is unwrapped)
    #[default]
    Base64Text,
    /// The body is raw image bytes
    Binary,
    /// The body is JSON and the base64 string sits at `pointer`
    JsonPointer { pointer: String },
}

impl FromStr for ResponseEnvelope {
    type Err = String;

    /// Accepts `base64-text`, `binary` or `json:<pointer>`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base64-text" => Ok(Self::Base64Text),
            "binary" => Ok(Self::Binary),
            other => match other.strip_prefix("json:") {
                Some(pointer) if pointer.starts_with('/') => Ok(Self::JsonPointer {
                    pointer: pointer.to_string(),
                }),
                _ => Err(format!(
                    "unknown envelope '{}' (expected base64-text, binary or json:/pointer)",
                    other
                )),
            },
        }
    }
}

/// What happens when an older submission resolves after a newer one started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StalePolicy {
    /// Drop the older resolution without touching state
    #[default]
    DiscardStale,
    /// Every resolution writes state; whichever resolves last wins
    LastResolvedWins,
}

/// A generated image, held as its base64 payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    payload: String,
}

impl ImageReference {
    pub fn from_base64(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Displayable reference: `data:image/jpeg;base64,<payload>`
    pub fn data_uri(&self) -> String {
        format!("{}{}", DATA_URI_PREFIX, self.payload)
    }

    /// Raw image bytes
    pub fn decode(&self) -> Result<Vec<u8>, base64::DecodeError> {
        STANDARD.decode(self.payload.trim())
    }

    /// File extension matching the decoded image format, if recognizable
    pub fn guess_extension(&self) -> Option<&'static str> {
        let bytes = self.decode().ok()?;
        let format = image::guess_format(&bytes).ok()?;
        format.extensions_str().first().copied()
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", DATA_URI_PREFIX, self.payload)
    }
}

/// Observable lifecycle phase, derived from the state fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Succeeded,
    Failed,
}

/// The four fields owned by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleState {
    pub prompt: String,
    pub result: Option<ImageReference>,
    pub in_flight: bool,
    pub error: Option<String>,
}

impl LifecycleState {
    pub fn phase(&self) -> Phase {
        if self.in_flight {
            Phase::Submitting
        } else if self.result.is_some() {
            Phase::Succeeded
        } else if self.error.is_some() {
            Phase::Failed
        } else {
            Phase::Idle
        }
    }

    /// Clears the previous outcome and marks a call as pending
    pub(crate) fn begin(&mut self, prompt: &str) {
        self.prompt = prompt.to_string();
        self.result = None;
        self.error = None;
        self.in_flight = true;
    }

    pub(crate) fn succeed(&mut self, image: ImageReference) {
        self.result = Some(image);
        self.error = None;
        self.in_flight = false;
    }

    pub(crate) fn fail(&mut self, message: String) {
        self.result = None;
        self.error = Some(message);
        self.in_flight = false;
    }
}
