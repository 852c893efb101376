// Generation - request lifecycle and the HTTP adapter it drives

mod client;
mod controller;
mod error;
mod types;

pub use client::{ImageClient, InferenceClient};
pub use controller::{Controller, Outcome};
pub use error::{RequestFailure, SubmitError, TransportFailure};
pub use types::{
    Credential, GenerationRequest, ImageReference, LifecycleState, Phase, RequestBody, ResponseEnvelope,
    StalePolicy, DATA_URI_PREFIX,
};
