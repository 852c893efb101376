//! imagen - prompt-to-image client for hosted inference endpoints
//!
//! A single request lifecycle controller drives one outbound call per
//! submission and publishes its state to whatever presentation layer is
//! watching.

pub mod config;
pub mod generation;
pub mod view;

pub use config::{ConfigError, Settings};
pub use generation::{
    Controller, Credential, ImageClient, ImageReference, InferenceClient, LifecycleState, Outcome,
    Phase, RequestFailure, ResponseEnvelope, StalePolicy, SubmitError, TransportFailure,
};
