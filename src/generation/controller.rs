// Controller - drives one prompt submission through the request lifecycle

use super::client::{ImageClient, InferenceClient};
use super::error::{RequestFailure, SubmitError};
use super::types::{Credential, GenerationRequest, ImageReference, LifecycleState, StalePolicy};
use crate::config::Settings;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;

/// How a single submission ended, from the submitter's point of view
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(ImageReference),
    Failed(RequestFailure),
    /// A newer submission started before this one resolved; state was left alone
    Superseded,
}

/// Owns the lifecycle state and the single transition function that drives it
pub struct Controller {
    client: Arc<dyn ImageClient>,
    endpoint: String,
    response_format: String,
    credential: Option<Credential>,
    timeout: Option<Duration>,
    policy: StalePolicy,
    state: watch::Sender<LifecycleState>,
    latest: AtomicU64,
}

impl Controller {
    /// Create a controller that talks to the endpoint through `client`
    pub fn new(client: Arc<dyn ImageClient>, settings: &Settings) -> Self {
        let (state, _) = watch::channel(LifecycleState::default());

        Self {
            client,
            endpoint: settings.endpoint.clone(),
            response_format: settings.response_format.clone(),
            credential: settings.token.clone(),
            timeout: settings.timeout(),
            policy: settings.stale_policy,
            state,
            latest: AtomicU64::new(0),
        }
    }

    /// Create a controller backed by the reqwest adapter
    pub fn from_settings(settings: &Settings) -> Self {
        let client = InferenceClient::new(settings.envelope.clone());
        Self::new(Arc::new(client), settings)
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: StalePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> StalePolicy {
        self.policy
    }

    /// Input event: the prompt text changed
    pub fn set_prompt(&self, prompt: impl Into<String>) {
        let prompt = prompt.into();
        self.state.send_if_modified(|state| {
            if state.prompt == prompt {
                return false;
            }
            state.prompt = prompt;
            true
        });
    }

    pub fn snapshot(&self) -> LifecycleState {
        self.state.borrow().clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state.borrow().in_flight
    }

    /// Receiver that sees every state transition
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Submit the prompt currently held in state
    pub async fn submit_current(&self) -> Result<Outcome, SubmitError> {
        let prompt = self.state.borrow().prompt.clone();
        self.submit(&prompt).await
    }

    /// Submit a prompt and wait for the call to resolve.
    ///
    /// Clears the previous result and error, marks the controller in flight,
    /// then writes exactly one of result or error when the call resolves.
    /// Overlapping submissions are not refused here; `StalePolicy` decides
    /// whether an older resolution may still write state.
    pub async fn submit(&self, prompt: &str) -> Result<Outcome, SubmitError> {
        if prompt.trim().is_empty() {
            return Err(SubmitError::EmptyPrompt);
        }

        let mut sequence = 0;
        self.state.send_modify(|state| {
            sequence = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
            state.begin(prompt);
        });

        tracing::info!(sequence, prompt_len = prompt.len(), "prompt submitted");

        let request = self.build_request(prompt);
        let resolution = self.dispatch(&request).await;

        let applied = self.state.send_if_modified(|state| {
            if self.policy == StalePolicy::DiscardStale
                && self.latest.load(Ordering::SeqCst) != sequence
            {
                return false;
            }
            match &resolution {
                Ok(image) => state.succeed(image.clone()),
                Err(failure) => state.fail(failure.to_string()),
            }
            true
        });

        if !applied {
            tracing::debug!(sequence, "discarding stale response");
            return Ok(Outcome::Superseded);
        }

        match resolution {
            Ok(image) => {
                tracing::info!(sequence, payload_len = image.payload().len(), "image received");
                Ok(Outcome::Succeeded(image))
            }
            Err(failure) => {
                tracing::warn!(sequence, "generation failed: {}", failure);
                Ok(Outcome::Failed(failure))
            }
        }
    }

    fn build_request(&self, prompt: &str) -> GenerationRequest {
        GenerationRequest {
            endpoint: self.endpoint.clone(),
            prompt: prompt.to_string(),
            response_format: self.response_format.clone(),
            credential: self.credential.clone(),
        }
    }

    /// Run the adapter call, bounded by the timeout when one is set
    async fn dispatch(&self, request: &GenerationRequest) -> Result<ImageReference, RequestFailure> {
        let call = self.client.generate(request);

        let payload = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| RequestFailure::Timeout(limit))?,
            None => call.await,
        }?;

        Ok(ImageReference::from_base64(payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::error::TransportFailure;
    use crate::generation::types::Phase;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::sync::{mpsc, oneshot};

    type Reply = Result<String, TransportFailure>;

    /// Resolves each call with a fixed reply
    struct FixedClient(Reply);

    #[async_trait]
    impl ImageClient for FixedClient {
        async fn generate(&self, _request: &GenerationRequest) -> Reply {
            self.0.clone()
        }
    }

    /// Holds each call open until the test releases its gate
    struct GatedClient {
        gates: Mutex<VecDeque<oneshot::Receiver<Reply>>>,
        calls: mpsc::UnboundedSender<GenerationRequest>,
    }

    #[async_trait]
    impl ImageClient for GatedClient {
        async fn generate(&self, request: &GenerationRequest) -> Reply {
            let gate = self.gates.lock().unwrap().pop_front().expect("unexpected call");
            self.calls.send(request.clone()).unwrap();
            gate.await
                .unwrap_or_else(|_| Err(TransportFailure::NoResponse("gate dropped".into())))
        }
    }

    fn gated(
        count: usize,
    ) -> (
        Arc<GatedClient>,
        Vec<oneshot::Sender<Reply>>,
        mpsc::UnboundedReceiver<GenerationRequest>,
    ) {
        let (calls, calls_rx) = mpsc::unbounded_channel();
        let mut senders = Vec::new();
        let mut gates = VecDeque::new();
        for _ in 0..count {
            let (tx, rx) = oneshot::channel();
            senders.push(tx);
            gates.push_back(rx);
        }
        let client = GatedClient {
            gates: Mutex::new(gates),
            calls,
        };
        (Arc::new(client), senders, calls_rx)
    }

    fn settings() -> Settings {
        Settings {
            endpoint: "https://inference.test/models/flux".to_string(),
            token: Some(Credential::new("hf_test")),
            ..Settings::default()
        }
    }

    fn controller_with(reply: Reply) -> Controller {
        Controller::new(Arc::new(FixedClient(reply)), &settings())
    }

    fn assert_resolved(state: &LifecycleState) {
        assert!(!state.in_flight);
        assert!(state.result.is_some() != state.error.is_some());
    }

    #[tokio::test]
    async fn test_success_produces_data_uri() {
        let controller = controller_with(Ok("QUJD".to_string()));

        let outcome = controller.submit("a lighthouse at dusk").await.unwrap();
        assert_eq!(outcome, Outcome::Succeeded(ImageReference::from_base64("QUJD")));

        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.phase(), Phase::Succeeded);
        assert_eq!(state.result.unwrap().data_uri(), "data:image/jpeg;base64,QUJD");
        assert_eq!(state.prompt, "a lighthouse at dusk");
    }

    #[tokio::test]
    async fn test_server_error_field() {
        let controller = controller_with(Err(TransportFailure::Status {
            status: 400,
            body: json!({ "error": "bad prompt" }),
        }));

        controller.submit("x").await.unwrap();
        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.error.as_deref(), Some("Error 400: bad prompt"));
    }

    #[tokio::test]
    async fn test_server_detail_field() {
        let controller = controller_with(Err(TransportFailure::Status {
            status: 500,
            body: json!({ "detail": "server exploded" }),
        }));

        controller.submit("x").await.unwrap();
        assert_eq!(
            controller.snapshot().error.as_deref(),
            Some("Error 500: server exploded")
        );
    }

    #[tokio::test]
    async fn test_no_response_advisory() {
        let controller = controller_with(Err(TransportFailure::NoResponse("dns".into())));

        let outcome = controller.submit("x").await.unwrap();
        assert_eq!(outcome, Outcome::Failed(RequestFailure::NoResponse));
        assert_eq!(
            controller.snapshot().error.as_deref(),
            Some("No response from server. Please check your network connection.")
        );
    }

    #[tokio::test]
    async fn test_local_failure_message() {
        let controller = controller_with(Err(TransportFailure::Local("builder error".into())));

        controller.submit("x").await.unwrap();
        assert_eq!(
            controller.snapshot().error.as_deref(),
            Some("An unexpected error occurred: builder error")
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_leaves_state_untouched() {
        let controller = controller_with(Ok("QUJD".to_string()));
        controller.submit("first").await.unwrap();
        let before = controller.snapshot();

        assert_eq!(controller.submit("").await, Err(SubmitError::EmptyPrompt));
        assert_eq!(controller.submit("   \n").await, Err(SubmitError::EmptyPrompt));
        assert_eq!(controller.snapshot(), before);
    }

    #[tokio::test]
    async fn test_request_carries_settings() {
        let (client, mut gates, mut calls) = gated(1);
        let controller = Arc::new(Controller::new(client, &settings()));

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("a red fox").await })
        };

        let request = calls.recv().await.unwrap();
        assert_eq!(request.endpoint, "https://inference.test/models/flux");
        assert_eq!(request.prompt, "a red fox");
        assert_eq!(request.response_format, "b64_json");
        assert_eq!(request.credential, Some(Credential::new("hf_test")));

        gates.remove(0).send(Ok("QUJD".into())).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_in_flight_only_while_pending() {
        let (client, mut gates, mut calls) = gated(2);
        let controller = Arc::new(Controller::new(client, &settings()));
        assert!(!controller.is_in_flight());

        // Leave a previous error behind
        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("one").await })
        };
        calls.recv().await.unwrap();
        assert!(controller.is_in_flight());
        gates
            .remove(0)
            .send(Err(TransportFailure::NoResponse("offline".into())))
            .unwrap();
        first.await.unwrap().unwrap();
        assert!(!controller.is_in_flight());
        assert!(controller.snapshot().error.is_some());

        let second = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("two").await })
        };
        calls.recv().await.unwrap();

        let pending = controller.snapshot();
        assert_eq!(pending.phase(), Phase::Submitting);
        assert!(pending.result.is_none());
        assert!(pending.error.is_none());

        gates.remove(0).send(Ok("QUJD".into())).unwrap();
        second.await.unwrap().unwrap();
        assert_resolved(&controller.snapshot());
    }

    #[tokio::test]
    async fn test_resubmit_clears_previous_result() {
        let (client, mut gates, mut calls) = gated(2);
        let controller = Arc::new(Controller::new(client, &settings()));

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("one").await })
        };
        calls.recv().await.unwrap();
        gates.remove(0).send(Ok("QUJD".into())).unwrap();
        first.await.unwrap().unwrap();
        assert_eq!(controller.snapshot().phase(), Phase::Succeeded);

        let second = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("two").await })
        };
        calls.recv().await.unwrap();

        let pending = controller.snapshot();
        assert!(pending.in_flight);
        assert!(pending.result.is_none());
        assert!(pending.error.is_none());

        gates
            .remove(0)
            .send(Err(TransportFailure::Status {
                status: 400,
                body: json!({ "error": "bad prompt" }),
            }))
            .unwrap();
        second.await.unwrap().unwrap();

        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.error.as_deref(), Some("Error 400: bad prompt"));
    }

    #[tokio::test]
    async fn test_timeout_is_fourth_error_kind() {
        let (client, _gates, _calls) = gated(1);
        let controller =
            Controller::new(client, &settings()).with_timeout(Some(Duration::from_millis(50)));

        let outcome = controller.submit("slow").await.unwrap();
        assert_eq!(
            outcome,
            Outcome::Failed(RequestFailure::Timeout(Duration::from_millis(50)))
        );

        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.error.as_deref(), Some("Request timed out after 0.05 seconds."));
    }

    #[tokio::test]
    async fn test_stale_response_is_discarded() {
        let (client, mut gates, mut calls) = gated(2);
        let controller = Arc::new(
            Controller::new(client, &settings()).with_policy(StalePolicy::DiscardStale),
        );

        let older = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("older").await })
        };
        calls.recv().await.unwrap();
        let newer = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("newer").await })
        };
        calls.recv().await.unwrap();

        let older_gate = gates.remove(0);
        let newer_gate = gates.remove(0);

        // Older resolves first: dropped, newer still pending
        older_gate.send(Ok("T0xE".into())).unwrap();
        assert_eq!(older.await.unwrap().unwrap(), Outcome::Superseded);
        let state = controller.snapshot();
        assert!(state.in_flight);
        assert!(state.result.is_none());

        newer_gate.send(Ok("TkVX".into())).unwrap();
        newer.await.unwrap().unwrap();
        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.result, Some(ImageReference::from_base64("TkVX")));
        assert_eq!(state.prompt, "newer");
    }

    #[tokio::test]
    async fn test_slow_stale_response_cannot_overwrite() {
        let (client, mut gates, mut calls) = gated(2);
        let controller = Arc::new(Controller::new(client, &settings()));

        let older = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("older").await })
        };
        calls.recv().await.unwrap();
        let newer = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("newer").await })
        };
        calls.recv().await.unwrap();

        let older_gate = gates.remove(0);
        gates
            .remove(0)
            .send(Err(TransportFailure::Status {
                status: 503,
                body: json!({ "error": "Model is loading" }),
            }))
            .unwrap();
        newer.await.unwrap().unwrap();

        older_gate.send(Ok("T0xE".into())).unwrap();
        assert_eq!(older.await.unwrap().unwrap(), Outcome::Superseded);

        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.error.as_deref(), Some("Error 503: Model is loading"));
    }

    #[tokio::test]
    async fn test_last_resolved_wins() {
        let (client, mut gates, mut calls) = gated(2);
        let controller = Arc::new(
            Controller::new(client, &settings()).with_policy(StalePolicy::LastResolvedWins),
        );

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("same prompt").await })
        };
        calls.recv().await.unwrap();
        let second = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("same prompt").await })
        };
        calls.recv().await.unwrap();

        let first_gate = gates.remove(0);
        let second_gate = gates.remove(0);

        // Any resolution clears in_flight, even with another call pending
        second_gate.send(Ok("U0VD".into())).unwrap();
        second.await.unwrap().unwrap();
        assert!(!controller.is_in_flight());

        first_gate.send(Ok("RklS".into())).unwrap();
        assert_eq!(
            first.await.unwrap().unwrap(),
            Outcome::Succeeded(ImageReference::from_base64("RklS"))
        );

        let state = controller.snapshot();
        assert_resolved(&state);
        assert_eq!(state.result, Some(ImageReference::from_base64("RklS")));
    }

    #[tokio::test]
    async fn test_subscribers_observe_transitions() {
        let (client, mut gates, mut calls) = gated(1);
        let controller = Arc::new(Controller::new(client, &settings()));
        let mut updates = controller.subscribe();

        let task = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.submit("watched").await })
        };
        calls.recv().await.unwrap();

        updates.changed().await.unwrap();
        assert!(updates.borrow_and_update().in_flight);

        gates.remove(0).send(Ok("QUJD".into())).unwrap();
        task.await.unwrap().unwrap();

        updates.changed().await.unwrap();
        let seen = updates.borrow_and_update().clone();
        assert_eq!(seen.phase(), Phase::Succeeded);
    }

    #[tokio::test]
    async fn test_set_prompt_and_submit_current() {
        let controller = controller_with(Ok("QUJD".to_string()));
        controller.set_prompt("a quiet harbor");
        assert_eq!(controller.snapshot().phase(), Phase::Idle);
        assert_eq!(controller.snapshot().prompt, "a quiet harbor");

        controller.submit_current().await.unwrap();
        assert_eq!(controller.snapshot().phase(), Phase::Succeeded);

        controller.set_prompt("");
        assert_eq!(controller.submit_current().await, Err(SubmitError::EmptyPrompt));
    }
}
