//! Shared test helpers for engine tests.

use coact_core::backend::{Backend, TurnRequest, TurnResponse};
use coact_core::category::{Category, CategoryRegistry};
use coact_core::error::BackendError;
use std::sync::Mutex;

/// A backend that returns a sequence of scripted responses.
///
/// Each call to `respond` returns the next response in the queue and
/// records the request. Panics if more calls are made than responses
/// provided, unless a failure is scheduled for that call.
pub struct ScriptedBackend {
    responses: Mutex<Vec<TurnResponse>>,
    requests: Mutex<Vec<TurnRequest>>,
    call_count: Mutex<usize>,
    session_count: Mutex<usize>,
    failure: Option<(usize, BackendError)>,
}

impl ScriptedBackend {
    pub fn new(responses: Vec<TurnResponse>) -> Self {
        Self {
            responses: Mutex::new(responses),
            requests: Mutex::new(Vec::new()),
            call_count: Mutex::new(0),
            session_count: Mutex::new(0),
            failure: None,
        }
    }

    /// Fail call number `call` (0-based) with `error`.
    pub fn fail_at(mut self, call: usize, error: BackendError) -> Self {
        self.failure = Some((call, error));
        self
    }

    pub fn calls(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    pub fn sessions(&self) -> usize {
        *self.session_count.lock().unwrap()
    }

    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn begin_session(&self, _task: &str) -> Result<(), BackendError> {
        *self.session_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn respond(&self, request: TurnRequest) -> Result<TurnResponse, BackendError> {
        self.requests.lock().unwrap().push(request);

        let mut count = self.call_count.lock().unwrap();
        let call = *count;
        *count += 1;

        if let Some((at, error)) = &self.failure {
            if *at == call {
                return Err(error.clone());
            }
        }

        let responses = self.responses.lock().unwrap();
        if call >= responses.len() {
            panic!(
                "ScriptedBackend: no more responses (call #{}, have {})",
                call,
                responses.len()
            );
        }
        Ok(responses[call].clone())
    }
}

/// A → [B], B → [A, C], C terminal.
pub fn abc_registry() -> CategoryRegistry {
    CategoryRegistry::from_categories([
        Category::new("A", "First phase").with_next(["B"]),
        Category::new("B", "Second phase").with_next(["A", "C"]),
        Category::new("C", "Wrap up").with_next(["B"]),
    ])
    .unwrap()
}
