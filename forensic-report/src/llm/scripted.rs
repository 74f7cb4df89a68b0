//! In-process generator with canned responses, for tests and dry runs.

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use super::{GenerationError, GenerationRequest, TextGenerator};

type Responder =
    Box<dyn Fn(&GenerationRequest, usize) -> Result<String, GenerationError> + Send + Sync>;

pub struct ScriptedGenerator {
    responder: Responder,
    requests: Mutex<Vec<GenerationRequest>>,
    latency: Option<Duration>,
}

impl ScriptedGenerator {
    /// Answer each request with `responder(request, call_index)`.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest, usize) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Mutex::new(Vec::new()),
            latency: None,
        }
    }

    pub fn always(response: Result<String, GenerationError>) -> Self {
        Self::new(move |_, _| response.clone())
    }

    /// Replay `responses` in order, repeating the last one once exhausted.
    pub fn sequence(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self::new(move |_, call| {
            responses
                .get(call)
                .or_else(|| responses.last())
                .cloned()
                .unwrap_or_else(|| Err(GenerationError::Other("no scripted response".into())))
        })
    }

    /// Sleep this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let call = match self.requests.lock() {
            Ok(mut requests) => {
                requests.push(request.clone());
                requests.len() - 1
            }
            Err(_) => return Err(GenerationError::Other("request log poisoned".into())),
        };
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        (self.responder)(request, call)
    }
}
