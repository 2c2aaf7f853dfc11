#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anomaly_agent::agent::AnalystModel;
use anomaly_agent::gateway::{ChatGateway, ChatModel, ChatRequest, ChatResponse, ProviderError};
use anomaly_agent::trace::{RunEvent, RunObserver};

type Script = dyn Fn(&str) -> Result<String, ProviderError> + Send + Sync;

/// Gateway that answers from a closure over the prompt and counts calls.
pub struct ScriptedGateway {
    script: Box<Script>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGateway {
    pub fn new(
        script: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: None,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn with_delay(
        delay: Duration,
        script: impl Fn(&str) -> Result<String, ProviderError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            delay: Some(delay),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatGateway for ScriptedGateway {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let prompt = req
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        self.prompts.lock().unwrap().push(prompt.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.script)(&prompt).map(ChatResponse::text)
    }
}

pub fn model_for(gateway: Arc<ScriptedGateway>) -> AnalystModel {
    AnalystModel::new(gateway, ChatModel::ollama("test-model"))
}

pub const FOUR_STEP_PLAN: &str = "Step 1: Assign a confidence score (0-100).\n\
Step 2: Classify the anomaly type.\n\
Step 3: Justify the classification.\n\
Step 4: Recommend follow-up investigation.";

pub fn is_plan(prompt: &str) -> bool {
    prompt.starts_with("Given this anomaly:")
}

pub fn is_reflection(prompt: &str) -> bool {
    prompt.starts_with("Confidence:")
}

pub fn is_rewrite(prompt: &str) -> bool {
    prompt.starts_with("Original Justification:")
}

/// Canned step answers keyed by the instruction at the head of the prompt.
pub fn step_answer(prompt: &str) -> String {
    if prompt.starts_with("Assign") {
        "85".to_string()
    } else if prompt.starts_with("Classify") {
        "SYN flood".to_string()
    } else if prompt.starts_with("Justify") {
        "High SYN rate from one source.".to_string()
    } else if prompt.starts_with("Recommend") {
        "Block 10.0.0.5 and review firewall logs.".to_string()
    } else {
        format!("answer to: {}", prompt.lines().next().unwrap_or(""))
    }
}

#[derive(Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<RunEvent>>,
}

impl CollectingObserver {
    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl RunObserver for CollectingObserver {
    fn on_event(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub const SAMPLE_INPUT: &str = "\
Found DoS anomaly in node: {'cluster': 'A', 'src_ip': '10.0.0.5', 'length': 1514}
noise line
Found anomaly in node: {'cluster': 'B', 'src_ip': '10.0.0.9', 'flags': ['PSH', 'ACK']}
Found DoS anomaly in node: {'cluster': 'A', 'src_ip': '10.0.0.5', 'length': 60}
";
