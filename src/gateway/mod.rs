//! Model gateway for chat completions.
//!
//! Everything the analysis core knows about the language model goes through
//! [`ChatGateway`]. Retry policy and usage reporting live here, never in the
//! pipeline stages.

pub mod error;
pub mod ollama;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use ollama::{ChatProvider, OllamaAdapter};
use usage::{ProviderCallRecord, UsageSink as UsageSinkTrait};

pub use error::{ErrorContext, ProviderError};
pub use types::*;
pub use usage::{CallStatus, NoopUsageSink, TracingUsageSink, UsageSink};

/// The opaque model collaborator. Implementations must tolerate concurrent calls.
#[async_trait::async_trait]
pub trait ChatGateway: Send + Sync {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

pub struct ProviderGateway<P: ChatProvider = OllamaAdapter, U: UsageSinkTrait = NoopUsageSink> {
    provider: P,
    usage_sink: Arc<U>,
    config: GatewayConfig,
}

#[async_trait::async_trait]
impl<P: ChatProvider, U: UsageSinkTrait> ChatGateway for ProviderGateway<P, U> {
    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        ProviderGateway::chat(self, req).await
    }
}

impl<P: ChatProvider, U: UsageSinkTrait> ProviderGateway<P, U> {
    pub fn with_config(provider: P, usage_sink: Arc<U>, config: GatewayConfig) -> Self {
        Self {
            provider,
            usage_sink,
            config,
        }
    }

    pub async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.provider.chat(&req).await {
                Ok(resp) => {
                    self.record_usage(&req, &resp, attempt, None).await;
                    return Ok(resp);
                }
                Err(err) => {
                    self.record_usage(&req, &ChatResponse::empty(), attempt, Some(err.code()))
                        .await;

                    if !err.is_retryable() || attempt >= self.config.max_retries {
                        return Err(err);
                    }

                    let delay = backoff_delay(self.config.retry_base_delay, attempt);
                    tracing::debug!(
                        caller = req.attribution.caller,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying model call"
                    );
                    attempt += 1;
                    sleep(delay).await;
                }
            }
        }
    }

    async fn record_usage(
        &self,
        req: &ChatRequest,
        resp: &ChatResponse,
        attempt: u32,
        error_code: Option<&str>,
    ) {
        let record = ProviderCallRecord::new(
            req.model.provider(),
            req.model.model_id(),
            req.attribution.caller,
        )
        .tokens(resp.input_tokens, resp.output_tokens)
        .latency(resp.latency.as_millis() as u64)
        .run(req.attribution.run_id)
        .attempt(attempt);

        let record = match error_code {
            Some(code) => record.error(code),
            None => record,
        };

        self.usage_sink.record(record).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let multiplier = 2u64.pow(attempt.min(5));
    base * multiplier as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct FlakyProvider {
        failures_left: AtomicU32,
        retryable: bool,
    }

    #[async_trait::async_trait]
    impl ChatProvider for FlakyProvider {
        async fn chat(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(ProviderError::provider("ollama", "busy", self.retryable));
            }
            Ok(ChatResponse::text("ok"))
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        records: Mutex<Vec<ProviderCallRecord>>,
    }

    #[async_trait::async_trait]
    impl UsageSinkTrait for CollectingSink {
        async fn record(&self, record: ProviderCallRecord) {
            self.records.lock().unwrap().push(record);
        }
    }

    fn request() -> ChatRequest {
        ChatRequest::new(
            ChatModel::ollama("llama3.1:8b"),
            vec![Message::user("hi")],
            Attribution::new("test"),
        )
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 9), Duration::from_millis(3200));
    }

    #[tokio::test]
    async fn retries_retryable_errors_and_records_each_attempt() {
        let sink = Arc::new(CollectingSink::default());
        let gateway = ProviderGateway::with_config(
            FlakyProvider {
                failures_left: AtomicU32::new(2),
                retryable: true,
            },
            sink.clone(),
            GatewayConfig {
                max_retries: 2,
                retry_base_delay: Duration::from_millis(1),
            },
        );

        let resp = gateway.chat(request()).await.unwrap();
        assert_eq!(resp.content, "ok");

        let records = sink.records.lock().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].status, CallStatus::Error);
        assert_eq!(records[2].status, CallStatus::Success);
        assert_eq!(records[2].attempt, 2);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_errors() {
        let sink = Arc::new(CollectingSink::default());
        let gateway = ProviderGateway::with_config(
            FlakyProvider {
                failures_left: AtomicU32::new(1),
                retryable: false,
            },
            sink.clone(),
            GatewayConfig {
                max_retries: 3,
                retry_base_delay: Duration::from_millis(1),
            },
        );

        let err = gateway.chat(request()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert_eq!(sink.records.lock().unwrap().len(), 1);
    }
}
