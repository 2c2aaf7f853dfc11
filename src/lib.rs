#![forbid(unsafe_code)]

//! # anomaly-agent
//!
//! LLM-assisted triage of network anomaly detector output.
//!
//! Detector text is split into clusters of `Found anomaly in node: {...}`
//! records. Each cluster goes through a four-stage pipeline: the model plans
//! the analysis steps, the steps run concurrently, the model reflects on the
//! combined result, and the justification is rewritten when the reflection
//! finds a gap. The result is a report with a confidence score, an anomaly
//! type, a justification and a follow-up recommendation.

pub mod agent;
pub mod cluster;
pub mod config;
pub mod gateway;
pub mod literal;
pub mod prompts;
pub mod report;
pub mod trace;

pub use agent::{
    analyze_clusters, AnalysisPipeline, AnalystModel, ClusterReport, PipelineError, RunState,
    Stage, StepDescriptor, StepResult,
};
pub use cluster::{partition, Cluster, UNKNOWN_CLUSTER};
pub use config::{AgentConfig, ConfigError};
pub use gateway::{Attribution, ChatGateway, ProviderError, ProviderGateway, UsageSink};
pub use report::{render_report_text, soc_report, AnalysisReport};
pub use trace::{JsonlTraceSink, NoopObserver, RunEvent, RunEventKind, RunObserver, TraceWorker};
