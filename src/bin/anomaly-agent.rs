#![forbid(unsafe_code)]

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use anomaly_agent::agent::{analyze_clusters, analyze_records};
use anomaly_agent::report::{render_report_text, soc_report, DEFAULT_SOC_TEAM};
use anomaly_agent::trace::{JsonlTraceSink, NoopObserver, RunObserver};
use anomaly_agent::{
    partition, AgentConfig, AnalysisReport, Cluster, ClusterReport, UNKNOWN_CLUSTER,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "anomaly-agent", version, about = "LLM triage for network anomaly output")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze detector output with the plan/execute/reflect/aggregate pipeline
    Analyze {
        /// Detector output file, or "-" for stdin
        #[arg(long)]
        input: String,
        /// Run once per cluster instead of once over all records
        #[arg(long)]
        per_cluster: bool,
        /// Produce one SOC report per cluster with a single model call
        #[arg(long, conflicts_with_all = ["per_cluster", "trace"])]
        soc: bool,
        /// SOC team name used in --soc reports
        #[arg(long, default_value = DEFAULT_SOC_TEAM)]
        team: String,
        /// Write reports as JSON to this path
        #[arg(long)]
        out: Option<PathBuf>,
        /// JSONL trace of stage events
        #[arg(long)]
        trace: Option<PathBuf>,
        /// Ollama model id (overrides OLLAMA_MODEL)
        #[arg(long)]
        model: Option<String>,
        /// Ollama base URL (overrides OLLAMA_BASE_URL)
        #[arg(long)]
        base_url: Option<String>,
        /// Number of plan steps to ask for
        #[arg(long)]
        steps: Option<usize>,
    },
    /// Show how the input partitions into clusters (no model calls)
    Clusters {
        /// Detector output file, or "-" for stdin
        #[arg(long)]
        input: String,
        /// Write clusters as JSON to this path
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            input,
            per_cluster,
            soc,
            team,
            out,
            trace,
            model,
            base_url,
            steps,
        } => {
            let mut config = AgentConfig::from_env()?;
            if let Some(model) = model {
                config.model = model;
            }
            if let Some(url) = base_url {
                config.base_url = url;
            }
            if let Some(n) = steps {
                if n == 0 {
                    bail!("--steps must be at least 1");
                }
                config.expected_steps = n;
            }

            let raw = read_input(&input)?;
            let pipeline = config.build_pipeline()?;

            let (trace_sink, trace_worker) = if let Some(path) = trace {
                let (sink, worker) = JsonlTraceSink::new(&path)
                    .with_context(|| format!("opening trace file {}", path.display()))?;
                (Some(sink), Some(worker))
            } else {
                (None, None)
            };
            let observer: &dyn RunObserver = match &trace_sink {
                Some(sink) => sink,
                None => &NoopObserver,
            };

            let reports: Vec<ClusterReport> = if soc {
                let mut clusters = partition(&raw);
                if clusters.is_empty() {
                    clusters.push(Cluster {
                        cluster_id: UNKNOWN_CLUSTER.to_string(),
                        members: Vec::new(),
                    });
                }
                let mut reports = Vec::with_capacity(clusters.len());
                for cluster in clusters {
                    let run_id = Uuid::new_v4();
                    let report = if cluster.members.is_empty() {
                        AnalysisReport::default()
                    } else {
                        let model = pipeline.model().for_run(run_id);
                        soc_report(&model, &cluster.text(), &team).await?
                    };
                    reports.push(ClusterReport {
                        member_count: cluster.members.len(),
                        run_id,
                        report,
                        cluster_id: cluster.cluster_id,
                    });
                }
                reports
            } else if per_cluster {
                analyze_clusters(&pipeline, &raw, observer).await?
            } else {
                vec![analyze_records(&pipeline, &raw, observer).await?]
            };

            drop(trace_sink);
            if let Some(worker) = trace_worker {
                worker.join()?;
            }

            if reports.iter().all(|r| r.member_count == 0) {
                eprintln!("[analyze] no anomaly records found");
            }
            for entry in &reports {
                println!(
                    "\n##### Cluster {} ({} records) #####",
                    entry.cluster_id, entry.member_count
                );
                print!("{}", render_report_text(&entry.report));
            }

            if let Some(path) = out {
                write_json(&path, &reports)?;
                eprintln!("[analyze] reports written to {}", path.display());
            }
        }
        Commands::Clusters { input, out } => {
            let raw = read_input(&input)?;
            let clusters = partition(&raw);
            for cluster in &clusters {
                println!("{}\t{}", cluster.cluster_id, cluster.members.len());
            }
            if let Some(path) = out {
                write_json(&path, &clusters)?;
            }
        }
    }

    Ok(())
}

fn read_input(input: &str) -> anyhow::Result<String> {
    if input == "-" {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("reading stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(input).with_context(|| format!("reading {input}"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(&mut file, value)?;
    writeln!(file)?;
    Ok(())
}
