mod common;

use anomaly_agent::agent::{
    analyze_clusters, analyze_records, AnalysisPipeline, AggregateBranch, PipelineError, Stage,
    Verdict,
};
use anomaly_agent::cluster::UNKNOWN_CLUSTER;
use anomaly_agent::gateway::ProviderError;
use anomaly_agent::report::{soc_report, AnalysisReport, SOC_READY};
use anomaly_agent::trace::{NoopObserver, RunEventKind};

use common::{
    is_plan, is_reflection, is_rewrite, model_for, step_answer, CollectingObserver,
    ScriptedGateway, FOUR_STEP_PLAN, SAMPLE_INPUT,
};

fn healthy(reflection: &'static str) -> impl Fn(&str) -> Result<String, ProviderError> {
    move |prompt: &str| {
        if is_plan(prompt) {
            Ok(FOUR_STEP_PLAN.to_string())
        } else if is_reflection(prompt) {
            Ok(reflection.to_string())
        } else if is_rewrite(prompt) {
            Ok("Rewritten: 4,000 SYN packets in 10s from 10.0.0.5.".to_string())
        } else {
            Ok(step_answer(prompt))
        }
    }
}

#[tokio::test]
async fn affirmative_reflection_passes_outputs_through() {
    let gateway = ScriptedGateway::new(healthy("All good."));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let state = pipeline.run(SAMPLE_INPUT).await.unwrap();

    // plan + 4 steps + reflect, no rewrite
    assert_eq!(gateway.calls(), 6);
    assert_eq!(state.plan().len(), 4);
    assert_eq!(state.reflection(), Some("All good."));

    let report = AnalysisReport::from_state(&state);
    assert_eq!(report.assign, "85");
    assert_eq!(report.classify, "SYN flood");
    assert_eq!(report.justify, "High SYN rate from one source.");
    assert_eq!(report.recommend, "Block 10.0.0.5 and review firewall logs.");
    assert!(report.extra.is_empty());

    let outputs = state.step_outputs().unwrap();
    assert!(outputs.values().all(|r| r.succeeded));
}

#[tokio::test]
async fn critical_reflection_rewrites_only_the_justification() {
    let gateway = ScriptedGateway::new(healthy("Missing packet count"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let state = pipeline.run(SAMPLE_INPUT).await.unwrap();

    // one extra call for the rewrite
    assert_eq!(gateway.calls(), 7);
    let rewrite_prompt = gateway
        .prompts()
        .into_iter()
        .find(|p| is_rewrite(p))
        .unwrap();
    assert!(rewrite_prompt.contains("High SYN rate from one source."));
    assert!(rewrite_prompt.contains("Missing packet count"));

    let report = AnalysisReport::from_state(&state);
    assert_eq!(report.justify, "Rewritten: 4,000 SYN packets in 10s from 10.0.0.5.");
    assert_eq!(report.assign, "85");
    assert_eq!(report.classify, "SYN flood");
    assert_eq!(report.recommend, "Block 10.0.0.5 and review firewall logs.");
}

#[tokio::test]
async fn reflection_sees_step_outputs() {
    let gateway = ScriptedGateway::new(healthy("ALL GOOD"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));
    pipeline.run(SAMPLE_INPUT).await.unwrap();

    let reflection_prompt = gateway
        .prompts()
        .into_iter()
        .find(|p| is_reflection(p))
        .unwrap();
    assert!(reflection_prompt.starts_with("Confidence: 85\nAnomaly Type: SYN flood\n"));
    assert!(reflection_prompt.contains("Justification: High SYN rate from one source."));
}

#[tokio::test]
async fn step_prompts_embed_the_raw_text() {
    let gateway = ScriptedGateway::new(healthy("All good"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));
    pipeline.run(SAMPLE_INPUT).await.unwrap();

    let step_prompts: Vec<String> = gateway
        .prompts()
        .into_iter()
        .filter(|p| p.contains("\n\nDetails:\n"))
        .collect();
    assert_eq!(step_prompts.len(), 4);
    for prompt in step_prompts {
        assert!(prompt.ends_with(SAMPLE_INPUT));
    }
}

#[tokio::test]
async fn blank_input_makes_no_calls() {
    let gateway = ScriptedGateway::new(healthy("All good"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let state = pipeline.run("  \n\t").await.unwrap();

    assert_eq!(gateway.calls(), 0);
    assert!(state.plan().is_empty());
    assert!(state.final_output().unwrap().is_empty());
    assert!(AnalysisReport::from_state(&state).is_empty());
}

#[tokio::test]
async fn short_plan_runs_only_the_steps_found() {
    let gateway = ScriptedGateway::new(|prompt: &str| {
        if is_plan(prompt) {
            Ok("Step 1: Assign a confidence score.\nStep 2: Classify it.\nStep 4: Recommend next steps.".to_string())
        } else if is_reflection(prompt) {
            Ok("All good".to_string())
        } else {
            Ok(step_answer(prompt))
        }
    });
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let state = pipeline.run(SAMPLE_INPUT).await.unwrap();

    assert_eq!(gateway.calls(), 1 + 3 + 1);
    let report = AnalysisReport::from_state(&state);
    assert_eq!(report.justify, "");
    assert_eq!(report.recommend, "Block 10.0.0.5 and review firewall logs.");
}

#[tokio::test]
async fn plan_failure_is_fatal() {
    let gateway = ScriptedGateway::new(|_: &str| {
        Err(ProviderError::provider("ollama", "model not found", false))
    });
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let err = pipeline.run(SAMPLE_INPUT).await.unwrap_err();

    assert!(matches!(err, PipelineError::Plan(_)));
    assert_eq!(err.stage(), Some(Stage::Plan));
    assert_eq!(gateway.calls(), 1);
}

#[tokio::test]
async fn reflect_failure_is_fatal_after_steps_ran() {
    let gateway = ScriptedGateway::new(|prompt: &str| {
        if is_plan(prompt) {
            Ok(FOUR_STEP_PLAN.to_string())
        } else if is_reflection(prompt) {
            Err(ProviderError::provider("ollama", "connection reset", true))
        } else {
            Ok(step_answer(prompt))
        }
    });
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let err = pipeline.run(SAMPLE_INPUT).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Reflect));
    assert_eq!(gateway.calls(), 6);
}

#[tokio::test]
async fn observer_sees_stages_in_order() {
    let gateway = ScriptedGateway::new(healthy("Needs more detail"));
    let pipeline = AnalysisPipeline::new(model_for(gateway));
    let observer = CollectingObserver::default();

    let state = pipeline.run_observed(SAMPLE_INPUT, &observer).await.unwrap();
    let events = observer.events();

    assert!(events.iter().all(|e| e.run_id == state.run_id));

    let started: Vec<Stage> = events
        .iter()
        .filter_map(|e| match e.kind {
            RunEventKind::StageStarted { stage } => Some(stage),
            _ => None,
        })
        .collect();
    assert_eq!(started, Stage::ALL.to_vec());

    let steps = events
        .iter()
        .filter(|e| matches!(e.kind, RunEventKind::StepFinished { .. }))
        .count();
    assert_eq!(steps, 4);

    assert!(events.iter().any(|e| e.kind
        == RunEventKind::Reflected {
            verdict: Verdict::NeedsRevision
        }));
    assert!(events.iter().any(|e| e.kind
        == RunEventKind::Aggregated {
            branch: AggregateBranch::Rewrite
        }));
}

#[tokio::test]
async fn clusters_are_analyzed_in_first_seen_order() {
    let gateway = ScriptedGateway::new(healthy("All good"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let reports = analyze_clusters(&pipeline, SAMPLE_INPUT, &NoopObserver)
        .await
        .unwrap();

    let ids: Vec<&str> = reports.iter().map(|r| r.cluster_id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(reports[0].member_count, 2);
    assert_eq!(reports[1].member_count, 1);
    assert_ne!(reports[0].run_id, reports[1].run_id);
    assert_eq!(gateway.calls(), 12);
    assert_eq!(reports[1].report.classify, "SYN flood");
}

const NO_RECORDS: &str = "capture finished, 0 anomalies\nnothing to report";

fn assert_four_empty_fields(report: &AnalysisReport) {
    assert_eq!(report.assign, "");
    assert_eq!(report.classify, "");
    assert_eq!(report.justify, "");
    assert_eq!(report.recommend, "");
}

#[tokio::test]
async fn no_records_yields_empty_fields_without_model_calls() {
    let gateway = ScriptedGateway::new(healthy("All good"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let whole = analyze_records(&pipeline, NO_RECORDS, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(whole.member_count, 0);
    assert_four_empty_fields(&whole.report);

    let per_cluster = analyze_clusters(&pipeline, NO_RECORDS, &NoopObserver)
        .await
        .unwrap();
    assert_eq!(per_cluster.len(), 1);
    assert_eq!(per_cluster[0].cluster_id, UNKNOWN_CLUSTER);
    assert_eq!(per_cluster[0].member_count, 0);
    assert_four_empty_fields(&per_cluster[0].report);

    assert_eq!(gateway.calls(), 0);
}

#[tokio::test]
async fn whole_input_analysis_sends_only_record_text() {
    let gateway = ScriptedGateway::new(healthy("All good"));
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let report = analyze_records(&pipeline, SAMPLE_INPUT, &NoopObserver)
        .await
        .unwrap();

    assert_eq!(report.cluster_id, "all");
    assert_eq!(report.member_count, 3);
    assert_eq!(report.report.assign, "85");
    assert_eq!(gateway.calls(), 6);

    let prompts = gateway.prompts();
    assert!(prompts.iter().all(|p| !p.contains("noise line")));
    let plan_prompt = prompts.iter().find(|p| is_plan(p)).unwrap();
    let first_b = plan_prompt.find("'cluster': 'B'").unwrap();
    let last_a = plan_prompt.rfind("'cluster': 'A'").unwrap();
    assert!(last_a < first_b, "records should be grouped by cluster");
}

#[tokio::test]
async fn aggregate_failure_is_fatal() {
    let gateway = ScriptedGateway::new(|prompt: &str| {
        if is_plan(prompt) {
            Ok(FOUR_STEP_PLAN.to_string())
        } else if is_reflection(prompt) {
            Ok("Missing packet count".to_string())
        } else if is_rewrite(prompt) {
            Err(ProviderError::provider("ollama", "context window exceeded", false))
        } else {
            Ok(step_answer(prompt))
        }
    });
    let pipeline = AnalysisPipeline::new(model_for(gateway.clone()));

    let err = pipeline.run(SAMPLE_INPUT).await.unwrap_err();

    assert!(matches!(err, PipelineError::Aggregate(_)));
    assert_eq!(err.stage(), Some(Stage::Aggregate));
    assert_eq!(gateway.calls(), 7);
}

#[tokio::test]
async fn soc_report_puts_the_report_in_justify() {
    let gateway = ScriptedGateway::new(|prompt: &str| {
        assert!(prompt.contains("=== Anomaly Cluster ==="));
        Ok("**Blue Team Anomaly Report**\n- **Confidence Score**: 90".to_string())
    });
    let model = model_for(gateway.clone());

    let report = soc_report(&model, SAMPLE_INPUT, "Blue Team").await.unwrap();

    assert_eq!(gateway.calls(), 1);
    assert_eq!(report.assign, SOC_READY);
    assert_eq!(report.classify, SOC_READY);
    assert_eq!(report.recommend, SOC_READY);
    assert!(report.justify.starts_with("**Blue Team Anomaly Report**"));

    let blank = soc_report(&model, "   ", "Blue Team").await.unwrap();
    assert!(blank.is_empty());
    assert_eq!(gateway.calls(), 1);
}
