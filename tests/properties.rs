//! Cross-cutting guarantees checked over many inputs.

mod common;

use common::mocks::{
    chart_output, document_output, findings_output, hypotheses_output, ScriptedWorker,
};
use hypatia::coordinator::{Coordinator, RetryPolicy};
use hypatia::pipeline::{PipelineState, PipelineStatus, StepOutcome, StepRecord};
use hypatia::planning::{
    ExecutionPlan, Intent, IntentClassifier, KeywordClassifier, PlanBuilder, Step,
};
use hypatia::types::{Request, StepId};
use hypatia::workers::{WorkerFailure, WorkerKind, WorkerRegistry};
use rstest::rstest;
use std::sync::Arc;

fn assert_acyclic(plan: &ExecutionPlan) {
    plan.validate().unwrap();
    for (index, step) in plan.steps.iter().enumerate() {
        for dependency in &step.depends_on {
            let position = plan.position(dependency).expect("dependency exists");
            assert!(position < index, "{} depends on later step {}", step.id, dependency);
        }
    }
}

fn prior_with_everything() -> PipelineState {
    let mut state = PipelineState::new(Request::new("earlier"), None);
    state.set_plan(ExecutionPlan::new(
        Intent::MixedPipeline,
        vec![
            Step::dispatch("ideation", WorkerKind::Ideation),
            Step::dispatch("analysis", WorkerKind::Analysis).after(&["ideation"]),
            Step::dispatch("visualization", WorkerKind::Visualization).after(&["analysis"]),
            Step::dispatch("writer", WorkerKind::Writer).after(&["analysis", "visualization"]),
        ],
    ));
    for (id, kind, output) in [
        ("ideation", WorkerKind::Ideation, hypotheses_output(3)),
        ("analysis", WorkerKind::Analysis, findings_output()),
        ("visualization", WorkerKind::Visualization, chart_output()),
        ("writer", WorkerKind::Writer, document_output()),
    ] {
        state.record(StepRecord::resolved(id.into(), kind, StepOutcome::succeeded(output)));
    }
    state.finish(PipelineStatus::Succeeded);
    state
}

#[rstest]
#[case("Brainstorm ideas about survival")]
#[case("Compare survival between age groups")]
#[case("Plot survival by stage")]
#[case("Write a report on the findings")]
#[case("Brainstorm, test, plot and write it all up")]
#[case("Test H2")]
#[case("Test hypothesis #3 and chart it")]
#[case("")]
fn test_every_built_plan_is_acyclic(#[case] text: &str) {
    let builder = PlanBuilder::new();
    let earlier = prior_with_everything();
    let request = Request::new(text);

    for intent in Intent::ALL {
        for prior in [None, Some(&earlier)] {
            if let Ok(plan) = builder.build(intent, &request, prior) {
                assert_acyclic(&plan);
                assert_eq!(plan.intent, intent);
                let last = plan.steps.last().unwrap();
                assert!(
                    last.worker().is_some() || plan.clarification().is_some(),
                    "the final step is always dispatched"
                );
            }
        }
    }
}

#[rstest]
#[case("Brainstorm ideas about survival")]
#[case("Analyze survival by age, plot it, and write a short report")]
#[case("Test H2 and plot the result")]
#[case("what now?")]
#[tokio::test]
async fn test_classification_is_deterministic(#[case] text: &str) {
    let classifier = KeywordClassifier::new();
    let request = Request::new(text);
    let first = classifier.classify(&request, None).await.unwrap();
    for _ in 0..5 {
        assert_eq!(classifier.classify(&request, None).await.unwrap(), first);
    }
    assert_eq!(KeywordClassifier::detect(text), first);
}

#[rstest]
#[case(0)]
#[case(1)]
#[case(2)]
#[case(3)]
#[tokio::test]
async fn test_retries_record_exactly_one_accepted_result(#[case] failures: usize) {
    let mut script: Vec<Result<_, WorkerFailure>> = (0..failures)
        .map(|_| Err(WorkerFailure::transient("rate limited")))
        .collect();
    script.push(Ok(findings_output()));
    let analysis = Arc::new(ScriptedWorker::new(WorkerKind::Analysis, script));

    let coordinator = Coordinator::new(
        WorkerRegistry::new().with_worker(analysis.clone()),
        Arc::new(KeywordClassifier::new()),
    )
    .with_retry_policy(RetryPolicy::immediate(3));

    let run = coordinator
        .run(Request::new("Compare survival between age groups"), None)
        .await;

    let record = run.state.record_for(&StepId::from("analysis")).unwrap();
    assert_eq!(record.accepted_attempts(), 1);
    assert_eq!(record.attempts.len(), failures + 1);
    assert_eq!(run.state.records.len(), 1, "one record per step");
    assert_eq!(run.state.status, PipelineStatus::Succeeded);
}

#[tokio::test]
async fn test_worker_context_holds_only_its_dependencies() {
    let ideation = Arc::new(ScriptedWorker::succeeding(WorkerKind::Ideation, hypotheses_output(2)));
    let analysis = Arc::new(ScriptedWorker::succeeding(WorkerKind::Analysis, findings_output()));
    let visualization = Arc::new(ScriptedWorker::succeeding(WorkerKind::Visualization, chart_output()));
    let writer = Arc::new(ScriptedWorker::succeeding(WorkerKind::Writer, document_output()));
    let coordinator = Coordinator::new(
        WorkerRegistry::new()
            .with_worker(ideation.clone())
            .with_worker(analysis.clone())
            .with_worker(visualization.clone())
            .with_worker(writer.clone()),
        Arc::new(KeywordClassifier::new()),
    );

    let run = coordinator
        .run(
            Request::new("Brainstorm hypotheses, then test the best one, plot it and write a report"),
            None,
        )
        .await;
    let plan = run.state.plan.clone().unwrap();

    for (worker, id) in [
        (&ideation, "ideation"),
        (&analysis, "analysis"),
        (&visualization, "visualization"),
        (&writer, "writer"),
    ] {
        let context = &worker.contexts()[0];
        let step = plan.step(&StepId::from(id)).unwrap();
        let inputs: Vec<&StepId> = context.inputs.keys().collect();
        let mut declared: Vec<&StepId> = step.depends_on.iter().collect();
        declared.sort();
        assert_eq!(inputs, declared, "context of {} leaks undeclared inputs", id);
        assert_eq!(context.session.pipeline_id, run.state.id);
    }
}
