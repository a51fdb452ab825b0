use crate::gateway::ArtifactKind;
use crate::workers::{WorkerFailure, WorkerKind, WorkerOutput};
use std::collections::HashSet;

/// Check a worker's output against the fixed contract for its kind.
///
/// Anything that fails becomes an invalid-output-shape failure and is never
/// passed to dependent steps.
pub fn validate_output(
    expected: WorkerKind,
    output: WorkerOutput,
) -> Result<WorkerOutput, WorkerFailure> {
    if output.kind() != expected {
        return Err(WorkerFailure::invalid_output(format!(
            "expected {} output, got {}",
            expected,
            output.kind()
        )));
    }

    match &output {
        WorkerOutput::Ideation { hypotheses } => {
            if hypotheses.is_empty() {
                return Err(WorkerFailure::invalid_output("no hypotheses returned"));
            }
            let mut ids = HashSet::new();
            for h in hypotheses {
                if h.statement.trim().is_empty() {
                    return Err(WorkerFailure::invalid_output(format!(
                        "hypothesis {} has no statement",
                        h.id
                    )));
                }
                if !ids.insert(h.id.to_uppercase()) {
                    return Err(WorkerFailure::invalid_output(format!(
                        "duplicate hypothesis id {}",
                        h.id
                    )));
                }
            }
        }
        WorkerOutput::Analysis(findings) => {
            if findings.summary.trim().is_empty() {
                return Err(WorkerFailure::invalid_output("analysis has no finding summary"));
            }
            if findings.dataset.trim().is_empty() {
                return Err(WorkerFailure::invalid_output(
                    "analysis does not name the dataset it used",
                ));
            }
            if let Some(p) = findings.p_value {
                if !(0.0..=1.0).contains(&p) {
                    return Err(WorkerFailure::invalid_output(format!(
                        "p-value {} outside [0, 1]",
                        p
                    )));
                }
            }
            if let Some(stat) = findings.statistics.iter().find(|s| !s.value.is_finite()) {
                return Err(WorkerFailure::invalid_output(format!(
                    "statistic {} is not a finite number",
                    stat.name
                )));
            }
        }
        WorkerOutput::Visualization { artifacts } => {
            if artifacts.is_empty() {
                return Err(WorkerFailure::invalid_output("no chart artifacts returned"));
            }
            for artifact in artifacts {
                if !artifact.is_well_formed() || artifact.kind != ArtifactKind::Chart {
                    return Err(WorkerFailure::invalid_output(format!(
                        "'{}' is not a chart artifact reference",
                        artifact.location
                    )));
                }
            }
        }
        WorkerOutput::Writer { document } => {
            if !document.is_well_formed() || document.kind != ArtifactKind::Document {
                return Err(WorkerFailure::invalid_output(format!(
                    "'{}' is not a document reference",
                    document.location
                )));
            }
        }
    }

    Ok(output)
}
