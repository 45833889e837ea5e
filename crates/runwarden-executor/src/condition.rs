use runwarden_common::types::{StepCondition, StepStatus};

/// Decides whether a step whose dependencies are all terminal should run.
///
/// A skipped dependency counts as neither success nor failure, so it blocks
/// `OnSuccess` without satisfying `OnFailure`. Root steps have no
/// dependencies: `OnSuccess` and `Always` run, `OnFailure` never does.
pub fn should_run(condition: StepCondition, dependencies: &[StepStatus]) -> bool {
    match condition {
        StepCondition::OnSuccess => dependencies.iter().all(|s| *s == StepStatus::Succeeded),
        StepCondition::OnFailure => dependencies.contains(&StepStatus::Failed),
        StepCondition::Always => true,
    }
}
