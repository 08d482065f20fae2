use crate::drift::DriftReport;
use crate::types::Action;

/// Bootstrap or drift always backs up; `force` only matters when nothing changed.
pub fn decide_action(report: &DriftReport, force: bool) -> Action {
    if report.bootstrapped || report.has_drift() {
        Action::Normal
    } else if force {
        Action::Forced
    } else {
        Action::Skipped
    }
}
