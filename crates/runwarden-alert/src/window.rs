use runwarden_common::types::{AlertCondition, MetricSample};

/// A window of samples reduced to the value a condition compares.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowValue {
    /// Average for level conditions, last minus first for change conditions.
    pub current: f64,
    /// First sample of the window; only set for change conditions.
    pub previous: Option<f64>,
}

/// Reduces time-ordered samples for `condition`. `None` for an empty window.
pub fn reduce(condition: AlertCondition, samples: &[MetricSample]) -> Option<WindowValue> {
    let first = samples.first()?.value;
    if condition.is_change() {
        let last = samples.last().map_or(first, |s| s.value);
        return Some(WindowValue {
            current: last - first,
            previous: Some(first),
        });
    }
    let sum: f64 = samples.iter().map(|s| s.value).sum();
    Some(WindowValue {
        current: sum / samples.len() as f64,
        previous: None,
    })
}
