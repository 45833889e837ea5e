use runwarden_common::types::AlertCondition;

/// Tolerance for `Equal` and `NotEqual`.
pub const EQUALITY_EPSILON: f64 = 1e-4;

/// Applies an alert condition.
///
/// For level conditions `current` is the window average. For change
/// conditions it is the window's first-to-last delta and `previous` is the
/// first value; `PercentChange` compares the raw ratio `|delta / previous|`
/// (0.2 means 20 %) and is false when `previous` is missing or zero.
///
/// ```
/// use runwarden_alert::condition::compare;
/// use runwarden_common::types::AlertCondition;
///
/// assert!(compare(AlertCondition::GreaterThan, 100.0, 90.0, None));
/// assert!(!compare(AlertCondition::Equal, 90.1, 90.0, None));
/// assert!(compare(AlertCondition::PercentChange, 30.0, 0.25, Some(100.0)));
/// ```
pub fn compare(condition: AlertCondition, current: f64, threshold: f64, previous: Option<f64>) -> bool {
    match condition {
        AlertCondition::GreaterThan => current > threshold,
        AlertCondition::GreaterThanOrEqual => current >= threshold,
        AlertCondition::LessThan => current < threshold,
        AlertCondition::LessThanOrEqual => current <= threshold,
        AlertCondition::Equal => (current - threshold).abs() < EQUALITY_EPSILON,
        AlertCondition::NotEqual => (current - threshold).abs() >= EQUALITY_EPSILON,
        AlertCondition::AbsoluteChange => current.abs() > threshold,
        AlertCondition::PercentChange => match previous {
            Some(previous) if previous.abs() >= f64::EPSILON => (current / previous).abs() > threshold,
            _ => false,
        },
    }
}
