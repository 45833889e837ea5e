//! Helpers shared by action handlers.

use runwarden_common::types::{Alert, AlertRule};
use serde_json::{json, Value};

/// Longest response body kept in an error message.
pub const MAX_BODY_LENGTH: usize = 4000;

/// Truncates to at most `max_len` bytes without splitting a character.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

/// JSON document describing a fired alert and the rule behind it.
pub fn alert_payload(rule: &AlertRule, alert: &Alert) -> Value {
    json!({
        "alert_id": alert.id,
        "rule_id": rule.id,
        "rule_name": rule.name,
        "metric": rule.metric_name,
        "condition": rule.condition,
        "severity": alert.severity,
        "status": alert.status,
        "message": alert.message,
        "current_value": alert.current_value,
        "threshold": alert.threshold,
        "tags": rule.tags,
        "fired_at": alert.fired_at.to_rfc3339(),
    })
}

/// Replaces `{{placeholder}}` markers with alert fields.
pub fn render_template(template: &str, rule: &AlertRule, alert: &Alert) -> String {
    template
        .replace("{{rule_id}}", &rule.id)
        .replace("{{rule_name}}", &rule.name)
        .replace("{{metric}}", &rule.metric_name)
        .replace("{{severity}}", &alert.severity.to_string())
        .replace("{{value}}", &format!("{:.2}", alert.current_value))
        .replace("{{threshold}}", &format!("{:.2}", alert.threshold))
        .replace("{{message}}", &alert.message)
        .replace("{{alert_id}}", &alert.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 5), "hello... [truncated]");
        assert_eq!(truncate_string("héllo", 2), "h... [truncated]");
    }
}
