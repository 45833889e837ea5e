//! Thing runner backed by local processes.
//!
//! Each thing id maps to a configured command. Step parameters are exported
//! as `RUNWARDEN_PARAM_<KEY>` environment variables (key upper-cased, every
//! character outside `[A-Z0-9]` replaced by `_`) and the profile as
//! `RUNWARDEN_PROFILE_ID`. A non-zero exit status is a failed attempt.

use crate::config::ThingCommand;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use runwarden_executor::{ThingOutcome, ThingRunner};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Longest stdout/stderr kept on a step result.
const MAX_OUTPUT_CHARS: usize = 8192;

pub struct ProcessThingRunner {
    things: HashMap<String, ThingCommand>,
}

impl ProcessThingRunner {
    pub fn new(things: HashMap<String, ThingCommand>) -> Self {
        Self { things }
    }
}

pub fn param_env_name(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            let c = c.to_ascii_uppercase();
            if c.is_ascii_alphanumeric() {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("RUNWARDEN_PARAM_{suffix}")
}

fn tail(text: &[u8]) -> String {
    let text = String::from_utf8_lossy(text);
    let text = text.trim_end();
    if text.len() <= MAX_OUTPUT_CHARS {
        return text.to_string();
    }
    let mut start = text.len() - MAX_OUTPUT_CHARS;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

#[async_trait]
impl ThingRunner for ProcessThingRunner {
    fn has_thing(&self, thing_id: &str) -> bool {
        self.things.contains_key(thing_id)
    }

    async fn execute(
        &self,
        thing_id: &str,
        profile_id: &str,
        parameters: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<ThingOutcome> {
        let thing = self
            .things
            .get(thing_id)
            .ok_or_else(|| anyhow!("no command configured for thing '{thing_id}'"))?;

        let mut cmd = Command::new(&thing.command);
        cmd.args(&thing.args)
            .envs(&thing.env)
            .env("RUNWARDEN_PROFILE_ID", profile_id)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in parameters {
            cmd.env(param_env_name(key), value);
        }
        if let Some(dir) = &thing.working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| anyhow!("failed to start '{}' for thing '{thing_id}': {e}", thing.command))?;
        tracing::debug!(thing_id, pid = ?child.id(), "Thing process started");

        // Dropping the child on cancellation or timeout kills it.
        tokio::select! {
            output = child.wait_with_output() => {
                let output = output?;
                let code = output.status.code();
                if output.status.success() {
                    Ok(ThingOutcome::succeeded(tail(&output.stdout)))
                } else {
                    let stderr = tail(&output.stderr);
                    let error = if stderr.is_empty() {
                        format!("exited with {}", output.status)
                    } else {
                        stderr
                    };
                    Ok(ThingOutcome {
                        output: tail(&output.stdout),
                        ..ThingOutcome::failed(error, code)
                    })
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!(thing_id, "Thing process killed on cancellation");
                Ok(ThingOutcome::failed("canceled", None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_names_are_shell_safe() {
        assert_eq!(param_env_name("trigger.source"), "RUNWARDEN_PARAM_TRIGGER_SOURCE");
        assert_eq!(param_env_name("target-host"), "RUNWARDEN_PARAM_TARGET_HOST");
    }

    #[tokio::test]
    async fn unknown_thing_is_an_error() {
        let runner = ProcessThingRunner::new(HashMap::new());
        assert!(!runner.has_thing("missing"));
        let result = runner
            .execute("missing", "", &HashMap::new(), CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[cfg(unix)]
    fn sh(script: &str) -> ThingCommand {
        ThingCommand {
            command: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: HashMap::new(),
            working_dir: None,
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exports_profile_and_parameters() {
        let runner = ProcessThingRunner::new(HashMap::from([(
            "echo".to_string(),
            sh("echo \"$RUNWARDEN_PROFILE_ID:$RUNWARDEN_PARAM_TRIGGER_SOURCE\""),
        )]));
        let params = HashMap::from([("trigger.source".to_string(), "manual".to_string())]);
        let outcome = runner
            .execute("echo", "prod", &params, CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.output, "prod:manual");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_is_a_failure() {
        let runner = ProcessThingRunner::new(HashMap::from([(
            "fail".to_string(),
            sh("echo broken >&2; exit 3"),
        )]));
        let outcome = runner
            .execute("fail", "", &HashMap::new(), CancellationToken::new())
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, Some(3));
        assert_eq!(outcome.error.as_deref(), Some("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_stops_the_process() {
        let runner = ProcessThingRunner::new(HashMap::from([(
            "sleep".to_string(),
            sh("sleep 30"),
        )]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let outcome = runner
            .execute("sleep", "", &HashMap::new(), cancel)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
