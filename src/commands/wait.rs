use anyhow::{Context as AnyhowContext, Result};
use rabbitkit::retry::{LogCallback, RetryCallback};
use rabbitkit::{Error, Reconciler, RetryPolicy};
use std::time::Duration;

use crate::Context;
use crate::cli::WaitArgs;
use crate::commands;
use crate::progress;
use crate::ui;

pub fn run(ctx: &Context, args: &WaitArgs) -> Result<()> {
    let file = commands::load_catalog(args.file.as_deref(), false)?;
    let reconciler = commands::reconciler(ctx, &file.settings)?;
    let policy = policy_from(&file.settings.wait_policy(), args)?;
    wait_with_spinner(ctx, &reconciler, &policy)
}

/// Apply `--attempts`/`--step`/`--timeout` over a base policy.
fn policy_from(base: &RetryPolicy, args: &WaitArgs) -> Result<RetryPolicy> {
    RetryPolicy::try_new(
        args.attempts.unwrap_or(base.max_attempts),
        args.step.map_or(base.step_delay, Duration::from_secs),
        args.timeout.map_or(base.attempt_timeout, Duration::from_secs),
    )
    .context("Invalid wait settings")
}

/// Updates the spinner between attempts and logs the failure.
struct SpinnerCallback<'a> {
    pb: &'a indicatif::ProgressBar,
}

impl RetryCallback for SpinnerCallback<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        LogCallback.on_retry(attempt, max_attempts, error, delay);
        self.pb.set_message(format!(
            "Waiting for RabbitMQ (attempt {}/{} failed, next in {}s)",
            attempt,
            max_attempts,
            delay.as_secs()
        ));
    }
}

/// Block until the broker answers, showing progress.
pub fn wait_with_spinner(ctx: &Context, reconciler: &Reconciler, policy: &RetryPolicy) -> Result<()> {
    if ctx.quiet {
        reconciler
            .wait_for_ready(policy, Some(&LogCallback))
            .context("RabbitMQ did not become ready")?;
        return Ok(());
    }

    let pb = progress::spinner("Waiting for RabbitMQ...");
    let callback = SpinnerCallback { pb: &pb };
    match reconciler.wait_for_ready(policy, Some(&callback)) {
        Ok(elapsed) => {
            progress::finish_success(
                &pb,
                &format!("RabbitMQ is online after {} seconds", elapsed.as_secs()),
            );
            Ok(())
        }
        Err(e) => {
            progress::finish_error(&pb, "RabbitMQ did not become ready");
            let category = e.category();
            ui::warn(category.description());
            ui::dim(category.advice());
            Err(e).context("RabbitMQ did not become ready")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(attempts: Option<u32>, step: Option<u64>, timeout: Option<u64>) -> WaitArgs {
        WaitArgs {
            attempts,
            step,
            timeout,
            file: None,
        }
    }

    #[test]
    fn test_policy_from_defaults() {
        let policy = policy_from(&RetryPolicy::readiness(), &args(None, None, None)).unwrap();
        assert_eq!(policy, RetryPolicy::readiness());
    }

    #[test]
    fn test_policy_from_overrides() {
        let policy = policy_from(&RetryPolicy::readiness(), &args(Some(3), Some(1), None)).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.step_delay, Duration::from_secs(1));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
        assert_eq!(policy.budget(), Duration::from_secs(3));
    }

    #[test]
    fn test_policy_from_rejects_zero_attempts() {
        let err = policy_from(&RetryPolicy::readiness(), &args(Some(0), None, None)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidPolicy { .. })
        ));
    }
}
