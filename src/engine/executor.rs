//! Execution engine - confirms, converges users one at a time, summarizes

use anyhow::Result;
use colored::Colorize;
use rabbitkit::{ApplyResult, Catalog, Reconciler};

use crate::progress;

use super::differ::{compute_diffs, display_diff};

/// Options for execution
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Don't make changes, just show what would happen
    pub dry_run: bool,
    /// Skip confirmation prompts
    pub yes: bool,
}

/// Summary of execution results
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ExecuteSummary {
    pub created: usize,
    pub modified: usize,
    pub removed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub no_change: usize,
}

impl ExecuteSummary {
    pub fn total_changes(&self) -> usize {
        self.created + self.modified + self.removed
    }

    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, result: &ApplyResult) {
        match result {
            ApplyResult::NoChange => self.no_change += 1,
            ApplyResult::Created => self.created += 1,
            ApplyResult::Modified => self.modified += 1,
            ApplyResult::Removed => self.removed += 1,
            ApplyResult::Skipped { .. } => self.skipped += 1,
        }
    }
}

/// Show drift, confirm, then converge each drifted user.
///
/// Users are converged sequentially. A failing user is reported and counted;
/// the remaining users are still applied.
pub fn execute(
    reconciler: &Reconciler,
    catalog: &Catalog,
    opts: &ExecuteOptions,
) -> Result<ExecuteSummary> {
    // 1. Compute and display what will change
    let diffs = compute_diffs(reconciler, catalog)?;
    display_diff(&diffs);

    if diffs.is_empty() {
        return Ok(ExecuteSummary {
            no_change: catalog.len(),
            ..Default::default()
        });
    }

    // 2. Confirm (unless --yes)
    if !opts.yes && !opts.dry_run && !confirm_proceed()? {
        println!();
        println!("  {} Aborted", "✗".red());
        return Ok(ExecuteSummary {
            skipped: diffs.len(),
            ..Default::default()
        });
    }

    if opts.dry_run {
        println!();
        println!("  {} Dry run - no changes made", "ℹ".blue());
        return Ok(ExecuteSummary::default());
    }

    // 3. Converge one user at a time
    println!();
    println!("  {} Applying {} users...", "→".cyan(), diffs.len());

    let mut summary = ExecuteSummary {
        no_change: catalog.len() - diffs.len(),
        ..Default::default()
    };

    let pb = progress::bar(diffs.len() as u64, "Applying");
    for diff in &diffs {
        let Some(entry) = catalog.get(&diff.name) else {
            continue;
        };

        let symbol = match reconciler.converge(&entry.desired) {
            Ok(result) => {
                summary.record(&result);
                if result.is_change() { "✓" } else { "○" }
            }
            Err(e) => {
                summary.failed += 1;
                pb.suspend(|| {
                    println!("    {} {}: {}", "✗".red(), diff.name, e);
                });
                "✗"
            }
        };

        pb.set_message(format!("{} {}", symbol, diff.name));
        pb.inc(1);
    }
    pb.finish_and_clear();

    // 4. Summary
    print_summary(&summary);

    Ok(summary)
}

/// Confirm with user
fn confirm_proceed() -> Result<bool> {
    use dialoguer::Confirm;

    let confirmed = Confirm::new()
        .with_prompt("Continue?")
        .default(true)
        .interact()?;

    Ok(confirmed)
}

/// Print final summary
fn print_summary(summary: &ExecuteSummary) {
    println!();
    if summary.is_success() {
        println!("  {} Users converged successfully!", "✓".green().bold());
    } else {
        println!("  {} Users converged with errors", "⚠".yellow().bold());
    }

    if summary.created > 0 {
        println!("    • {} users created", summary.created);
    }
    if summary.modified > 0 {
        println!("    • {} users modified", summary.modified);
    }
    if summary.removed > 0 {
        println!("    • {} users removed", summary.removed);
    }
    if summary.skipped > 0 {
        println!("    • {} users skipped", summary.skipped);
    }
    if summary.failed > 0 {
        println!("    • {} {} failed", summary.failed, "users".red());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rabbitkit::backend::mock::MockBackend;
    use rabbitkit::types::catalog_from;
    use rabbitkit::{ADMIN_TAG, DesiredUser};

    fn yes() -> ExecuteOptions {
        ExecuteOptions {
            dry_run: false,
            yes: true,
        }
    }

    #[test]
    fn test_execute_converges_every_drifted_user() {
        let reconciler = Reconciler::with_backend(Box::new(
            MockBackend::with_version("3.8.9")
                .with_user("ops", [ADMIN_TAG])
                .with_user("guest", [ADMIN_TAG])
                .with_user("app", ["monitoring"]),
        ));
        let catalog = catalog_from([
            DesiredUser::new("ops").with_admin(true),
            DesiredUser::new("guest").absent(),
            DesiredUser::new("app").with_tags(["management"]),
            DesiredUser::new("new").with_password("pw"),
        ]);

        let summary = execute(&reconciler, &catalog, &yes()).unwrap();
        assert_eq!(
            summary,
            ExecuteSummary {
                created: 1,
                modified: 1,
                removed: 1,
                no_change: 1,
                ..Default::default()
            }
        );
        assert_eq!(summary.total_changes(), 3);

        // Second run finds nothing to do
        let again = execute(&reconciler, &catalog, &yes()).unwrap();
        assert_eq!(again.total_changes(), 0);
        assert_eq!(again.no_change, 4);
    }

    #[test]
    fn test_execute_continues_after_failure() {
        let reconciler = Reconciler::with_backend(Box::new(MockBackend::with_version("3.8.9")));
        let catalog = catalog_from([
            DesiredUser::new("nopw"),
            DesiredUser::new("withpw").with_password("pw"),
        ]);

        let summary = execute(&reconciler, &catalog, &yes()).unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.created, 1);
        assert!(!summary.is_success());
    }

    #[test]
    fn test_dry_run_changes_nothing() {
        let reconciler = Reconciler::with_backend(Box::new(MockBackend::with_version("3.8.9")));
        let catalog = catalog_from([DesiredUser::new("app").with_password("pw")]);
        let opts = ExecuteOptions {
            dry_run: true,
            yes: false,
        };

        let summary = execute(&reconciler, &catalog, &opts).unwrap();
        assert_eq!(summary, ExecuteSummary::default());
        assert!(!reconciler.user(&catalog["app"].desired).exists(true).unwrap());
    }

    #[test]
    fn test_record_counts_each_result() {
        let mut summary = ExecuteSummary::default();
        for result in [
            ApplyResult::Created,
            ApplyResult::Modified,
            ApplyResult::NoChange,
            ApplyResult::Skipped {
                reason: "aborted".to_string(),
            },
        ] {
            summary.record(&result);
        }
        assert_eq!(summary.total_changes(), 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.no_change, 1);
    }
}
