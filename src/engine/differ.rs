//! Drift computation and display

use anyhow::{Context, Result};
use colored::Colorize;
use rabbitkit::{Catalog, Drift, Reconciler};

use crate::ui;

/// Drift of one catalog user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserDiff {
    pub name: String,
    pub drift: Drift,
}

/// Compute drift for every catalog user that is out of sync, in name order.
pub fn compute_diffs(reconciler: &Reconciler, catalog: &Catalog) -> Result<Vec<UserDiff>> {
    let mut diffs = Vec::new();
    for (name, entry) in catalog {
        let drift = reconciler
            .plan(&entry.desired)
            .with_context(|| format!("Failed to compare user '{name}'"))?;
        if drift.has_changes() {
            diffs.push(UserDiff {
                name: name.clone(),
                drift,
            });
        }
    }
    Ok(diffs)
}

/// Symbol and description of a drift.
pub fn describe(drift: &Drift) -> (char, String) {
    match drift {
        Drift::InSync => ('=', "in sync".to_string()),
        Drift::Create { tags, admin } => {
            let mut desc = format!("(not present) → tags: {}", ui::tag_list(tags));
            if *admin {
                desc.push_str(", administrator");
            }
            ('+', desc)
        }
        Drift::Destroy => ('-', "(will remove)".to_string()),
        Drift::Update { tags, admin } => {
            let mut parts = Vec::new();
            if let Some((from, to)) = tags {
                parts.push(format!(
                    "tags: {} → {}",
                    ui::tag_list(from),
                    ui::tag_list(to)
                ));
            }
            if let Some((from, to)) = admin {
                parts.push(format!("admin: {from} → {to}"));
            }
            ('~', parts.join("; "))
        }
    }
}

/// Display a list of diffs in a user-friendly format
pub fn display_diff(diffs: &[UserDiff]) {
    if diffs.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "User Diff".bold()
    );
    println!("│");

    for diff in diffs {
        let (symbol, desc) = describe(&diff.drift);
        let symbol = match symbol {
            '+' => "+".green(),
            '-' => "-".red(),
            '~' => "~".yellow(),
            _ => "?".dimmed(),
        };
        println!("│   {} {:<24} {}", symbol, diff.name, desc.dimmed());
    }

    let count = |c: char| diffs.iter().filter(|d| describe(&d.drift).0 == c).count();

    println!("│");
    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes ({} to create, {} to modify, {} to remove)",
        diffs.len().to_string().bold(),
        count('+').to_string().green(),
        count('~').to_string().yellow(),
        count('-').to_string().red()
    );
    println!("└─────────────────────────────────────────────────────┘");
}
