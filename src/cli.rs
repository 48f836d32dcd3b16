use clap::{Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser)]
#[command(name = "rabbitsync")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Converge RabbitMQ users and tags from a declarative catalog", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to rabbitmqctl (default: search PATH and common sbin locations)
    #[arg(long, env = "RABBITSYNC_CTL", global = true)]
    pub ctl: Option<String>,

    /// HOME directory rabbitmqctl runs with
    #[arg(long, env = "RABBITSYNC_HOME", global = true)]
    pub home: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show broker version and tag support
    Status(StatusArgs),

    /// List users on the broker
    Users(UsersArgs),

    /// Show what apply would change
    Diff(DiffArgs),

    /// Converge broker users to the catalog
    Apply(ApplyArgs),

    /// Wait until the broker answers commands
    Wait(WaitArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Inspection
// ============================================================================

#[derive(Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Catalog file whose settings to use
    #[arg(short, long)]
    pub file: Option<String>,
}

#[derive(Parser)]
pub struct UsersArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Catalog file whose settings to use
    #[arg(short, long)]
    pub file: Option<String>,
}

// ============================================================================
// Convergence
// ============================================================================

#[derive(Parser)]
pub struct DiffArgs {
    /// Catalog file (default: ~/.config/rabbitsync/users.toml)
    #[arg(short, long)]
    pub file: Option<String>,
}

#[derive(Parser)]
pub struct ApplyArgs {
    /// Catalog file (default: ~/.config/rabbitsync/users.toml)
    #[arg(short, long)]
    pub file: Option<String>,

    /// Dry run - show what would be done
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Wait for the broker to be ready first
    #[arg(short, long)]
    pub wait: bool,
}

// ============================================================================
// Readiness
// ============================================================================

#[derive(Parser)]
pub struct WaitArgs {
    /// Maximum number of attempts (at least 1)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub attempts: Option<u32>,

    /// Seconds between attempts
    #[arg(long)]
    pub step: Option<u64>,

    /// Deadline for each attempt, in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Catalog file whose settings to use
    #[arg(short, long)]
    pub file: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_rejects_zero_attempts() {
        assert!(Cli::try_parse_from(["rabbitsync", "wait", "--attempts", "0"]).is_err());

        let cli = Cli::try_parse_from(["rabbitsync", "wait", "--attempts", "1"]).unwrap();
        let Command::Wait(args) = cli.command else {
            panic!("expected wait");
        };
        assert_eq!(args.attempts, Some(1));
    }

    #[test]
    fn test_users_has_no_renew_flag() {
        // Each run starts with an empty cache, so there is nothing to renew
        assert!(Cli::try_parse_from(["rabbitsync", "users", "--renew"]).is_err());
        assert!(Cli::try_parse_from(["rabbitsync", "users", "--json"]).is_ok());
    }
}
