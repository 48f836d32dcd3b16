//! Backend abstraction for rabbitmqctl.
//!
//! The [`Backend`] trait is the single seam between the convergence logic and
//! the outside world, allowing for different implementations (real CLI,
//! in-memory broker for testing).

pub mod mock;
pub mod rabbitmqctl;

use crate::error::Result;
use std::time::Duration;

/// Runs administrative commands against the broker.
///
/// Implementations must return only once the command has finished or been
/// terminated: a call that exceeds `timeout` fails with
/// [`Error::Timeout`](crate::Error::Timeout) and leaves no process behind.
pub trait Backend: Send + Sync {
    /// Run the CLI with `args` and return its standard output.
    fn run(&self, args: &[&str], timeout: Duration) -> Result<String>;

    /// Human-readable name of the executable, for messages.
    fn program(&self) -> String {
        "rabbitmqctl".to_string()
    }
}

/// Format a command line for error messages and logs.
///
/// The password argument of `add_user` is masked.
pub fn command_line(program: &str, args: &[&str]) -> String {
    let secret = args
        .iter()
        .position(|a| *a == "add_user")
        .map(|i| i + 2);

    let mut parts = vec![program.to_string()];
    parts.extend(args.iter().enumerate().map(|(i, a)| {
        if Some(i) == secret {
            "********".to_string()
        } else {
            (*a).to_string()
        }
    }));
    parts.join(" ")
}

/// Get the default backend (real rabbitmqctl).
pub fn default_backend() -> Result<rabbitmqctl::CtlBackend> {
    rabbitmqctl::CtlBackend::new()
}
