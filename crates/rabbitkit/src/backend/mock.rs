//! In-memory broker backend for testing.
//!
//! Understands the handful of rabbitmqctl commands this crate issues, keeps
//! users in memory, and records every command so tests can assert on exactly
//! what would have been sent to a real node.

use crate::backend::{Backend, command_line};
use crate::error::{Error, Result};
use crate::types::{ADMIN_TAG, UserTags};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct MockState {
    status: String,
    tagged: bool,
    users: BTreeMap<String, UserTags>,
    failures: VecDeque<Error>,
    failing_verbs: Vec<String>,
    commands: Vec<Vec<String>>,
}

/// A test-double broker that records commands and serves listings.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<MockState>,
}

impl MockBackend {
    /// A broker reporting `version` (e.g. `"3.8.9"`) in its status output.
    ///
    /// The listing format follows the version: tagged above 2.41, admin
    /// flags otherwise.
    pub fn with_version(version: &str) -> Self {
        let tagged = crate::version::parse_dotted(version).is_some_and(|v| v.supports_tags());
        let status = format!(
            "Status of node rabbit@localhost ...\n[{{pid,4242}},\n {{running_applications,[{{rabbit,\"RabbitMQ\",\"{version}\"}}]}}]\n"
        );
        Self::with_status(status, tagged)
    }

    /// A broker with arbitrary status output and an explicit listing format.
    pub fn with_status(status: impl Into<String>, tagged: bool) -> Self {
        Self {
            state: Mutex::new(MockState {
                status: status.into(),
                tagged,
                ..MockState::default()
            }),
        }
    }

    /// Add a live user.
    pub fn with_user<I, S>(self, name: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lock()
            .users
            .insert(name.to_string(), UserTags::from_tags(tags));
        self
    }

    /// Replace the status output (the cached version should not notice).
    pub fn set_status(&self, status: impl Into<String>) {
        self.lock().status = status.into();
    }

    /// Make the next command fail with `error`. Queued failures are consumed in order.
    pub fn fail_next(&self, error: Error) {
        self.lock().failures.push_back(error);
    }

    /// Make the next `count` commands fail as an unreachable node would.
    pub fn fail_times(&self, count: usize) {
        for _ in 0..count {
            self.fail_next(Error::ExecutionFailure {
                command: "rabbitmqctl".to_string(),
                code: Some(69),
                stderr: "Error: unable to perform an operation on node".to_string(),
            });
        }
    }

    /// Make the next command whose verb is `verb` fail; other commands run.
    pub fn fail_on(&self, verb: &str) {
        self.lock().failing_verbs.push(verb.to_string());
    }

    /// All commands received, in order, without the `-q` flag.
    pub fn commands(&self) -> Vec<Vec<String>> {
        self.lock().commands.clone()
    }

    /// Commands that change broker state.
    pub fn mutations(&self) -> Vec<Vec<String>> {
        self.commands()
            .into_iter()
            .filter(|c| {
                c.first().is_some_and(|verb| {
                    matches!(
                        verb.as_str(),
                        "add_user" | "delete_user" | "set_user_tags" | "set_admin" | "clear_admin"
                    )
                })
            })
            .collect()
    }

    /// Count of commands whose verb is `verb`.
    pub fn count(&self, verb: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.first().is_some_and(|v| v == verb))
            .count()
    }

    /// Live tags of a user, as the broker holds them.
    pub fn user(&self, name: &str) -> Option<UserTags> {
        self.lock().users.get(name).cloned()
    }

    /// Clear all recorded commands.
    pub fn clear_commands(&self) {
        self.lock().commands.clear();
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl MockState {
    fn listing(&self) -> String {
        let mut out = String::from("Listing users ...\n");
        for (name, tags) in &self.users {
            if self.tagged {
                let all: Vec<String> = tags.effective().into_iter().collect();
                out.push_str(&format!("{name}\t[{}]\n", all.join(", ")));
            } else {
                out.push_str(&format!("{name}\t{}\n", tags.admin));
            }
        }
        out
    }

    fn set_admin(&mut self, name: &str, admin: bool) -> Result<String> {
        let user = self.users.get_mut(name).ok_or_else(|| no_such_user(name))?;
        user.admin = admin;
        Ok(String::new())
    }
}

fn no_such_user(name: &str) -> Error {
    Error::ExecutionFailure {
        command: format!("rabbitmqctl {name}"),
        code: Some(70),
        stderr: format!("Error: no_such_user: {name}"),
    }
}

impl Backend for MockBackend {
    fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let mut state = self.lock();
        let args: Vec<&str> = args.iter().copied().filter(|a| *a != "-q").collect();
        state
            .commands
            .push(args.iter().map(ToString::to_string).collect());

        if timeout.is_zero() {
            return Err(Error::Timeout {
                command: command_line("rabbitmqctl", &args),
                timeout,
            });
        }
        if let Some(err) = state.failures.pop_front() {
            return Err(err);
        }
        let verb = args.first().copied().unwrap_or_default();
        if let Some(i) = state.failing_verbs.iter().position(|v| v == verb) {
            state.failing_verbs.remove(i);
            return Err(Error::ExecutionFailure {
                command: command_line("rabbitmqctl", &args),
                code: Some(70),
                stderr: format!("Error: {verb} rejected"),
            });
        }

        match args.as_slice() {
            ["status"] => Ok(state.status.clone()),
            ["list_users"] => Ok(state.listing()),
            ["list_channels"] => Ok("Listing channels ...\n".to_string()),
            ["add_user", name, _password] => {
                if state.users.contains_key(*name) {
                    return Err(Error::ExecutionFailure {
                        command: format!("rabbitmqctl add_user {name}"),
                        code: Some(70),
                        stderr: format!("Error: user_already_exists: {name}"),
                    });
                }
                state.users.insert((*name).to_string(), UserTags::default());
                Ok(String::new())
            }
            ["delete_user", name] => {
                state.users.remove(*name).ok_or_else(|| no_such_user(name))?;
                Ok(String::new())
            }
            ["set_user_tags", name, tags @ ..] => {
                let user = state.users.get_mut(*name).ok_or_else(|| no_such_user(name))?;
                *user = UserTags::from_tags(tags.iter().copied());
                Ok(String::new())
            }
            ["set_admin", name] => state.set_admin(name, true),
            ["clear_admin", name] => state.set_admin(name, false),
            _ => Err(Error::ExecutionFailure {
                command: command_line("rabbitmqctl", &args),
                code: Some(64),
                stderr: "Error: unknown command".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_lists_in_version_format() {
        let tagged = MockBackend::with_version("3.8.9").with_user("alice", [ADMIN_TAG, "monitoring"]);
        let out = tagged.run(&["-q", "list_users"], Duration::from_secs(1)).unwrap();
        assert!(out.contains("alice\t[administrator, monitoring]"));

        let legacy = MockBackend::with_version("2.4.1").with_user("bob", [ADMIN_TAG]);
        let out = legacy.run(&["-q", "list_users"], Duration::from_secs(1)).unwrap();
        assert!(out.contains("bob\ttrue"));
    }

    #[test]
    fn test_mock_records_and_fails_on_demand() {
        let mock = MockBackend::with_version("3.8.9");
        mock.fail_times(1);
        assert!(mock.run(&["list_channels"], Duration::from_secs(1)).is_err());
        assert!(mock.run(&["list_channels"], Duration::from_secs(1)).is_ok());
        assert_eq!(mock.count("list_channels"), 2);
    }

    #[test]
    fn test_mock_applies_mutations() {
        let mock = MockBackend::with_version("3.8.9");
        mock.run(&["add_user", "carol", "pw"], Duration::from_secs(1)).unwrap();
        mock.run(&["set_user_tags", "carol", "administrator", "monitoring"], Duration::from_secs(1))
            .unwrap();
        let carol = mock.user("carol").unwrap();
        assert!(carol.admin);
        assert_eq!(carol.sorted_custom(), vec!["monitoring"]);
        assert_eq!(mock.mutations().len(), 2);
    }
}
