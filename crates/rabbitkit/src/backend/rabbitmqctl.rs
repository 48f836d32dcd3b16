//! Real RabbitMQ backend using `rabbitmqctl` commands.

use crate::backend::{Backend, command_line};
use crate::error::{Error, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use wait_timeout::ChildExt;

/// Home directory rabbitmqctl runs with unless told otherwise.
///
/// rabbitmqctl reads its Erlang cookie and config from `$HOME`; pinning it
/// keeps restricted environments (no home, read-only home) from failing.
pub const DEFAULT_HOME: &str = "/tmp";

/// Backend that executes real `rabbitmqctl` commands.
pub struct CtlBackend {
    /// Path to the rabbitmqctl executable
    ctl_path: PathBuf,
    /// Value of `HOME` for every invocation
    home: PathBuf,
}

impl CtlBackend {
    /// Create a new CtlBackend, locating rabbitmqctl.
    ///
    /// Returns an error if rabbitmqctl is not installed.
    pub fn new() -> Result<Self> {
        let ctl_path = find_rabbitmqctl()?;
        Ok(Self {
            ctl_path,
            home: PathBuf::from(DEFAULT_HOME),
        })
    }

    /// Create a backend for an explicit rabbitmqctl path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let ctl_path = path.into();
        if !ctl_path.exists() {
            return Err(Error::CtlNotFound);
        }
        Ok(Self {
            ctl_path,
            home: PathBuf::from(DEFAULT_HOME),
        })
    }

    /// Set the `HOME` directory passed to rabbitmqctl.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = home.into();
        self
    }

    /// Path of the executable in use.
    pub fn ctl_path(&self) -> &Path {
        &self.ctl_path
    }

    /// Start rabbitmqctl as the leader of a new process group.
    ///
    /// Distro wrappers re-exec through `su`, `sudo` or a shell, so the process
    /// doing the work is usually a descendant; the group lets [`terminate`]
    /// reach it.
    fn spawn(&self, args: &[&str]) -> Result<Child> {
        let mut command = Command::new(&self.ctl_path);
        command
            .args(args)
            .env("HOME", &self.home)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        command.spawn().map_err(|e| Error::ExecutionFailure {
            command: command_line(&self.program(), args),
            code: None,
            stderr: format!("failed to execute rabbitmqctl: {e}"),
        })
    }
}

impl Backend for CtlBackend {
    fn run(&self, args: &[&str], timeout: Duration) -> Result<String> {
        let command = command_line(&self.program(), args);
        if timeout.is_zero() {
            return Err(Error::Timeout { command, timeout });
        }

        log::trace!("Running: {command} (timeout {}s)", timeout.as_secs_f64());
        let mut child = self.spawn(args)?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let waited = child.wait_timeout(timeout);
        let status = match settle(&mut child, waited) {
            Ok(Some(status)) => status,
            Ok(None) => {
                // Readers are detached: a descendant that left the group may
                // still hold the pipes.
                drop((stdout, stderr));
                log::debug!("Timed out: {command}");
                return Err(Error::Timeout { command, timeout });
            }
            Err(e) => {
                drop((stdout, stderr));
                log::debug!("Wait failed for {command}: {e}");
                return Err(e.into());
            }
        };

        let stdout = join(stdout);
        let stderr = join(stderr);

        if !status.success() {
            return Err(Error::ExecutionFailure {
                command,
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(stdout)
    }

    fn program(&self) -> String {
        self.ctl_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "rabbitmqctl".to_string())
    }
}

/// Pass a clean exit through; on timeout or a failed wait, take the child
/// down before returning the outcome.
fn settle(
    child: &mut Child,
    waited: std::io::Result<Option<ExitStatus>>,
) -> std::io::Result<Option<ExitStatus>> {
    if !matches!(waited, Ok(Some(_))) {
        terminate(child);
    }
    waited
}

/// Kill the child and its whole process group, then reap the child.
///
/// The group is signalled before the reap so its id cannot be reused.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    kill_group(child.id());
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // SAFETY: killpg takes plain integers and touches no memory of ours.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        log::debug!(
            "killpg({pgid}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Read a child pipe to the end on a separate thread.
///
/// Both pipes are drained concurrently so a chatty command cannot block on a
/// full pipe while we wait for it to exit.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            String::from_utf8_lossy(&buffer).to_string()
        })
    })
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Find the rabbitmqctl executable path.
fn find_rabbitmqctl() -> Result<PathBuf> {
    if let Ok(path) = which::which("rabbitmqctl") {
        return Ok(path);
    }

    // Check common locations (sbin is often not on a regular user's PATH)
    let paths = [
        "/usr/sbin/rabbitmqctl",
        "/usr/local/sbin/rabbitmqctl",
        "/opt/homebrew/sbin/rabbitmqctl",
        "/usr/lib/rabbitmq/bin/rabbitmqctl",
    ];

    paths
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or(Error::CtlNotFound)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Instant;

    /// A backend whose "rabbitmqctl" is `/bin/sh`, so tests can script it.
    fn sh_backend() -> CtlBackend {
        CtlBackend::with_path("/bin/sh").unwrap()
    }

    /// Script whose real work happens in a forked grandchild, the way a
    /// `su`/`sudo` wrapper runs rabbitmqctl. The grandchild records its pid.
    fn wrapper_script(pid_file: &Path) -> String {
        format!(
            "sh -c 'echo $$ > \"{}\"; exec sleep 30'; true",
            pid_file.display()
        )
    }

    fn read_pid(pid_file: &Path) -> String {
        for _ in 0..100 {
            if let Ok(pid) = fs::read_to_string(pid_file)
                && !pid.trim().is_empty()
            {
                return pid.trim().to_string();
            }
            thread::sleep(Duration::from_millis(20));
        }
        panic!("grandchild never wrote {}", pid_file.display());
    }

    /// Whether `pid` is still running; zombies awaiting their reaper count as gone.
    fn is_running(pid: &str) -> bool {
        match Command::new("ps").args(["-o", "stat=", "-p", pid]).output() {
            Ok(out) => {
                let stat = String::from_utf8_lossy(&out.stdout);
                let stat = stat.trim();
                !stat.is_empty() && !stat.starts_with('Z')
            }
            // No ps in minimal images; fall back to procfs
            Err(_) => fs::read_to_string(format!("/proc/{pid}/stat"))
                .is_ok_and(|stat| !stat.contains(") Z")),
        }
    }

    fn wait_until_gone(pid: &str) -> bool {
        for _ in 0..100 {
            if !is_running(pid) {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_with_path_missing_executable() {
        let result = CtlBackend::with_path("/nonexistent/rabbitmqctl");
        assert!(matches!(result, Err(Error::CtlNotFound)));
    }

    #[test]
    fn test_run_captures_stdout() {
        let out = sh_backend()
            .run(&["-c", "echo 'guest [administrator]'"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.trim(), "guest [administrator]");
    }

    #[test]
    fn test_run_pins_home() {
        let out = sh_backend()
            .with_home("/var/empty-home")
            .run(&["-c", "echo $HOME"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(out.trim(), "/var/empty-home");
    }

    #[test]
    fn test_run_non_zero_exit_is_execution_failure() {
        let err = sh_backend()
            .run(&["-c", "echo nodedown >&2; exit 69"], Duration::from_secs(5))
            .unwrap_err();
        match err {
            Error::ExecutionFailure { code, stderr, .. } => {
                assert_eq!(code, Some(69));
                assert_eq!(stderr, "nodedown");
            }
            other => panic!("expected ExecutionFailure, got {other:?}"),
        }
    }

    #[test]
    fn test_run_timeout_kills_child() {
        let started = Instant::now();
        let err = sh_backend()
            .run(&["-c", "exec sleep 30"], Duration::from_millis(200))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_run_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = wrapper_script(&pid_file);

        let started = Instant::now();
        let err = sh_backend()
            .run(&["-c", &script], Duration::from_secs(1))
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));

        let pid = read_pid(&pid_file);
        assert!(wait_until_gone(&pid), "grandchild {pid} survived the timeout");
    }

    #[test]
    fn test_failed_wait_still_kills_group() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = wrapper_script(&pid_file);

        let backend = sh_backend();
        let mut child = backend.spawn(&["-c", &script]).unwrap();
        let pid = read_pid(&pid_file);
        assert!(is_running(&pid));

        let waited = Err(std::io::Error::other("wait interrupted"));
        assert!(settle(&mut child, waited).is_err());

        // Reaped, so the exit status is already known
        assert!(child.try_wait().unwrap().is_some());
        assert!(wait_until_gone(&pid), "grandchild {pid} survived a failed wait");
    }

    #[test]
    fn test_settle_leaves_clean_exit_alone() {
        let mut child = sh_backend().spawn(&["-c", "exit 0"]).unwrap();
        let status = child.wait().unwrap();
        let settled = settle(&mut child, Ok(Some(status))).unwrap();
        assert_eq!(settled, Some(status));
    }

    #[test]
    fn test_run_zero_timeout_does_not_spawn() {
        let err = sh_backend()
            .run(&["-c", "exit 0"], Duration::ZERO)
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_program_name_from_path() {
        assert_eq!(sh_backend().program(), "sh");
    }
}
