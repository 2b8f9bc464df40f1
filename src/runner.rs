// Process execution with a wall-clock timeout

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::errors::{PilotError, Result};

/// Exit code reported for processes that timed out or died from a signal
pub const TIMEOUT_EXIT_CODE: i32 = 124;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// How long output pipes may stay open after the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// First element is the program
    pub fn from_argv(argv: &[String]) -> Result<Self> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| PilotError::Config("command must not be empty".to_string()))?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub trait ProcessRunner {
    fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<ProcessOutput>;
}

/// Runs commands as child processes of this one
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec, cwd: &Path) -> Result<ProcessOutput> {
        let exec_error = |source| PilotError::ProcessExecution {
            command: command.to_string(),
            source,
        };

        debug!("Running `{}` in {}", command, cwd.display());
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a timeout takes grandchildren down too
            cmd.process_group(0);
        }
        let mut child = cmd.spawn().map_err(exec_error)?;

        let stdout_pipe = spawn_drain(child.stdout.take());
        let stderr_pipe = spawn_drain(child.stderr.take());

        let start = Instant::now();
        let mut timed_out = false;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    if start.elapsed() >= self.timeout {
                        timed_out = true;
                        kill_tree(&mut child);
                        break child.wait().ok();
                    }
                    thread::sleep(Duration::from_millis(50));
                }
                Err(e) => return Err(exec_error(e)),
            }
        };

        // Background processes can keep the pipes open past the child's exit
        let stdout = stdout_pipe.collect(DRAIN_GRACE);
        let stderr = stderr_pipe.collect(DRAIN_GRACE);

        let exit_code = match status.and_then(|s| s.code()) {
            Some(code) if !timed_out => code,
            _ => TIMEOUT_EXIT_CODE,
        };
        if timed_out {
            warn!("`{}` timed out after {}s", command, self.timeout.as_secs());
        }

        Ok(ProcessOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            timed_out,
        })
    }
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    if let Ok(pid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: signals only the process group created for this child
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
}

/// Output pipe read on its own thread
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: mpsc::Receiver<()>,
}

impl Drain {
    /// Whatever was read once the pipe closes or `grace` runs out
    fn collect(self, grace: Duration) -> Vec<u8> {
        let _ = self.done.recv_timeout(grace);
        self.buf.lock().map(|buf| buf.clone()).unwrap_or_default()
    }
}

fn spawn_drain<R: Read + Send + 'static>(pipe: Option<R>) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = Arc::clone(&buf);
    thread::spawn(move || {
        if let Some(mut pipe) = pipe {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk) {
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Ok(0) | Err(_) => break,
                    Ok(n) => match sink.lock() {
                        Ok(mut buf) => buf.extend_from_slice(&chunk[..n]),
                        Err(_) => break,
                    },
                }
            }
        }
        let _ = tx.send(());
    });
    Drain { buf, done }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_from_argv() {
        let argv = vec!["python3".to_string(), "-m".to_string(), "pytest".to_string()];
        let command = CommandSpec::from_argv(&argv).unwrap();
        assert_eq!(command.program, "python3");
        assert_eq!(command.to_string(), "python3 -m pytest");
        assert!(CommandSpec::from_argv(&[]).is_err());
    }

    #[test]
    fn test_missing_program_fails_to_start() {
        let dir = tempfile::tempdir().unwrap();
        let err = SystemRunner::default()
            .run(&CommandSpec::new("patchpilot-no-such-program"), dir.path())
            .unwrap_err();
        assert!(matches!(err, PilotError::ProcessExecution { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_captures_output_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandSpec::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2; exit 3");
        let output = SystemRunner::default().run(&command, dir.path()).unwrap();
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
    }

    #[cfg(unix)]
    #[test]
    fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "").unwrap();
        let command = CommandSpec::new("sh").arg("-c").arg("ls");
        let output = SystemRunner::default().run(&command, dir.path()).unwrap();
        assert!(output.success());
        assert!(output.stdout.contains("marker.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandSpec::new("sh").arg("-c").arg("exec sleep 5");
        let started = Instant::now();
        let output = SystemRunner::new(Duration::from_millis(200))
            .run(&command, dir.path())
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_grandchildren() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandSpec::new("sh").arg("-c").arg("sleep 5; true");
        let started = Instant::now();
        let output = SystemRunner::new(Duration::from_millis(200))
            .run(&command, dir.path())
            .unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_detached_grandchild_does_not_block() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandSpec::new("sh").arg("-c").arg("echo done; (sleep 10 &)");
        let started = Instant::now();
        let output = SystemRunner::new(Duration::from_secs(30))
            .run(&command, dir.path())
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(8));
    }
}
