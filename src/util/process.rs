//! Blocking execution of external commands with captured output.
//!
//! [run] never treats a non-zero exit as an error. The only [Err] it returns
//! is a [RunError], meaning the child could not be spawned or waited on.

use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::thread;
use std::time::{Duration, Instant};

use derive_more::{Display, Error};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long to keep reading pipes after a timed out child was killed.
const PIPE_GRACE: Duration = Duration::from_millis(100);

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// Natural exit with the given code.
    Code(i32),
    /// Terminated by a signal before it could report an exit code.
    Signaled,
    /// Killed because it outlived the configured timeout.
    TimedOut(Duration),
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        status.code().map_or(Exit::Signaled, Exit::Code)
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Code(code) => write!(f, "exit {code}"),
            Exit::Signaled => f.write_str("terminated by signal"),
            Exit::TimedOut(limit) => write!(f, "timed out after {}s", limit.as_secs_f32()),
        }
    }
}

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct Output {
    pub exit: Exit,
    pub stdout: String,
    pub stderr: String,
}

impl Output {
    /// `true` iff the process exited on its own with code 0.
    pub fn success(&self) -> bool {
        self.exit == Exit::Code(0)
    }

    /// Human readable failure detail: stderr, else stdout, else the exit.
    ///
    /// Never empty.
    pub fn error_detail(&self) -> String {
        first_non_blank(&[self.stderr.as_str(), self.stdout.as_str()])
            .unwrap_or_else(|| self.exit.to_string())
    }
}

/// Returns the first of `texts` that has non-whitespace content, trimmed.
pub(crate) fn first_non_blank(texts: &[&str]) -> Option<String> {
    texts
        .iter()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

#[derive(Debug, Display, Error)]
/// The child process could not be run at all.
pub enum RunError {
    /// Spawning failed, e.g. the binary does not exist.
    #[display("Failed to launch {}: {source}", program.display())]
    Launch {
        program: PathBuf,
        source: io::Error,
    },
    /// Waiting on the spawned child failed.
    #[display("Failed to wait for {}: {source}", program.display())]
    Wait {
        program: PathBuf,
        source: io::Error,
    },
}

/// Runs `program` with `args` to completion, or until `timeout` elapses.
///
/// stdin is closed, stdout and stderr are captured (lossy UTF-8).
/// A child exceeding `timeout` is killed and reported as [Exit::TimedOut].
/// Descendants still holding its pipes are not waited for in that case.
pub fn run<I, S>(program: &Path, args: I, timeout: Option<Duration>) -> Result<Output, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    log::trace!(target: "util::process", "Running: {}", program.display());

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| RunError::Launch {
            program: program.to_path_buf(),
            source,
        })?;

    // drain both pipes concurrently, a full pipe would stall the child
    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let exit = match timeout {
        None => child.wait().map(Exit::from),
        Some(limit) => wait_with_deadline(&mut child, limit),
    }
    .map_err(|source| RunError::Wait {
        program: program.to_path_buf(),
        source,
    })?;

    // a killed child's descendants may keep the pipes open indefinitely
    let pipe_deadline = match exit {
        Exit::TimedOut(_) => Some(Instant::now() + PIPE_GRACE),
        _ => None,
    };
    let output = Output {
        exit,
        stdout: collect(stdout, pipe_deadline),
        stderr: collect(stderr, pipe_deadline),
    };
    log::trace!(target: "util::process", "{} finished: {}", program.display(), output.exit);

    Ok(output)
}

fn wait_with_deadline(child: &mut Child, limit: Duration) -> io::Result<Exit> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(status.into());
        }

        let elapsed = started.elapsed();
        if elapsed >= limit {
            log::warn!(target: "util::process", "Killing child {} after {limit:?}", child.id());
            // the child may have exited in between
            let _ = child.kill();
            child.wait()?;
            return Ok(Exit::TimedOut(limit));
        }

        thread::sleep(POLL_INTERVAL.min(limit - elapsed));
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buf) {
            log::debug!(target: "util::process", "Reading child output failed: {e}");
        }
        // the receiver is gone if the caller stopped waiting
        let _ = tx.send(buf);
    });
    rx
}

/// Output of a drained pipe, empty if it is not closed by `deadline`.
fn collect(reader: Option<Receiver<Vec<u8>>>, deadline: Option<Instant>) -> String {
    let bytes = reader.and_then(|rx| match deadline {
        None => rx.recv().ok(),
        Some(deadline) => rx
            .recv_timeout(deadline.saturating_duration_since(Instant::now()))
            .ok(),
    });
    bytes
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(exit: Exit, stdout: &str, stderr: &str) -> Output {
        Output {
            exit,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    #[test]
    fn error_detail_prefers_stderr_then_stdout_then_exit() {
        assert_eq!(output(Exit::Code(2), "out", " err\n").error_detail(), "err");
        assert_eq!(output(Exit::Code(2), "out\n", "  \n").error_detail(), "out");
        assert_eq!(output(Exit::Code(2), "", "").error_detail(), "exit 2");
        assert_eq!(output(Exit::Signaled, "", "").error_detail(), "terminated by signal");
    }

    #[test]
    fn only_zero_exit_is_success() {
        assert!(output(Exit::Code(0), "", "").success());
        assert!(!output(Exit::Code(1), "", "").success());
        assert!(!output(Exit::TimedOut(Duration::from_secs(1)), "", "").success());
    }

    #[test]
    fn missing_binary_is_a_launch_error() {
        let res = run(Path::new("/nonexistent/xguard-no-such-binary"), ["x"], None);
        assert!(matches!(res, Err(RunError::Launch { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn captures_output_and_exit_code() {
        let out = run(
            Path::new("/bin/sh"),
            ["-c", "echo hello; echo oops >&2; exit 3"],
            None,
        )
        .expect("sh should launch");

        assert_eq!(out.exit, Exit::Code(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.error_detail(), "oops");
    }

    #[cfg(unix)]
    #[test]
    fn kills_child_after_timeout() {
        let limit = Duration::from_millis(200);
        let started = Instant::now();
        let out = run(Path::new("/bin/sh"), ["-c", "exec sleep 10"], Some(limit))
            .expect("sh should launch");

        assert_eq!(out.exit, Exit::TimedOut(limit));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_does_not_wait_for_grandchildren() {
        let limit = Duration::from_millis(200);
        let started = Instant::now();
        // sh forks sleep, which inherits and holds the output pipes
        let out = run(Path::new("/bin/sh"), ["-c", "sleep 6; true"], Some(limit))
            .expect("sh should launch");

        assert_eq!(out.exit, Exit::TimedOut(limit));
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
