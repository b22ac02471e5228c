use std::ffi::OsStr;
use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// How long a cancelled process gets between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(1);
/// How long to keep reading output after the process exits. Background
/// children can hold the pipes open long after that.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{} exited with non-zero status: {}", .0, render_exit_status(&.1.status))]
    ScriptFailed(String, Box<CmdResult>),
    #[error("{0} was cancelled")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, Error>;

fn render_exit_status(status: &ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("exit code {code}"),
        None => "no exit status".into(),
    }
}

#[derive(Debug, Default)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

#[derive(Debug, Clone, Copy, strum::Display)]
#[strum(serialize_all = "lowercase")]
enum Stream {
    Stdout,
    Stderr,
}

/// Runs one external process, capturing its output line by line and
/// stopping it when the cancel token trips.
pub struct CmdLineRunner {
    cmd: Command,
    stdin: Option<String>,
    cancel: Option<CancellationToken>,
    show_output: bool,
}

impl CmdLineRunner {
    pub fn new<P: AsRef<OsStr>>(program: P) -> Self {
        let mut cmd = Command::new(program);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        Self {
            cmd,
            stdin: None,
            cancel: None,
            show_output: false,
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.cmd.arg(arg);
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cmd.current_dir(dir);
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.env(key, val);
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.envs(vars);
        self
    }

    pub fn stdin_string(mut self, input: impl Into<String>) -> Self {
        self.cmd.stdin(Stdio::piped());
        self.stdin = Some(input.into());
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Echo the process output to our own stdout/stderr while capturing it.
    pub fn show_output(mut self, show: bool) -> Self {
        self.show_output = show;
        self
    }

    pub async fn execute(mut self) -> Result<CmdResult> {
        debug!("$ {self}");
        let program = self.get_program();
        let mut cp = self.cmd.spawn()?;
        trace!("started process: {:?} for {program}", cp.id());
        if let Some(text) = self.stdin.take()
            && let Some(mut stdin) = cp.stdin.take()
        {
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(text.as_bytes()).await {
                    debug!("failed to write stdin: {err}");
                }
            });
        }
        let stdout_buf = Arc::new(Mutex::new(String::new()));
        let stderr_buf = Arc::new(Mutex::new(String::new()));
        let mut stdout = tokio::spawn(read_lines(
            cp.stdout.take(),
            stdout_buf.clone(),
            program.clone(),
            Stream::Stdout,
            self.show_output,
        ));
        let mut stderr = tokio::spawn(read_lines(
            cp.stderr.take(),
            stderr_buf.clone(),
            program.clone(),
            Stream::Stderr,
            self.show_output,
        ));
        let cancel = self.cancel.clone().unwrap_or_default();

        let status = tokio::select! {
            status = cp.wait() => status?,
            _ = cancel.cancelled() => {
                terminate(&mut cp, &program).await;
                stdout.abort();
                stderr.abort();
                return Err(Error::Cancelled(program));
            }
        };
        let drained = tokio::select! {
            _ = async { tokio::join!(&mut stdout, &mut stderr) } => true,
            _ = tokio::time::sleep(DRAIN_TIMEOUT) => false,
            _ = cancel.cancelled() => false,
        };
        if !drained {
            debug!("{program}: output still open after exit, not waiting for it");
            stdout.abort();
            stderr.abort();
            let _ = tokio::join!(stdout, stderr);
        }
        let result = CmdResult {
            stdout: take_output(&stdout_buf),
            stderr: take_output(&stderr_buf),
            status,
        };
        trace!("{program} exited: {status}");
        if !status.success() {
            return Err(Error::ScriptFailed(program, Box::new(result)));
        }
        Ok(result)
    }

    fn get_program(&self) -> String {
        self.cmd.as_std().get_program().to_string_lossy().to_string()
    }

    fn get_args(&self) -> Vec<String> {
        self.cmd
            .as_std()
            .get_args()
            .map(|s| s.to_string_lossy().to_string())
            .collect::<Vec<_>>()
    }
}

async fn read_lines<R: AsyncRead + Unpin>(
    reader: Option<R>,
    out: Arc<Mutex<String>>,
    program: String,
    stream: Stream,
    show: bool,
) {
    let Some(reader) = reader else {
        return;
    };
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!("{program} {stream}: {line}");
                if show {
                    match stream {
                        Stream::Stdout => println!("{line}"),
                        Stream::Stderr => eprintln!("{line}"),
                    }
                }
                let mut out = out.lock().unwrap();
                out.push_str(&line);
                out.push('\n');
            }
            Ok(None) => break,
            Err(err) => {
                debug!("{program}: failed to read {stream}: {err}");
                break;
            }
        }
    }
}

fn take_output(buf: &Mutex<String>) -> String {
    std::mem::take(&mut *buf.lock().unwrap())
}

/// Ask the process to stop, then kill it if it ignores us.
async fn terminate(cp: &mut Child, program: &str) {
    #[cfg(unix)]
    if let Some(pid) = cp.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        trace!("SIGTERM: {pid}");
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) => {
                if tokio::time::timeout(KILL_GRACE, cp.wait()).await.is_ok() {
                    return;
                }
            }
            Err(err) => debug!("failed to send SIGTERM to {program}: {err}"),
        }
    }
    if let Err(err) = cp.kill().await {
        debug!("failed to kill {program}: {err}");
    }
}

impl Display for CmdLineRunner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let args = self.get_args().join(" ");
        write!(f, "{} {args}", self.get_program())
    }
}

impl Debug for CmdLineRunner {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let args = self.get_args().join(" ");
        write!(f, "{} {args}", self.get_program())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let result = CmdLineRunner::new("sh")
            .arg("-c")
            .arg("echo out; echo err >&2")
            .execute()
            .await
            .unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert!(result.status.success());
    }

    #[tokio::test]
    async fn non_zero_exit_is_script_failed() {
        let err = CmdLineRunner::new("sh")
            .arg("-c")
            .arg("echo nope; exit 3")
            .execute()
            .await
            .unwrap_err();
        match &err {
            Error::ScriptFailed(program, result) => {
                assert_eq!(program, "sh");
                assert_eq!(result.stdout, "nope\n");
                assert_eq!(result.status.code(), Some(3));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.to_string(), "sh exited with non-zero status: exit code 3");
    }

    #[tokio::test]
    async fn missing_program_is_io_error() {
        let err = CmdLineRunner::new("definitely-not-a-real-program-xyz")
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn stdin_env_and_dir() {
        let dir = tempfile::tempdir().unwrap();
        let result = CmdLineRunner::new("sh")
            .arg("-c")
            .arg("read line; echo \"$line $GREETING $(pwd -P)\"")
            .stdin_string("hello\n")
            .env("GREETING", "world")
            .current_dir(dir.path())
            .execute()
            .await
            .unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert_eq!(
            result.stdout.trim_end(),
            format!("hello world {}", canonical.display())
        );
    }

    #[tokio::test]
    async fn cancel_stops_the_process() {
        let cancel = CancellationToken::new();
        let trip = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trip.cancel();
        });
        let started = Instant::now();
        let err = CmdLineRunner::new("sleep")
            .arg("30")
            .with_cancel_token(cancel)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled(ref p) if p == "sleep"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn background_child_does_not_hold_the_command() {
        let started = Instant::now();
        let result = CmdLineRunner::new("sh")
            .arg("-c")
            .arg("sleep 5 & echo started")
            .execute()
            .await
            .unwrap();
        assert_eq!(result.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[test]
    fn display_shows_command_line() {
        let cmd = CmdLineRunner::new("cargo").arg("build").arg("--release");
        assert_eq!(cmd.to_string(), "cargo build --release");
    }
}
