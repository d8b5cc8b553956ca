use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::sandbox::CommandResult;

/// Appended to stdout when it exceeds the configured length.
pub const OUTPUT_TRUNCATED: &str = "\n... (output truncated)";

/// Appended to stderr when it exceeds the configured length.
pub const ERROR_TRUNCATED: &str = "\n... (error truncated)";

/// How long readers may keep draining after the process is gone.
/// Only matters if something outside the process group still holds a pipe.
const READER_GRACE: Duration = Duration::from_secs(2);

const CHUNK_SIZE: usize = 8192;

/// Limits applied to one captured process.
#[derive(Debug, Clone)]
pub struct CaptureSpec {
    /// Wall-clock budget before the process group is killed
    pub timeout: Duration,
    /// Per-stream cap, in characters
    pub max_output_chars: usize,
    /// Appended to stderr when the timer fires
    pub timeout_notice: String,
}

/// Byte buffer that stops growing at `cap` but remembers it overflowed.
#[derive(Debug, Default)]
struct BoundedBuffer {
    bytes: Vec<u8>,
    cap: usize,
    overflowed: bool,
}

impl BoundedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            overflowed: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.bytes.len());
        if chunk.len() > room {
            self.bytes.extend_from_slice(&chunk[..room]);
            self.overflowed = true;
        } else {
            self.bytes.extend_from_slice(chunk);
        }
    }

    fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Cut `text` to `max_chars` characters and append `marker` if anything
/// was dropped, either here or upstream (`overflowed`).
pub fn truncate_stream(text: &str, max_chars: usize, marker: &str, overflowed: bool) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &text[..idx], marker),
        None if overflowed => format!("{}{}", text, marker),
        None => text.to_string(),
    }
}

/// Spawn `cmd`, feed it `stdin_data`, and capture both streams until it
/// exits or `spec.timeout` elapses.
///
/// The child is placed in its own process group so a timeout kill takes
/// its descendants with it. Streams are drained concurrently while the
/// process runs, so a chatty guest never blocks on a full pipe, and each
/// buffer stops growing once it holds enough bytes for `max_output_chars`.
///
/// Returns `Err` only if the process could not be spawned or waited on.
pub async fn run_captured(
    mut cmd: Command,
    stdin_data: Option<String>,
    spec: &CaptureSpec,
) -> std::io::Result<CommandResult> {
    cmd.stdin(if stdin_data.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);
    new_process_group(&mut cmd);

    let mut child = cmd.spawn()?;
    // Child::id() is gone once the child is reaped; the group outlives it
    let pgid = child.id();

    if let (Some(data), Some(mut stdin)) = (stdin_data, child.stdin.take()) {
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(data.as_bytes()).await {
                debug!(error = %e, "Failed to write stdin");
            }
            // Dropping stdin closes the pipe so the guest sees EOF
        });
    }

    // Enough bytes for max_output_chars of any UTF-8 text
    let cap = spec.max_output_chars.saturating_mul(4).saturating_add(4);
    let (stop_tx, stop_rx) = watch::channel(false);
    let stdout_task = child
        .stdout
        .take()
        .map(|out| tokio::spawn(drain(out, cap, stop_rx.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|err| tokio::spawn(drain(err, cap, stop_rx.clone())));

    let (exit_code, timed_out) = match tokio::time::timeout(spec.timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Nothing the guest started may outlive it
            kill_process_group(pgid);
            (status.code(), false)
        }
        Ok(Err(e)) => {
            terminate(&mut child, pgid).await;
            let _ = stop_tx.send(true);
            return Err(e);
        }
        Err(_) => {
            warn!(timeout = ?spec.timeout, "Execution timed out, killing process group");
            terminate(&mut child, pgid).await;
            (None, true)
        }
    };

    let (stdout, stderr) = tokio::join!(
        collect(stdout_task, &stop_tx),
        collect(stderr_task, &stop_tx)
    );

    let stdout_text = truncate_stream(
        &stdout.text(),
        spec.max_output_chars,
        OUTPUT_TRUNCATED,
        stdout.overflowed,
    );
    let mut stderr_text = truncate_stream(
        &stderr.text(),
        spec.max_output_chars,
        ERROR_TRUNCATED,
        stderr.overflowed,
    );
    if timed_out {
        // After truncation so the notice is never cut off
        stderr_text.push_str(&spec.timeout_notice);
    }

    debug!(
        exit_code = ?exit_code,
        timed_out = timed_out,
        stdout_len = stdout_text.len(),
        stderr_len = stderr_text.len(),
        "Process completed"
    );

    Ok(CommandResult {
        stdout: stdout_text.trim().to_string(),
        stderr: stderr_text.trim().to_string(),
        exit_code,
        timed_out,
    })
}

async fn drain<R>(mut reader: R, cap: usize, mut stop: watch::Receiver<bool>) -> BoundedBuffer
where
    R: AsyncRead + Unpin,
{
    let mut buffer = BoundedBuffer::new(cap);
    let mut chunk = [0u8; CHUNK_SIZE];

    loop {
        tokio::select! {
            read = reader.read(&mut chunk) => match read {
                Ok(0) => break,
                Ok(n) => buffer.push(&chunk[..n]),
                Err(e) => {
                    debug!(error = %e, "Stream read failed");
                    break;
                }
            },
            _ = stop.changed() => break,
        }
    }

    buffer
}

async fn collect(task: Option<JoinHandle<BoundedBuffer>>, stop: &watch::Sender<bool>) -> BoundedBuffer {
    let Some(mut task) = task else {
        return BoundedBuffer::default();
    };

    match tokio::time::timeout(READER_GRACE, &mut task).await {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(e)) => {
            debug!(error = %e, "Stream reader task failed");
            BoundedBuffer::default()
        }
        Err(_) => {
            debug!("Stream still open after process exit, stopping reader");
            let _ = stop.send(true);
            task.await.unwrap_or_default()
        }
    }
}

async fn terminate(child: &mut Child, pgid: Option<u32>) {
    kill_process_group(pgid);
    if let Err(e) = child.kill().await {
        debug!(error = %e, "Failed to kill child");
    }
}

#[cfg(unix)]
fn new_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn new_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn kill_process_group(pgid: Option<u32>) {
    let Some(pid) = pgid else {
        return;
    };
    // process_group(0) made the child a group leader; a negative pid
    // addresses the whole group.
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), libc::SIGKILL) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the whole group already exited
        if err.raw_os_error() != Some(libc::ESRCH) {
            debug!(pid = pid, error = %err, "Process group kill failed");
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: Option<u32>) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn spec(timeout: Duration, max: usize) -> CaptureSpec {
        CaptureSpec {
            timeout,
            max_output_chars: max,
            timeout_notice: "\nExecution timed out".to_string(),
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", script]);
        cmd
    }

    #[test]
    fn test_truncate_stream() {
        assert_eq!(truncate_stream("hello", 10, OUTPUT_TRUNCATED, false), "hello");
        assert_eq!(truncate_stream("hello", 5, OUTPUT_TRUNCATED, false), "hello");
        assert_eq!(
            truncate_stream("hello world", 5, OUTPUT_TRUNCATED, false),
            format!("hello{OUTPUT_TRUNCATED}")
        );
        assert_eq!(
            truncate_stream("hello", 5, ERROR_TRUNCATED, true),
            format!("hello{ERROR_TRUNCATED}")
        );
    }

    #[test]
    fn test_truncate_counts_chars_not_bytes() {
        let text = "é".repeat(20);
        let cut = truncate_stream(&text, 10, OUTPUT_TRUNCATED, false);
        assert_eq!(cut, format!("{}{}", "é".repeat(10), OUTPUT_TRUNCATED));
    }

    #[test]
    fn test_bounded_buffer_caps_growth() {
        let mut buffer = BoundedBuffer::new(8);
        buffer.push(b"12345");
        assert!(!buffer.overflowed);
        buffer.push(b"67890");
        assert!(buffer.overflowed);
        assert_eq!(buffer.text(), "12345678");
    }

    #[tokio::test]
    async fn test_captures_both_streams() {
        let result = run_captured(
            sh("echo '  hello  '; echo oops 1>&2; exit 3"),
            None,
            &spec(Duration::from_secs(10), 100),
        )
        .await
        .unwrap();

        assert_eq!(result.stdout, "hello");
        assert_eq!(result.stderr, "oops");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.timed_out);
    }

    #[tokio::test]
    async fn test_feeds_stdin() {
        let result = run_captured(
            Command::new("cat"),
            Some("from stdin".to_string()),
            &spec(Duration::from_secs(10), 100),
        )
        .await
        .unwrap();

        assert_eq!(result.stdout, "from stdin");
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_timeout_kills_process_group() {
        let start = Instant::now();
        let result = run_captured(
            sh("echo started; sleep 30 & sleep 30"),
            None,
            &spec(Duration::from_millis(500), 100),
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.stdout, "started");
        assert_eq!(result.stderr, "Execution timed out");
        assert_eq!(result.exit_code, None);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_background_children_killed_on_normal_exit() {
        let start = Instant::now();
        let result = run_captured(
            sh("sleep 30 & echo done"),
            None,
            &spec(Duration::from_secs(10), 100),
        )
        .await
        .unwrap();

        assert!(!result.timed_out);
        assert_eq!(result.stdout, "done");
        assert_eq!(result.exit_code, Some(0));
        // The orphaned sleep holds stdout open until its group is killed;
        // finishing before the reader grace period means it was.
        assert!(start.elapsed() < READER_GRACE, "{:?}", start.elapsed());
    }

    #[tokio::test]
    async fn test_output_truncated_to_exact_length() {
        let result = run_captured(
            sh("i=0; while [ $i -lt 300 ]; do printf 'xxxxxxxxxx'; i=$((i+1)); done"),
            None,
            &spec(Duration::from_secs(10), 1000),
        )
        .await
        .unwrap();

        let expected = format!("{}{}", "x".repeat(1000), OUTPUT_TRUNCATED);
        assert_eq!(result.stdout, expected);
        assert_eq!(
            result.stdout.chars().count(),
            1000 + OUTPUT_TRUNCATED.chars().count()
        );
    }

    #[tokio::test]
    async fn test_timeout_notice_survives_truncation() {
        let result = run_captured(
            sh("while true; do echo noise 1>&2; done"),
            None,
            &spec(Duration::from_millis(300), 50),
        )
        .await
        .unwrap();

        assert!(result.timed_out);
        assert!(result.stderr.contains(ERROR_TRUNCATED.trim()));
        assert!(result.stderr.ends_with("Execution timed out"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let err = run_captured(
            Command::new("/definitely/not/a/binary"),
            None,
            &spec(Duration::from_secs(1), 10),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
