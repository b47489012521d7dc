use std::{
    io::Error as IoError,
    process::{ExitStatus, Stdio},
    sync::OnceLock,
    thread,
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command as TokioCommand;
use tokio::sync::Mutex;

use crate::error::{Result, TaskcondError};
use crate::report::OutputMode;

pub fn default_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Maps a configured worker count to a concrete slot count. Zero or negative
/// values (the conventional `-1`) select every available core.
pub fn resolve_workers(requested: Option<i64>) -> Option<usize> {
    match requested {
        Some(n) if n > 0 => Some(n as usize),
        _ => None,
    }
}

pub fn parse_duration(value: &str, setting: &str) -> Result<Duration> {
    value
        .parse::<humantime::Duration>()
        .map(Duration::from)
        .map_err(|e| {
            TaskcondError::Config(format!(
                "invalid {} '{}': {} (use a duration like '50ms', '2s', '1m')",
                setting, value, e
            ))
        })
}

pub fn is_glob_pattern(path: &str) -> bool {
    path.contains('*') || path.contains('?') || path.contains('[')
}

fn shell_command(command: &str) -> TokioCommand {
    if cfg!(target_os = "windows") {
        let mut c = TokioCommand::new("cmd");
        c.args(["/C", command]);
        c
    } else {
        let mut c = TokioCommand::new("sh");
        c.args(["-c", command]);
        c
    }
}

/// Runs `command` through the platform shell and waits for it to exit.
///
/// In [`OutputMode::Stream`] the child's output is forwarded as it arrives.
/// In [`OutputMode::Group`] it is collected and written as one block once the
/// command exits, holding [`output_print_lock`] so blocks never interleave.
pub async fn run_shell_command(command: &str, mode: OutputMode) -> Result<ExitStatus> {
    let spawn_error = |source: IoError| TaskcondError::CommandSpawn {
        command: command.to_string(),
        source,
    };

    let mut cmd = shell_command(command);
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(Stdio::null());

    let mut child = cmd.spawn().map_err(spawn_error)?;

    let stream_output = matches!(mode, OutputMode::Stream);
    let stdout_handle = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(pump(pipe, tokio::io::stdout(), stream_output)));
    let stderr_handle = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(pump(pipe, tokio::io::stderr(), stream_output)));

    let status = child.wait().await?;

    let stdout = collect(stdout_handle).await?;
    let stderr = collect(stderr_handle).await?;

    if !stream_output && (!stdout.is_empty() || !stderr.is_empty()) {
        let _guard = output_print_lock().lock().await;
        let mut out = tokio::io::stdout();
        out.write_all(&stdout).await?;
        out.flush().await?;
        let mut err = tokio::io::stderr();
        err.write_all(&stderr).await?;
        err.flush().await?;
    }

    Ok(status)
}

async fn pump<R, W>(mut pipe: R, mut sink: W, forward: bool) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut collected = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = pipe.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        if forward {
            sink.write_all(&buf[..n]).await?;
        } else {
            collected.extend_from_slice(&buf[..n]);
        }
    }
    if forward {
        sink.flush().await?;
    }
    Ok(collected)
}

async fn collect(
    handle: Option<tokio::task::JoinHandle<std::io::Result<Vec<u8>>>>,
) -> Result<Vec<u8>> {
    match handle {
        Some(handle) => match handle.await {
            Ok(bytes) => Ok(bytes?),
            Err(e) => Err(TaskcondError::Io(IoError::other(e))),
        },
        None => Ok(Vec::new()),
    }
}

static OUTPUT_PRINT_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

pub fn output_print_lock() -> &'static Mutex<()> {
    OUTPUT_PRINT_LOCK.get_or_init(|| Mutex::new(()))
}
