//! Local GeoDataSource: one process per request, stdout buffered until exit.

use crate::config::ProcessConfig;
use crate::error::ProcessError;
use axum::body::Bytes;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

const CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
pub struct ProcessSource {
    program: String,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl ProcessSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            working_dir: None,
            timeout,
        }
    }

    pub fn from_config(config: &ProcessConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            working_dir: config.working_dir.clone(),
            timeout: config.timeout(),
        }
    }

    /// Runs the process to completion and returns everything it wrote to stdout.
    ///
    /// The child is killed if this future is dropped (client went away) or the
    /// timeout elapses. A non-zero exit is an error carrying captured stderr.
    pub async fn run(&self) -> Result<Bytes, ProcessError> {
        match tokio::time::timeout(self.timeout, self.run_to_exit()).await {
            Ok(result) => result,
            Err(_) => Err(ProcessError::TimedOut(self.timeout)),
        }
    }

    async fn run_to_exit(&self) -> Result<Bytes, ProcessError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        debug!(pid = ?child.id(), "Spawned {}", self.program);

        let stdout = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        // Drain both pipes together so a chatty stderr can't block the child.
        let (stdout, stderr) = tokio::try_join!(accumulate(stdout, "stdout"), accumulate(stderr, "stderr"))?;

        let status = child.wait().await?;
        info!("Map data process exited with code {:?}", status.code());

        let stderr = String::from_utf8_lossy(&stderr).trim().to_string();
        if !status.success() {
            return Err(ProcessError::NonZeroExit {
                code: status.code(),
                stderr,
            });
        }
        if !stderr.is_empty() {
            warn!("Map data process wrote to stderr: {stderr}");
        }

        Ok(Bytes::from(stdout))
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, format!("{name} was not captured"))
}

async fn accumulate<R: AsyncRead + Unpin>(mut reader: R, stream: &'static str) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; CHUNK_SIZE];
    let mut count = 0usize;

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        count += 1;
        debug!(stream, chunk = count, bytes = n, "Pipe data from map data process");
        buffer.extend_from_slice(&chunk[..n]);
    }

    Ok(buffer)
}
