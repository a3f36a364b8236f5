//! Link to a companion spawned as a child process, talking over stdio.

use crate::traits::{Link, TransportError};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const READ_CHUNK: usize = 8192;

/// Spawns the companion and frames over its stdin/stdout.
///
/// The child's stderr is inherited so companion diagnostics reach the terminal.
pub struct ProcessLink {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl ProcessLink {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Link for ProcessLink {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TransportError::ConnectFailed(format!("{}: {e}", self.program)))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let (Some(stdin), Some(stdout)) = (stdin, stdout) else {
            let _ = child.start_kill();
            return Err(TransportError::ConnectFailed(
                "companion stdio not captured".into(),
            ));
        };

        tracing::debug!(program = %self.program, pid = ?child.id(), "Companion process spawned");

        *self.stdin.lock().await = Some(stdin);
        *self.stdout.lock().await = Some(stdout);
        *self.child.lock().await = Some(child);
        Ok(())
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(TransportError::Disconnected)?;
        stdin.write_all(frame).await?;
        stdin.flush().await?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut guard = self.stdout.lock().await;
        let Some(stdout) = guard.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; READ_CHUNK];
        let n = stdout.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }

    async fn close(&self) -> Result<(), TransportError> {
        // Dropping stdin lets a well-behaved companion exit on its own.
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            if let Err(e) = child.start_kill() {
                tracing::debug!(error = %e, "Companion already exited");
            }
            let status = child.wait().await?;
            tracing::debug!(?status, "Companion process stopped");
        }
        Ok(())
    }
}
