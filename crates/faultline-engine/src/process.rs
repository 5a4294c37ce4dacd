//! Lifecycle of the external node-network process.
//!
//! The harness owns exactly one child at a time. Startup hands the
//! topology over stdin as one JSON line; shutdown closes stdin and
//! escalates to a kill once the grace period expires. The child's
//! stdout/stderr are drained into the harness log so validator output
//! is never lost and the pipes never fill.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};

use faultline_core::config::{ProcessConfig, TopologySpec};
use faultline_core::ProcessError;

/// Handle on the spawned network process.
#[derive(Debug)]
pub struct ProcessManager {
    config: ProcessConfig,
    child: tokio::sync::Mutex<Option<Child>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
}

impl ProcessManager {
    /// Spawn the configured program and hand it the topology.
    pub async fn spawn(
        config: ProcessConfig,
        topology: &TopologySpec,
    ) -> Result<Self, ProcessError> {
        let mut child = Command::new(&config.program)
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ProcessError::Spawn {
                program: config.program.clone(),
                source,
            })?;
        tracing::info!(program = %config.program, pid = child.id(), "network process spawned");

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(drain("stdout", BufReader::new(stdout)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain("stderr", BufReader::new(stderr)));
        }

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProcessError::Handshake(other("stdin was not piped")))?;

        let mut payload = serde_json::to_vec(topology)
            .map_err(|err| ProcessError::Handshake(other(&err.to_string())))?;
        payload.push(b'\n');
        stdin
            .write_all(&payload)
            .await
            .map_err(ProcessError::Handshake)?;
        stdin.flush().await.map_err(ProcessError::Handshake)?;

        Ok(Self {
            config,
            child: tokio::sync::Mutex::new(Some(child)),
            stdin: tokio::sync::Mutex::new(Some(stdin)),
        })
    }

    /// Resolve once the child exits on its own. Intended for use inside
    /// a `select!` against the iteration outcome; an exit while selected
    /// on is always unexpected.
    pub async fn watch_exit(&self) -> ProcessError {
        loop {
            {
                let mut guard = self.child.lock().await;
                match guard.as_mut() {
                    None => return ProcessError::NotRunning,
                    Some(child) => match child.try_wait() {
                        Ok(Some(status)) => {
                            *guard = None;
                            return ProcessError::UnexpectedExit { status };
                        }
                        Ok(None) => {}
                        Err(source) => {
                            *guard = None;
                            return ProcessError::Wait(source);
                        }
                    },
                }
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    /// Graceful shutdown: close stdin, wait out the grace period, then
    /// kill whatever is left.
    pub async fn shutdown(&self) -> Result<(), ProcessError> {
        drop(self.stdin.lock().await.take());
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(());
        };
        let grace = Duration::from_secs(self.config.shutdown_grace_secs);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(%status, "network process exited gracefully");
                Ok(())
            }
            Ok(Err(source)) => Err(ProcessError::Wait(source)),
            Err(_) => {
                tracing::warn!("grace period expired, killing network process");
                child.start_kill().map_err(ProcessError::Wait)?;
                child.wait().await.map_err(ProcessError::Wait)?;
                Ok(())
            }
        }
    }
}

fn other(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message.to_string())
}

async fn drain<R>(stream: &'static str, reader: BufReader<R>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(target: "faultline::network", stream, "{line}"),
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(stream, %err, "output pipe closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology() -> TopologySpec {
        TopologySpec {
            node_count: 2,
            base_peer_port: 60000,
            base_rpc_port: 61000,
            partition: vec![vec![0, 1]],
            unl: vec![vec![0, 1], vec![0, 1]],
        }
    }

    fn config(program: &str, args: &[&str], grace: u64) -> ProcessConfig {
        ProcessConfig {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
            shutdown_grace_secs: grace,
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let err = ProcessManager::spawn(
            config("/nonexistent/faultline-test-program", &[], 1),
            &topology(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProcessError::Spawn { .. }));
    }

    #[tokio::test]
    async fn stdin_close_shuts_down_a_reader() {
        // `cat` exits once its stdin reaches EOF, inside the grace period.
        let manager = ProcessManager::spawn(config("cat", &[], 5), &topology())
            .await
            .unwrap();
        manager.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn stubborn_child_is_killed_after_grace() {
        let manager = ProcessManager::spawn(
            config("sleep", &["1000"], 1),
            &topology(),
        )
        .await
        .unwrap();
        let started = std::time::Instant::now();
        manager.shutdown().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn early_exit_is_reported() {
        // `true` exits immediately; depending on timing the handshake
        // write may already hit a closed pipe.
        match ProcessManager::spawn(config("true", &[], 1), &topology()).await {
            Ok(manager) => {
                let err = manager.watch_exit().await;
                assert!(matches!(err, ProcessError::UnexpectedExit { .. }));
            }
            Err(ProcessError::Handshake(_)) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
