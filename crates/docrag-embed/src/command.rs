//! Embedder that shells out to an external batch embedding process.
//!
//! Protocol: the input texts are written to the child's stdin as one JSON
//! array of strings; the child writes a JSON array of float arrays (same
//! length, same order) to stdout and exits. The call is bounded by a
//! configured timeout; on expiry the child is killed and the call fails with
//! `EmbeddingTimeout` rather than substituting a zero vector.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use docrag_core::traits::Embedder;
use docrag_core::{Error, Result};

pub struct CommandEmbedder {
    program: String,
    args: Vec<String>,
    dim: usize,
    id: String,
    timeout: Duration,
}

impl CommandEmbedder {
    /// `command` is split on whitespace into program + arguments; shell
    /// quoting is not interpreted.
    pub fn new(command: &str, dim: usize, timeout_ms: u64) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::InvalidConfig("embedding.command is empty".into()))?;
        let args: Vec<String> = parts.collect();
        let id = format!("command:{}:d{}", program, dim);
        Ok(Self { program, args, dim, id, timeout: Duration::from_millis(timeout_ms) })
    }

    fn run(&self, payload: &str) -> Result<String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Embedding(format!("failed to spawn '{}': {}", self.program, e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(payload.as_bytes())
                .map_err(|e| Error::Embedding(format!("failed to write to embedder stdin: {}", e)))?;
        }

        let stdout_rx = drain(child.stdout.take());
        let stderr_rx = drain(child.stderr.take());

        let output = match stdout_rx.recv_timeout(self.timeout) {
            Ok(out) => out,
            Err(_) => {
                kill_quietly(&mut child);
                return Err(Error::EmbeddingTimeout { waited_ms: self.timeout.as_millis() as u64 });
            }
        };

        let status = child.wait()?;
        if !status.success() {
            let stderr = stderr_rx
                .recv_timeout(Duration::from_millis(200))
                .unwrap_or_default();
            return Err(Error::Embedding(format!(
                "embedder exited with {}: {}",
                status,
                stderr.trim()
            )));
        }
        Ok(output)
    }
}

impl Embedder for CommandEmbedder {
    fn id(&self) -> &str {
        &self.id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::to_string(texts)
            .map_err(|e| Error::Embedding(format!("failed to encode batch: {}", e)))?;
        debug!(count = texts.len(), "invoking embedding command");

        let output = self.run(&payload)?;
        let vectors: Vec<Vec<f32>> = serde_json::from_str(&output)
            .map_err(|e| Error::Embedding(format!("invalid embedder output: {}", e)))?;

        if vectors.len() != texts.len() {
            return Err(Error::Embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        for v in &vectors {
            if v.len() != self.dim {
                return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
            }
        }
        Ok(vectors)
    }
}

// Read a child pipe to completion on a helper thread so the main thread can
// bound the wait with a timeout.
fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel();
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = pipe.read_to_string(&mut buf);
            let _ = tx.send(buf);
        });
    }
    rx
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
