//! JSON-lines transport over a child process's stdio.
//!
//! Both the engine channel and the capability-provider channels are external
//! processes speaking one JSON object per line on stdin/stdout. Stderr is
//! forwarded to the log at debug level.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// How to launch an external process.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// A running child with framed stdio.
pub struct LineProcess {
    pub child: Child,
    pub writer: LineWriter,
    pub reader: LineReader,
}

impl LineProcess {
    /// Spawn the process. `label` tags its stderr in the log.
    pub fn spawn(spec: &ProcessSpec, label: &str) -> std::io::Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::other("child stdin not captured"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("child stdout not captured"))?;

        if let Some(stderr) = child.stderr.take() {
            let label = label.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(process = %label, "{line}");
                }
            });
        }

        Ok(Self {
            child,
            writer: LineWriter { stdin },
            reader: LineReader {
                lines: BufReader::new(stdout).lines(),
            },
        })
    }
}

/// Write half: one JSON object per line.
pub struct LineWriter {
    stdin: ChildStdin,
}

impl LineWriter {
    pub async fn send<T: Serialize>(&mut self, frame: &T) -> std::io::Result<()> {
        let mut line = serde_json::to_vec(frame).map_err(std::io::Error::other)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await
    }
}

/// Read half: yields raw lines; parsing is up to the protocol layer.
pub struct LineReader {
    lines: Lines<BufReader<ChildStdout>>,
}

impl LineReader {
    /// Next non-blank line, or `None` at EOF.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            match self.lines.next_line().await? {
                Some(line) if line.trim().is_empty() => continue,
                other => return Ok(other),
            }
        }
    }
}
