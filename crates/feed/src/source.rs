//! Feed sources — where raw server log lines come from.
//!
//! - [`CommandFeed`] runs a command (typically a small script tailing the
//!   server log) and reads its stdout. When the command exits it is run
//!   again, so a script that prints one line and exits works as well as one
//!   that streams forever.
//! - [`FileTailFeed`] follows a log file from its current end, reopening it
//!   from the start when it is truncated or replaced by a new file.
//!
//! Both keep running through transient failures: a feed that cannot be read
//! is reopened after `reopen_delay` and resumes.

use async_trait::async_trait;
use mcbridge_config::{FeedConfig, FeedKind};
use mcbridge_core::error::FeedError;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const LINE_BUFFER: usize = 256;

/// A raw line source.
#[async_trait]
pub trait FeedSource: Send + Sync {
    fn name(&self) -> &str;

    /// Start producing lines. The receiver closes only if the source gives
    /// up for good; dropping it stops the source.
    async fn start(&self) -> Result<mpsc::Receiver<String>, FeedError>;
}

/// Build the configured source.
pub fn from_config(config: &FeedConfig) -> Result<Box<dyn FeedSource>, FeedError> {
    let reopen_delay = Duration::from_millis(config.reopen_delay_ms);
    match config.kind {
        FeedKind::Command => {
            let program = config.command.clone().ok_or_else(|| FeedError::Open {
                source_name: "command".into(),
                reason: "feed.command is not set".into(),
            })?;
            Ok(Box::new(
                CommandFeed::new(program, config.args.clone()).with_reopen_delay(reopen_delay),
            ))
        }
        FeedKind::File => {
            let path = config.path.clone().ok_or_else(|| FeedError::Open {
                source_name: "file".into(),
                reason: "feed.path is not set".into(),
            })?;
            Ok(Box::new(
                FileTailFeed::new(path)
                    .with_reopen_delay(reopen_delay)
                    .with_poll_interval(Duration::from_millis(config.poll_interval_ms)),
            ))
        }
    }
}

pub struct CommandFeed {
    program: String,
    args: Vec<String>,
    reopen_delay: Duration,
    label: String,
}

impl CommandFeed {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            label: format!("command:{program}"),
            program,
            args,
            reopen_delay: Duration::from_secs(1),
        }
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    fn spawn_child(program: &str, args: &[String]) -> std::io::Result<Child> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

#[async_trait]
impl FeedSource for CommandFeed {
    fn name(&self) -> &str {
        &self.label
    }

    async fn start(&self) -> Result<mpsc::Receiver<String>, FeedError> {
        // First spawn is checked so a misconfigured command fails startup.
        let first = Self::spawn_child(&self.program, &self.args).map_err(|e| FeedError::Open {
            source_name: self.label.clone(),
            reason: e.to_string(),
        })?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let program = self.program.clone();
        let args = self.args.clone();
        let reopen_delay = self.reopen_delay;

        tokio::spawn(async move {
            let mut next = Some(first);
            loop {
                let child = match next.take() {
                    Some(child) => child,
                    None => match Self::spawn_child(&program, &args) {
                        Ok(child) => child,
                        Err(e) => {
                            warn!(command = %program, error = %e, "Feed command failed to start, retrying");
                            tokio::time::sleep(reopen_delay).await;
                            continue;
                        }
                    },
                };

                let (produced, receiver_gone) = pump_child(child, &tx).await;
                if receiver_gone {
                    break;
                }
                // A run that produced lines is restarted at once; an empty
                // run waits so a broken script does not spin.
                if produced == 0 {
                    tokio::time::sleep(reopen_delay).await;
                }
            }
            debug!(command = %program, "Command feed stopped");
        });

        Ok(rx)
    }
}

/// Forward a child's stdout lines. Returns lines forwarded and whether the
/// receiver went away.
async fn pump_child(mut child: Child, tx: &mpsc::Sender<String>) -> (usize, bool) {
    let Some(stdout) = child.stdout.take() else {
        return (0, false);
    };
    let mut lines = BufReader::new(stdout).split(b'\n');
    let mut produced = 0;

    loop {
        match lines.next_segment().await {
            Ok(Some(bytes)) => {
                produced += 1;
                let line = String::from_utf8_lossy(&bytes)
                    .trim_end_matches('\r')
                    .to_string();
                if tx.send(line).await.is_err() {
                    return (produced, true);
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Feed command output unreadable");
                break;
            }
        }
    }

    match child.wait().await {
        Ok(status) if !status.success() => debug!(%status, "Feed command exited"),
        Err(e) => debug!(error = %e, "Feed command wait failed"),
        _ => {}
    }
    (produced, false)
}

pub struct FileTailFeed {
    path: PathBuf,
    reopen_delay: Duration,
    poll_interval: Duration,
    label: String,
}

impl FileTailFeed {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            label: format!("file:{}", path.display()),
            path,
            reopen_delay: Duration::from_secs(1),
            poll_interval: Duration::from_millis(250),
        }
    }

    pub fn with_reopen_delay(mut self, delay: Duration) -> Self {
        self.reopen_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[async_trait]
impl FeedSource for FileTailFeed {
    fn name(&self) -> &str {
        &self.label
    }

    async fn start(&self) -> Result<mpsc::Receiver<String>, FeedError> {
        let mut file = tokio::fs::File::open(&self.path)
            .await
            .map_err(|e| FeedError::Open {
                source_name: self.label.clone(),
                reason: e.to_string(),
            })?;
        let identity = file
            .metadata()
            .await
            .ok()
            .and_then(|m| file_identity(&m));
        // Only lines written from now on are events.
        let start = file
            .seek(std::io::SeekFrom::End(0))
            .await
            .map_err(|e| FeedError::Read(e.to_string()))?;

        let (tx, rx) = mpsc::channel(LINE_BUFFER);
        let tail = Tail {
            path: self.path.clone(),
            reader: BufReader::new(file),
            identity,
            position: start,
            partial: Vec::new(),
        };
        tokio::spawn(tail.run(tx, self.reopen_delay, self.poll_interval));

        Ok(rx)
    }
}

/// Device and inode of an open log file, used to tell a rotated file from
/// the one being read.
#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((meta.dev(), meta.ino()))
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<(u64, u64)> {
    None
}

struct Tail {
    path: PathBuf,
    reader: BufReader<tokio::fs::File>,
    identity: Option<(u64, u64)>,
    /// Byte offset of the end of the last complete line.
    position: u64,
    partial: Vec<u8>,
}

impl Tail {
    async fn run(
        mut self,
        tx: mpsc::Sender<String>,
        reopen_delay: Duration,
        poll_interval: Duration,
    ) {
        loop {
            if tx.is_closed() {
                break;
            }
            match self.reader.read_until(b'\n', &mut self.partial).await {
                Ok(0) => {
                    let meta = tokio::fs::metadata(&self.path).await;
                    match meta {
                        Ok(meta) if self.replaced(&meta) => {
                            info!(path = %self.path.display(), "Log file rotated or truncated, reading from start");
                            self.reopen_at(0, reopen_delay).await;
                        }
                        Ok(_) => tokio::time::sleep(poll_interval).await,
                        Err(e) => {
                            debug!(path = %self.path.display(), error = %e, "Log file missing");
                            tokio::time::sleep(reopen_delay).await;
                        }
                    }
                }
                Ok(_) => {
                    // A line without its newline is still being written.
                    if self.partial.last() != Some(&b'\n') {
                        continue;
                    }
                    self.position += self.partial.len() as u64;
                    let line = String::from_utf8_lossy(&self.partial)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    self.partial.clear();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(path = %self.path.display(), error = %e, "Log file unreadable, reopening");
                    tokio::time::sleep(reopen_delay).await;
                    let resume = match tokio::fs::metadata(&self.path).await {
                        Ok(meta) if self.replaced(&meta) => 0,
                        _ => self.position,
                    };
                    self.reopen_at(resume, reopen_delay).await;
                }
            }
        }
        debug!(path = %self.path.display(), "File feed stopped");
    }

    /// The path now names a different file, or the file shrank below what
    /// has been read.
    fn replaced(&self, meta: &std::fs::Metadata) -> bool {
        let moved = match (self.identity, file_identity(meta)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        moved || meta.len() < self.position
    }

    async fn reopen_at(&mut self, offset: u64, reopen_delay: Duration) {
        let opened = async {
            let mut file = tokio::fs::File::open(&self.path).await?;
            let meta = file.metadata().await?;
            file.seek(std::io::SeekFrom::Start(offset)).await?;
            Ok::<_, std::io::Error>((file, meta))
        };
        match opened.await {
            Ok((file, meta)) => {
                self.reader = BufReader::new(file);
                self.identity = file_identity(&meta);
                self.position = offset;
                self.partial.clear();
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Log file reopen failed");
                tokio::time::sleep(reopen_delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    async fn recv(rx: &mut mpsc::Receiver<String>) -> String {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_feed_reruns_after_exit() {
        let feed = CommandFeed::new(
            "sh",
            vec!["-c".into(), "echo '[Alice]: hi'; echo '[Bob]: yo'".into()],
        )
        .with_reopen_delay(Duration::from_millis(10));

        let mut rx = feed.start().await.unwrap();
        assert_eq!(recv(&mut rx).await, "[Alice]: hi");
        assert_eq!(recv(&mut rx).await, "[Bob]: yo");
        // Second run of the same command.
        assert_eq!(recv(&mut rx).await, "[Alice]: hi");
    }

    #[tokio::test]
    async fn command_feed_missing_program_fails_to_open() {
        let feed = CommandFeed::new("/nonexistent/chat-poll.sh", vec![]);
        assert!(matches!(feed.start().await, Err(FeedError::Open { .. })));
    }

    #[tokio::test]
    async fn file_feed_follows_appended_lines_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, "old line\n").unwrap();

        let feed = FileTailFeed::new(&path).with_poll_interval(Duration::from_millis(10));
        let mut rx = feed.start().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(f, "[12:00:00] [Server thread/INFO]: <Alice> hello").unwrap();
        write!(f, "Bob joi").unwrap();
        f.flush().unwrap();
        assert_eq!(recv(&mut rx).await, "[12:00:00] [Server thread/INFO]: <Alice> hello");

        writeln!(f, "ned the game").unwrap();
        f.flush().unwrap();
        assert_eq!(recv(&mut rx).await, "Bob joined the game");
    }

    #[tokio::test]
    async fn file_feed_restarts_after_truncation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, "a fairly long line that was here before\n").unwrap();

        let feed = FileTailFeed::new(&path)
            .with_poll_interval(Duration::from_millis(10))
            .with_reopen_delay(Duration::from_millis(10));
        let mut rx = feed.start().await.unwrap();

        std::fs::write(&path, "fresh\n").unwrap();
        assert_eq!(recv(&mut rx).await, "fresh");
    }

    #[tokio::test]
    async fn file_feed_invalid_utf8_line_is_decoded_not_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, "OLD <Alice> HaksBot old mention\n").unwrap();

        let feed = FileTailFeed::new(&path)
            .with_poll_interval(Duration::from_millis(10))
            .with_reopen_delay(Duration::from_millis(10));
        let mut rx = feed.start().await.unwrap();

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"bad \xff\xfe byte\n").unwrap();
        writeln!(f, "<Bob> after").unwrap();
        f.flush().unwrap();

        assert_eq!(recv(&mut rx).await, "bad \u{FFFD}\u{FFFD} byte");
        assert_eq!(recv(&mut rx).await, "<Bob> after");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(rx.try_recv().is_err(), "old lines were replayed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_feed_follows_rotation_to_a_longer_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("latest.log");
        std::fs::write(&path, "short\n").unwrap();

        let feed = FileTailFeed::new(&path)
            .with_poll_interval(Duration::from_millis(10))
            .with_reopen_delay(Duration::from_millis(10));
        let mut rx = feed.start().await.unwrap();

        // The new log is already longer than the old read offset.
        std::fs::rename(&path, dir.path().join("2026-01-01-1.log")).unwrap();
        std::fs::write(&path, "first line of the new log\nsecond line\n").unwrap();

        assert_eq!(recv(&mut rx).await, "first line of the new log");
        assert_eq!(recv(&mut rx).await, "second line");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_feed_decodes_invalid_utf8_lossily() {
        let feed = CommandFeed::new(
            "sh",
            vec!["-c".into(), r"printf 'a\377b\nnext\n'; sleep 60".into()],
        );
        let mut rx = feed.start().await.unwrap();
        assert_eq!(recv(&mut rx).await, "a\u{FFFD}b");
        assert_eq!(recv(&mut rx).await, "next");
    }

    #[tokio::test]
    async fn file_feed_missing_file_fails_to_open() {
        let feed = FileTailFeed::new("/nonexistent/latest.log");
        assert!(matches!(feed.start().await, Err(FeedError::Open { .. })));
    }

    #[test]
    fn from_config_requires_command_or_path() {
        let mut config = FeedConfig::default();
        assert!(from_config(&config).is_err());
        config.command = Some("./chat-poll.sh".into());
        assert_eq!(from_config(&config).unwrap().name(), "command:./chat-poll.sh");

        config.kind = FeedKind::File;
        assert!(from_config(&config).is_err());
        config.path = Some(PathBuf::from("logs/latest.log"));
        assert_eq!(from_config(&config).unwrap().name(), "file:logs/latest.log");
    }
}
