//! Flow Tailer - follows an append-only flow log
//!
//! Delivers complete lines in file order, each exactly once per file
//! generation:
//! - missing file: nothing to deliver yet
//! - file shrank or was replaced: start again from offset 0
//! - trailing line without '\n': held back until its terminator arrives
//! - line longer than the per-poll cap: dropped with a warning
//!
//! Polling is the source of truth. A filesystem watcher on the parent
//! directory only shortens the wait between polls.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};

/// Buffered wakeups from the watcher; extra events are coalesced
const WAKE_CHANNEL_CAPACITY: usize = 8;

/// Upper bound on bytes read by one poll; a backlog drains over several
pub const DEFAULT_MAX_POLL_BYTES: u64 = 4 * 1024 * 1024;

pub struct FlowTailer {
    path: PathBuf,
    poll_interval: Duration,
    watch_events: bool,
    /// Offset just past the last delivered '\n'
    position: u64,
    file_id: Option<u64>,
    max_poll_bytes: u64,
    /// Inside a line longer than `max_poll_bytes`, dropping until its '\n'
    discarding: bool,
    /// Last poll stopped before the end of the file
    behind: bool,
}

impl FlowTailer {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
            watch_events: false,
            position: 0,
            file_id: None,
            max_poll_bytes: DEFAULT_MAX_POLL_BYTES,
            discarding: false,
            behind: false,
        }
    }

    pub fn with_max_poll_bytes(mut self, max: u64) -> Self {
        self.max_poll_bytes = max.max(1);
        self
    }

    /// Also wake up on filesystem events
    pub fn with_watch_events(mut self, enabled: bool) -> Self {
        self.watch_events = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read every complete line appended since the last poll
    pub fn poll_once(&mut self) -> io::Result<Vec<String>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!("Flow log {} does not exist yet", self.path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        let metadata = file.metadata()?;
        let file_id = file_id(&metadata);
        let file_size = metadata.len();

        // Handle rotation (file got smaller or was replaced)
        if file_size < self.position || (self.file_id.is_some() && file_id != self.file_id) {
            log::info!(
                "Flow log {} was truncated or rotated, reading from the start",
                self.path.display()
            );
            self.position = 0;
            self.discarding = false;
        }
        self.file_id = file_id;
        self.behind = false;

        if file_size == self.position {
            return Ok(Vec::new());
        }

        let want = (file_size - self.position).min(self.max_poll_bytes);
        file.seek(SeekFrom::Start(self.position))?;
        let mut buf = Vec::with_capacity(want as usize);
        file.take(want).read_to_end(&mut buf)?;

        // Only complete lines; a partial tail is re-read next time
        let Some(last_newline) = buf.iter().rposition(|b| *b == b'\n') else {
            if buf.len() as u64 >= self.max_poll_bytes {
                log::warn!(
                    "Dropping flow line longer than {} bytes at offset {}",
                    self.max_poll_bytes,
                    self.position
                );
                self.position += buf.len() as u64;
                self.discarding = true;
                self.behind = self.position < file_size;
            }
            return Ok(Vec::new());
        };
        let mut complete = &buf[..=last_newline];
        self.position += complete.len() as u64;
        self.behind = self.position < file_size;

        if self.discarding {
            // Tail of the oversized line
            if let Some(end) = complete.iter().position(|b| *b == b'\n') {
                complete = &complete[end + 1..];
            }
            self.discarding = false;
        }

        let lines: Vec<String> = complete
            .split(|b| *b == b'\n')
            .map(|raw| String::from_utf8_lossy(raw).trim_end_matches('\r').to_string())
            .filter(|line| !line.trim().is_empty())
            .collect();

        log::debug!(
            "Read {} line(s) from {}, offset now {}",
            lines.len(),
            self.path.display(),
            self.position
        );
        Ok(lines)
    }

    /// Tail until `shutdown` flips to true, the receiver goes away, or the
    /// shutdown sender is dropped
    ///
    /// Poll errors are logged and retried on the next tick.
    pub async fn run(mut self, tx: mpsc::Sender<String>, mut shutdown: watch::Receiver<bool>) {
        let (wake_tx, mut wake_rx) = mpsc::channel::<()>(WAKE_CHANNEL_CAPACITY);
        let watcher = if self.watch_events {
            install_watcher(&self.path, wake_tx)
        } else {
            drop(wake_tx);
            None
        };

        log::info!(
            "Tailing {} every {:?}{}",
            self.path.display(),
            self.poll_interval,
            if watcher.is_some() { " (with file events)" } else { "" }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.poll_once() {
                Ok(lines) => {
                    let total = lines.len();
                    for (sent, line) in lines.into_iter().enumerate() {
                        tokio::select! {
                            res = tx.send(line) => {
                                if res.is_err() {
                                    log::info!("Flow consumer closed, tailer stopping");
                                    return;
                                }
                            }
                            _ = shutdown.changed() => {
                                log::warn!("Shutdown while delivering: {} read line(s) not queued", total - sent);
                                return;
                            }
                        }
                    }
                }
                Err(e) => log::warn!("Failed to poll {}: {}", self.path.display(), e),
            }

            if self.behind {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                Some(()) = wake_rx.recv() => {}
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("Tailer for {} stopped at offset {}", self.path.display(), self.position);
    }
}

#[cfg(unix)]
fn file_id(metadata: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

#[cfg(not(unix))]
fn file_id(_metadata: &std::fs::Metadata) -> Option<u64> {
    None
}

/// Watch the log's directory; `None` (polling only) when that fails
fn install_watcher(path: &Path, wake_tx: mpsc::Sender<()>) -> Option<RecommendedWatcher> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(|n| n.to_os_string());

    let handler = move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            let ours = event
                .paths
                .iter()
                .any(|p| p.file_name().map(|n| n.to_os_string()) == file_name);
            if ours {
                let _ = wake_tx.try_send(());
            }
        }
    };

    let mut watcher = match RecommendedWatcher::new(handler, Config::default()) {
        Ok(w) => w,
        Err(e) => {
            log::warn!("File watcher unavailable, polling only: {}", e);
            return None;
        }
    };

    if let Err(e) = watcher.watch(&dir, RecursiveMode::NonRecursive) {
        log::warn!("Cannot watch {}, polling only: {}", dir.display(), e);
        return None;
    }

    Some(watcher)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::tempdir;

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let mut tailer = FlowTailer::new(dir.path().join("conn.log"), Duration::from_millis(10));
        assert!(tailer.poll_once().unwrap().is_empty());
    }

    #[test]
    fn test_delivers_in_order_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10));

        append(&path, "{\"a\":1}\n{\"a\":2}\n");
        assert_eq!(tailer.poll_once().unwrap(), vec!["{\"a\":1}", "{\"a\":2}"]);

        // Nothing new: nothing delivered, however often we poll
        for _ in 0..3 {
            assert!(tailer.poll_once().unwrap().is_empty());
        }

        append(&path, "{\"a\":3}\n");
        assert_eq!(tailer.poll_once().unwrap(), vec!["{\"a\":3}"]);
    }

    #[test]
    fn test_partial_line_deferred() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10));

        append(&path, "{\"a\":1}\n{\"a\":");
        assert_eq!(tailer.poll_once().unwrap(), vec!["{\"a\":1}"]);
        assert_eq!(tailer.position(), 8);

        append(&path, "2}");
        assert!(tailer.poll_once().unwrap().is_empty());

        append(&path, "\n");
        assert_eq!(tailer.poll_once().unwrap(), vec!["{\"a\":2}"]);
    }

    #[test]
    fn test_truncation_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10));

        append(&path, "first-long-line\nsecond-long-line\n");
        assert_eq!(tailer.poll_once().unwrap().len(), 2);

        std::fs::write(&path, "new\n").unwrap();
        assert_eq!(tailer.poll_once().unwrap(), vec!["new"]);
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_resets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10));

        append(&path, "a\n");
        assert_eq!(tailer.poll_once().unwrap(), vec!["a"]);

        // Rotated: new file, already longer than the old offset
        let rotated = dir.path().join("conn.log.new");
        std::fs::write(&rotated, "b1\nb2\n").unwrap();
        std::fs::rename(&rotated, &path).unwrap();
        assert_eq!(tailer.poll_once().unwrap(), vec!["b1", "b2"]);
    }

    #[test]
    fn test_backlog_is_read_in_bounded_chunks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let backlog: String = (0..10).map(|i| format!("line-{:04}\n", i)).collect();
        append(&path, &backlog);

        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10)).with_max_poll_bytes(25);
        let mut batches = Vec::new();
        loop {
            let lines = tailer.poll_once().unwrap();
            if lines.is_empty() {
                break;
            }
            assert!(lines.len() <= 2);
            batches.push(lines);
        }

        assert_eq!(batches.len(), 5);
        let all: Vec<String> = batches.concat();
        let expected: Vec<String> = (0..10).map(|i| format!("line-{:04}", i)).collect();
        assert_eq!(all, expected);
        assert_eq!(tailer.position(), 100);
    }

    #[test]
    fn test_oversized_line_is_dropped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        append(&path, &format!("short\n{}\nnext\n", "x".repeat(20)));

        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10)).with_max_poll_bytes(8);
        let mut delivered = Vec::new();
        for _ in 0..10 {
            delivered.extend(tailer.poll_once().unwrap());
        }
        assert_eq!(delivered, vec!["short", "next"]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let mut tailer = FlowTailer::new(&path, Duration::from_millis(10));

        append(&path, "one\r\n\r\n   \ntwo\n");
        assert_eq!(tailer.poll_once().unwrap(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_run_streams_and_stops() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conn.log");
        let (tx, mut rx) = mpsc::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);

        let tailer = FlowTailer::new(&path, Duration::from_millis(20)).with_watch_events(true);
        let handle = tokio::spawn(tailer.run(tx, stop_rx));

        append(&path, "x\ny\n");
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert_eq!(first.as_deref(), Some("x"));
        assert_eq!(second.as_deref(), Some("y"));

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("tailer did not stop")
            .unwrap();
    }
}
