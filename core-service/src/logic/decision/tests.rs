use std::cell::RefCell;
use std::fs;
use std::io::{self, Write};
use std::rc::Rc;
use std::sync::Arc;

use chrono::Utc;
use tempfile::tempdir;

use super::reader::recent_decisions;
use super::record::{LoggedDecision, LoggedTag};
use super::writer::{DecisionLog, LogHandle, RowSink, StorageError};
use crate::logic::features::FlowIdentity;
use crate::logic::model::{ClassLabel, Verdict};

fn identity(src: &str, dst: &str) -> FlowIdentity {
    FlowIdentity {
        src: Some(src.to_string()),
        dst: Some(dst.to_string()),
    }
}

#[test]
fn test_logged_then_queried_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("predictions.csv");
    let log = DecisionLog::open(&path, 3).unwrap();

    let attack = Verdict::attack(0.95, ClassLabel::named("DDoS"));
    let normal = Verdict::normal(0.25, ClassLabel::named("HTTP, TLS"));
    log.append(&LoggedDecision::from_verdict(&identity("10.0.0.1", "10.0.0.2"), &attack, Utc::now()))
        .unwrap();
    log.append(&LoggedDecision::from_verdict(&identity("10.0.0.3", "10.0.0.4"), &normal, Utc::now()))
        .unwrap();
    log.append(&LoggedDecision::failed(&identity("10.0.0.5", "10.0.0.6"), None, Utc::now()))
        .unwrap();

    let rows = recent_decisions(&path, 50).unwrap();
    assert_eq!(rows.len(), 3);

    assert_eq!(rows[0].decision.as_deref(), Some("ATTACK"));
    assert_eq!(rows[0].src_ip.as_deref(), Some("10.0.0.1"));
    assert_eq!(rows[0].binary_score, Some(0.95));
    assert_eq!(rows[0].attack_label.as_deref(), Some("DDoS"));
    assert_eq!(rows[0].app_label, None);

    // Quoted label survives
    assert_eq!(rows[1].app_label.as_deref(), Some("HTTP, TLS"));
    assert_eq!(rows[1].binary_score, Some(0.25));

    // Errored flow: no label, no score
    assert_eq!(rows[2].decision.as_deref(), Some(LoggedTag::Error.as_str()));
    assert_eq!(rows[2].binary_score, None);
    assert_eq!(rows[2].attack_label, None);
    assert_eq!(rows[2].app_label, None);
}

#[test]
fn test_reopen_appends() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("predictions.csv");
    let verdict = Verdict::normal(0.1, ClassLabel::named("DNS"));

    for _ in 0..2 {
        let log = DecisionLog::open(&path, 1).unwrap();
        log.append(&LoggedDecision::from_verdict(&identity("a", "b"), &verdict, Utc::now()))
            .unwrap();
    }

    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content.lines().count(), 2);
}

#[test]
fn test_concurrent_rows_do_not_interleave() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("predictions.csv");
    let log = Arc::new(DecisionLog::open(&path, 3).unwrap());

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let log = Arc::clone(&log);
            std::thread::spawn(move || {
                let label = format!("app-{}-{}", t, "x".repeat(200));
                let verdict = Verdict::normal(0.5, ClassLabel::named(label));
                for _ in 0..50 {
                    let row = LoggedDecision::from_verdict(&identity("10.1.1.1", "10.2.2.2"), &verdict, Utc::now());
                    log.append(&row).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let content = fs::read_to_string(&path).unwrap();
    let lines: Vec<_> = content.lines().collect();
    assert_eq!(lines.len(), 400);
    for line in lines {
        assert_eq!(line.split(',').count(), 7, "torn row: {}", line);
        assert!(line.contains(",NORMAL,0.5,,app-"));
    }
}

#[test]
fn test_open_fails_when_parent_is_a_file() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, "x").unwrap();

    let err = DecisionLog::open(&blocker.join("predictions.csv"), 3).err().unwrap();
    assert!(matches!(err, StorageError::Open { .. }));
}

#[test]
fn test_append_failure_is_surfaced() {
    // /dev/full accepts open but fails every write with ENOSPC
    let full = std::path::Path::new("/dev/full");
    if !full.exists() {
        return;
    }

    let log = DecisionLog::open(full, 3).unwrap();
    let verdict = Verdict::attack(0.9, ClassLabel::named("Bot"));
    let err = log
        .append(&LoggedDecision::from_verdict(&identity("a", "b"), &verdict, Utc::now()))
        .unwrap_err();

    assert!(matches!(err, StorageError::Append { attempts: 3, .. }));
}

// ============================================================================
// PARTIAL WRITES
// ============================================================================

/// In-memory sink that accepts `budget` bytes and then fails like a full disk
struct ShortSink {
    data: Rc<RefCell<Vec<u8>>>,
    budget: usize,
    can_truncate: bool,
}

impl ShortSink {
    fn new(data: &Rc<RefCell<Vec<u8>>>, budget: usize, can_truncate: bool) -> Self {
        Self {
            data: Rc::clone(data),
            budget,
            can_truncate,
        }
    }
}

impl Write for ShortSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.budget == 0 {
            return Err(io::Error::other("no space left on device"));
        }
        let n = buf.len().min(self.budget);
        self.data.borrow_mut().extend_from_slice(&buf[..n]);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RowSink for ShortSink {
    fn end(&mut self) -> io::Result<u64> {
        Ok(self.data.borrow().len() as u64)
    }

    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        if !self.can_truncate {
            return Err(io::Error::other("truncate not supported"));
        }
        self.data.borrow_mut().truncate(len as usize);
        Ok(())
    }
}

fn contents(data: &Rc<RefCell<Vec<u8>>>) -> String {
    String::from_utf8(data.borrow().clone()).unwrap()
}

#[test]
fn test_short_write_is_rolled_back_before_retry() {
    let data = Rc::new(RefCell::new(b"row0\n".to_vec()));
    let mut handle = LogHandle::new(ShortSink::new(&data, 5, true));

    let row = b"ts,10.0.0.1,10.0.0.2,NORMAL,0.1,,HTTP\n";
    assert!(handle.write_row(row, || Ok(ShortSink::new(&data, usize::MAX, true))).is_err());
    assert_eq!(contents(&data), "row0\n");

    handle
        .write_row(row, || Ok(ShortSink::new(&data, usize::MAX, true)))
        .unwrap();
    assert_eq!(contents(&data), "row0\nts,10.0.0.1,10.0.0.2,NORMAL,0.1,,HTTP\n");
}

#[test]
fn test_unremovable_fragment_stays_on_its_own_line() {
    let data = Rc::new(RefCell::new(b"row0\n".to_vec()));
    let mut handle = LogHandle::new(ShortSink::new(&data, 5, false));

    let row = b"ts,10.0.0.1,10.0.0.2,ATTACK,0.9,DDoS,\n";
    assert!(handle.write_row(row, || Ok(ShortSink::new(&data, usize::MAX, false))).is_err());
    handle
        .write_row(row, || Ok(ShortSink::new(&data, usize::MAX, false)))
        .unwrap();

    let text = contents(&data);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines, vec!["row0", "ts,10", "ts,10.0.0.1,10.0.0.2,ATTACK,0.9,DDoS,"]);

    // Fence is written once, later rows follow directly
    handle.write_row(b"next\n", || unreachable!()).unwrap();
    assert!(contents(&data).ends_with("DDoS,\nnext\n"));
}
