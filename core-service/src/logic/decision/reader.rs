use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::csv::split_row;
use super::writer::StorageError;

/// Decision row as served to reporting consumers
///
/// Empty text fields and non-finite scores are `None`, never raw NaN/Inf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub timestamp: Option<String>,
    pub src_ip: Option<String>,
    pub dst_ip: Option<String>,
    pub decision: Option<String>,
    pub binary_score: Option<f64>,
    pub attack_label: Option<String>,
    pub app_label: Option<String>,
}

impl ReportRow {
    pub fn parse(line: &str) -> Self {
        let fields = split_row(line);
        let text = |i: usize| {
            fields
                .get(i)
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            timestamp: text(0),
            src_ip: text(1),
            dst_ip: text(2),
            decision: text(3),
            binary_score: text(4)
                .and_then(|s| s.parse::<f64>().ok())
                .filter(|v| v.is_finite()),
            attack_label: text(5),
            app_label: text(6),
        }
    }
}

/// Bytes read per step when scanning back from the end of the log
const TAIL_BLOCK_BYTES: u64 = 64 * 1024;

/// The `limit` most recent rows, oldest first
///
/// A missing log is an empty result. A trailing row without its terminator
/// is still being written and is left out. Only the tail of the file that
/// holds those rows is read.
pub fn recent_decisions(path: &Path, limit: usize) -> Result<Vec<ReportRow>, StorageError> {
    recent_decisions_in_blocks(path, limit, TAIL_BLOCK_BYTES)
}

fn recent_decisions_in_blocks(
    path: &Path,
    limit: usize,
    block: u64,
) -> Result<Vec<ReportRow>, StorageError> {
    let read_err = |source: io::Error| StorageError::Read {
        path: path.display().to_string(),
        source,
    };

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_err(e)),
    };
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut start = file.metadata().map_err(read_err)?.len();
    let mut tail: Vec<u8> = Vec::new();

    loop {
        let step = block.max(1).min(start);
        start -= step;
        let mut chunk = vec![0u8; step as usize];
        file.seek(SeekFrom::Start(start)).map_err(read_err)?;
        file.read_exact(&mut chunk).map_err(read_err)?;
        chunk.extend_from_slice(&tail);
        tail = chunk;

        if start == 0 || complete_rows(&tail, start).count() >= limit {
            break;
        }
    }

    let mut rows: Vec<ReportRow> = complete_rows(&tail, start)
        .rev()
        .take(limit)
        .map(|raw| ReportRow::parse(String::from_utf8_lossy(raw).trim_end_matches('\r')))
        .collect();
    rows.reverse();

    Ok(rows)
}

/// Non-blank rows of `tail` that are known to be whole
///
/// Bytes after the last '\n' are an unfinished row. Unless `tail` starts at
/// offset 0, bytes before its first '\n' may be the end of an earlier row.
fn complete_rows(tail: &[u8], start: u64) -> impl DoubleEndedIterator<Item = &[u8]> {
    let region = match tail.iter().rposition(|b| *b == b'\n') {
        Some(end) => &tail[..end],
        None => &tail[..0],
    };
    let region = if start == 0 {
        region
    } else {
        match region.iter().position(|b| *b == b'\n') {
            Some(first) => &region[first + 1..],
            None => &region[..0],
        }
    };
    region
        .split(|b| *b == b'\n')
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
}
