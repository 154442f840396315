//! Per-job append-only log files.
//!
//! Each line is `[<UTC timestamp>] <message>`; a multi-line message becomes
//! several prefixed lines. A message is written with a single `write_all`
//! followed by a flush. Readers only ever get whole lines back,
//! so a poller never observes a torn line even while the job is writing.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};

/// Writer for one job's log file.
#[derive(Debug)]
pub struct JobLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl JobLog {
    /// Open `path` for appending, creating it and its directory if needed.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Append one timestamped line and flush it.
    pub fn write_line(&self, message: &str) -> io::Result<()> {
        let line = format_line(message);
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(line.as_bytes())?;
        file.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Every line of a multi-line message gets its own timestamp prefix.
fn format_line(message: &str) -> String {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    message
        .trim_end_matches(&['\r', '\n'][..])
        .split('\n')
        .map(|line| format!("[{}] {}\n", timestamp, line.trim_end_matches('\r')))
        .collect()
}

/// Read complete lines from `path` starting at byte `offset`.
///
/// Returns the text and the offset to resume from. A trailing partial line
/// is left for the next call. A missing file reads as empty at offset 0; an
/// offset at or past the end returns nothing and the same offset.
pub fn read_from(path: &Path, offset: u64) -> io::Result<(String, u64)> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((String::new(), 0)),
        Err(e) => return Err(e),
    };

    let len = file.metadata()?.len();
    if offset >= len {
        return Ok((String::new(), offset));
    }

    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity((len - offset) as usize);
    file.read_to_end(&mut buf)?;

    let Some(last_newline) = buf.iter().rposition(|&b| b == b'\n') else {
        return Ok((String::new(), offset));
    };
    buf.truncate(last_newline + 1);

    let next = offset + buf.len() as u64;
    Ok((String::from_utf8_lossy(&buf).into_owned(), next))
}
