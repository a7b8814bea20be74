//! Daily relay log: one append-only `irc_YYYY-MM-DD.txt` file per calendar day.
use chrono::NaiveDate;
use log::{debug, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use super::RelayEvent;

/// `dir/irc_YYYY-MM-DD.txt`
pub fn segment_path(dir: &Path, date: NaiveDate) -> PathBuf {
    dir.join(format!("irc_{}.txt", date.format("%Y-%m-%d")))
}

pub struct SegmentLog {
    dir: PathBuf,
    open: Option<OpenSegment>,
}

struct OpenSegment {
    date: NaiveDate,
    writer: BufWriter<File>,
}

impl SegmentLog {
    pub fn new(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, open: None })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn segment_path(&self, date: NaiveDate) -> PathBuf {
        segment_path(&self.dir, date)
    }

    /// Date of the segment currently held open, if any.
    pub fn open_date(&self) -> Option<NaiveDate> {
        self.open.as_ref().map(|s| s.date)
    }

    /// Write one event into the segment for the event's own date.
    pub fn append(&mut self, event: &RelayEvent) -> io::Result<()> {
        let date = event.timestamp.date_naive();
        if self.open_date() != Some(date) {
            self.close()?;
            let path = self.segment_path(date);
            let file = OpenOptions::new().create(true).append(true).open(&path)?;
            info!("Relay log segment {}", path.display());
            self.open = Some(OpenSegment {
                date,
                writer: BufWriter::new(file),
            });
        }

        if let Some(segment) = self.open.as_mut() {
            segment.writer.write_all(event.log_line().as_bytes())?;
            segment.writer.write_all(b"\n")?;
            segment.writer.flush()?;
        }
        Ok(())
    }

    /// Last `n` lines of the segment for `date`, oldest first.
    pub fn recent(&self, date: NaiveDate, n: usize) -> io::Result<Vec<String>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let content = match fs::read_to_string(self.segment_path(date)) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }

    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut segment) = self.open.take() {
            segment.writer.flush()?;
            debug!("Closed relay log segment for {}", segment.date);
        }
        Ok(())
    }
}

impl Drop for SegmentLog {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
