//! Structured event log for scalars and text

use crate::error::{Error, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// One logged value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SummaryEvent {
    Scalar {
        tag: String,
        value: f64,
        step: usize,
        wall_time: f64,
    },
    Text {
        tag: String,
        text: String,
        step: usize,
        wall_time: f64,
    },
}

impl SummaryEvent {
    pub fn tag(&self) -> &str {
        match self {
            SummaryEvent::Scalar { tag, .. } | SummaryEvent::Text { tag, .. } => tag,
        }
    }

    pub fn step(&self) -> usize {
        match self {
            SummaryEvent::Scalar { step, .. } | SummaryEvent::Text { step, .. } => *step,
        }
    }
}

fn wall_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// Sink for scalar and text summaries keyed by tag and step
pub trait SummaryWriter: Send {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()>;

    fn add_text(&mut self, tag: &str, text: &str, step: usize) -> Result<()>;

    fn flush(&mut self) -> Result<()>;
}

/// Run directory name: `<yyMMdd-HHMMSS>-<name>`
pub fn run_dir_name(name: &str) -> String {
    format!("{}-{name}", Local::now().format("%y%m%d-%H%M%S"))
}

/// Appends events as JSON lines to `<dir>/events.jsonl`
pub struct JsonlSummaryWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlSummaryWriter {
    /// Writer in a fresh timestamped run directory under `log_dir`
    pub fn create(log_dir: &Path, name: &str) -> Result<Self> {
        Self::in_dir(&log_dir.join(run_dir_name(name)))
    }

    /// Writer appending to `<dir>/events.jsonl`
    pub fn in_dir(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join("events.jsonl");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &SummaryEvent) -> Result<()> {
        let line = serde_json::to_string(event)
            .map_err(|e| Error::Serialization(format!("summary event: {e}")))?;
        writeln!(self.out, "{line}")?;
        Ok(())
    }
}

impl SummaryWriter for JsonlSummaryWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.write_event(&SummaryEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
            wall_time: wall_time(),
        })
    }

    fn add_text(&mut self, tag: &str, text: &str, step: usize) -> Result<()> {
        self.write_event(&SummaryEvent::Text {
            tag: tag.to_string(),
            text: text.to_string(),
            step,
            wall_time: wall_time(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for JsonlSummaryWriter {
    fn drop(&mut self) {
        let _ = self.out.flush();
    }
}

/// Read back an events file
pub fn read_events(path: &Path) -> Result<Vec<SummaryEvent>> {
    fs::read_to_string(path)?
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| {
            serde_json::from_str(l)
                .map_err(|e| Error::Serialization(format!("{}: {e}", path.display())))
        })
        .collect()
}

/// In-memory writer; clones share one event list
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    events: Arc<Mutex<Vec<SummaryEvent>>>,
}

impl MemoryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SummaryEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: SummaryEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|_| Error::Serialization("summary event list is poisoned".to_string()))?
            .push(event);
        Ok(())
    }
}

impl SummaryWriter for MemoryWriter {
    fn add_scalar(&mut self, tag: &str, value: f64, step: usize) -> Result<()> {
        self.push(SummaryEvent::Scalar {
            tag: tag.to_string(),
            value,
            step,
            wall_time: wall_time(),
        })
    }

    fn add_text(&mut self, tag: &str, text: &str, step: usize) -> Result<()> {
        self.push(SummaryEvent::Text {
            tag: tag.to_string(),
            text: text.to_string(),
            step,
            wall_time: wall_time(),
        })
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_run_dir_name_format() {
        let name = run_dir_name("hcoco");
        let (stamp, rest) = name.split_at(13);
        assert_eq!(rest, "-hcoco");
        assert_eq!(&stamp[6..7], "-");
        assert!(stamp.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_jsonl_writer_round_trip() {
        let dir = tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::create(dir.path(), "exp").unwrap();
        writer.add_scalar("data/loss_G_L2", 0.25, 3).unwrap();
        writer.add_text("eval/metrics", "HCOCO MSE 1.00 | fMSE 2.00", 2).unwrap();
        writer.flush().unwrap();

        let events = read_events(writer.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].tag(), "data/loss_G_L2");
        assert_eq!(events[1].step(), 2);
        assert!(matches!(&events[1], SummaryEvent::Text { text, .. } if text.starts_with("HCOCO")));

        let run_dir = writer.path().parent().unwrap();
        assert!(run_dir.file_name().unwrap().to_str().unwrap().ends_with("-exp"));
    }

    #[test]
    fn test_event_json_shape() {
        let event = SummaryEvent::Scalar {
            tag: "a".to_string(),
            value: 1.0,
            step: 1,
            wall_time: 0.0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "scalar");
        assert_eq!(json["tag"], "a");
    }

    #[test]
    fn test_memory_writer_clones_share_events() {
        let handle = MemoryWriter::new();
        let mut writer = handle.clone();
        writer.add_scalar("x", 1.0, 0).unwrap();
        writer.add_text("y", "z", 4).unwrap();
        assert_eq!(handle.events().len(), 2);
    }
}
