//! Append-only JSONL files, one per client per day.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use super::entry::{LevelCounts, LogEntry};

/// Appends entries to `logs/raw/<date>_<client>.jsonl`
pub struct ClientLogWriter {
    client: String,
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl ClientLogWriter {
    pub fn new(logs_dir: impl AsRef<Path>, client: impl Into<String>) -> io::Result<Self> {
        let client = client.into();
        let raw_dir = logs_dir.as_ref().join("raw");
        fs::create_dir_all(&raw_dir)?;

        let date = chrono::Local::now().format("%Y-%m-%d");
        let path = raw_dir.join(format!("{}_{}.jsonl", date, file_safe(&client)));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            client,
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and flush. Lines stay whole under concurrent appends
    /// from other processes because each file has a single writer.
    pub fn write(&self, entry: &LogEntry) -> io::Result<()> {
        let json = entry
            .to_json_line()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()
    }

    pub fn flush(&self) -> io::Result<()> {
        self.writer.lock().flush()
    }
}

impl Drop for ClientLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Display names may contain anything; file names may not.
fn file_safe(client: &str) -> String {
    let cleaned: String = client
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "client".to_string()
    } else {
        cleaned
    }
}

/// Every entry under `logs/raw`, optionally limited to one client, sorted by
/// timestamp. Unparseable lines are skipped.
pub fn read_entries(logs_dir: impl AsRef<Path>, client: Option<&str>) -> io::Result<Vec<LogEntry>> {
    let raw_dir = logs_dir.as_ref().join("raw");
    if !raw_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for dir_entry in fs::read_dir(&raw_dir)? {
        let path = dir_entry?.path();
        if path.extension().map_or(true, |e| e != "jsonl") {
            continue;
        }
        let content = fs::read_to_string(&path)?;
        entries.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .filter_map(|line| LogEntry::from_json_line(line).ok())
                .filter(|entry| client.map_or(true, |c| entry.client == c)),
        );
    }

    entries.sort_by(|a, b| a.ts.cmp(&b.ts));
    Ok(entries)
}

/// Level counts per client.
pub fn summarize(entries: &[LogEntry]) -> BTreeMap<String, LevelCounts> {
    let mut summary: BTreeMap<String, LevelCounts> = BTreeMap::new();
    for entry in entries {
        summary.entry(entry.client.clone()).or_default().add(&entry.level);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_writer_creates_client_file() {
        let temp = TempDir::new().unwrap();
        let writer = ClientLogWriter::new(temp.path(), "my laptop").unwrap();

        assert!(temp.path().join("raw").exists());
        assert!(writer.path().exists());
        assert!(writer.path().to_string_lossy().ends_with("_my_laptop.jsonl"));
        assert_eq!(writer.client(), "my laptop");
    }

    #[test]
    fn test_read_and_summarize_two_clients() {
        let temp = TempDir::new().unwrap();
        let laptop = ClientLogWriter::new(temp.path(), "laptop").unwrap();
        let phone = ClientLogWriter::new(temp.path(), "phone").unwrap();

        laptop.write(&LogEntry::new("info", "laptop", "sync", "Sync started")).unwrap();
        phone.write(&LogEntry::new("warn", "phone", "sync", "Mirror failed")).unwrap();
        laptop.write(&LogEntry::new("error", "laptop", "sync", "Drain failed")).unwrap();
        drop(laptop);
        drop(phone);

        let all = read_entries(temp.path(), None).unwrap();
        assert_eq!(all.len(), 3);

        let laptop_only = read_entries(temp.path(), Some("laptop")).unwrap();
        assert_eq!(laptop_only.len(), 2);

        let summary = summarize(&all);
        assert_eq!(summary["laptop"].error, 1);
        assert_eq!(summary["phone"].warn, 1);
    }

    #[test]
    fn test_missing_directory_reads_empty() {
        let temp = TempDir::new().unwrap();
        assert!(read_entries(temp.path().join("nope"), None).unwrap().is_empty());
    }
}
