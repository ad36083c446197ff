use std::collections::HashMap;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

use anyhow::Result;
use mnemon_types::{Envelope, IngestSource, Provider};
use notify::{Event, EventKind, PollWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::pipeline::IngestHandle;

/// File-watcher source configuration
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Directory holding provider session logs, one subdirectory per
    /// provider (`claude_code/`, `gemini/`, ...)
    pub root: PathBuf,
    pub poll_interval: Duration,
}

impl WatcherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

/// Tails provider JSONL session logs and feeds the pipeline at
/// file-watcher priority.
///
/// Byte offsets are tracked per file, so only appended lines are read
/// on each change; a restart re-reads from the top, which the dedup
/// layers absorb.
pub struct FileWatcherSource {
    _watcher: PollWatcher,
    _handle: std::thread::JoinHandle<()>,
}

impl FileWatcherSource {
    pub fn start(config: WatcherConfig, ingest: IngestHandle) -> Result<Self> {
        let (tx_fs, rx_fs) = channel();

        let notify_config =
            notify::Config::default().with_poll_interval(config.poll_interval);
        let mut watcher = PollWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = tx_fs.send(event);
                }
            },
            notify_config,
        )?;

        std::fs::create_dir_all(&config.root)?;
        watcher.watch(&config.root, RecursiveMode::Recursive)?;

        let root = config.root.clone();
        let handle = std::thread::Builder::new()
            .name("mnemon-file-watcher".to_string())
            .spawn(move || {
                let mut offsets: HashMap<PathBuf, u64> = HashMap::new();
                while let Ok(event) = rx_fs.recv() {
                    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        continue;
                    }
                    for path in &event.paths {
                        if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                            tail_file(&root, path, &mut offsets, &ingest);
                        }
                    }
                }
            })?;

        Ok(Self {
            _watcher: watcher,
            _handle: handle,
        })
    }
}

/// Read lines appended since the last visit and submit them.
fn tail_file(
    root: &Path,
    path: &Path,
    offsets: &mut HashMap<PathBuf, u64>,
    ingest: &IngestHandle,
) {
    let offset = offsets.get(path).copied().unwrap_or(0);
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "log file open failed");
            return;
        }
    };

    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::Start(offset)).is_err() {
        return;
    }

    let provider = provider_for(root, path);
    let session_hint = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string);

    let mut consumed = offset;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => break,
            Ok(bytes) => {
                // Only complete lines advance the offset; a partially
                // flushed record is retried on the next change
                if !line.ends_with('\n') {
                    break;
                }
                consumed += bytes as u64;

                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<serde_json::Value>(trimmed) {
                    Ok(payload) => {
                        let mut envelope = Envelope::new(provider, payload);
                        envelope.headers.source = Some(IngestSource::FileWatcher);
                        if envelope.payload.get("session_id").is_none() {
                            envelope.headers.session_id = session_hint.clone();
                        }
                        if let Err(err) = ingest.submit_blocking(envelope) {
                            warn!(path = %path.display(), error = %err, "submit failed");
                        }
                    }
                    Err(err) => {
                        debug!(path = %path.display(), error = %err, "skipping malformed line");
                    }
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "log read failed");
                break;
            }
        }
    }

    offsets.insert(path.to_path_buf(), consumed);
}

/// Provider from the first path segment under the watch root.
fn provider_for(root: &Path, path: &Path) -> Provider {
    let segment = path
        .strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .and_then(|c| c.as_os_str().to_str())
        .unwrap_or_default();
    match segment {
        "gemini" => Provider::Gemini,
        "hooks" => Provider::Generic,
        _ => Provider::ClaudeCode,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_layout() {
        let root = Path::new("/logs");
        assert_eq!(
            provider_for(root, Path::new("/logs/claude_code/s1.jsonl")),
            Provider::ClaudeCode
        );
        assert_eq!(
            provider_for(root, Path::new("/logs/gemini/s2.jsonl")),
            Provider::Gemini
        );
        assert_eq!(
            provider_for(root, Path::new("/logs/hooks/s3.jsonl")),
            Provider::Generic
        );
        assert_eq!(
            provider_for(root, Path::new("/logs/s4.jsonl")),
            Provider::ClaudeCode
        );
    }
}
