use anyhow::{Context, Result};
use leaf_proto::JournalEntry;
use serde::Deserialize;
use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};
use tokio::{
    fs,
    io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt},
    sync::Mutex,
};
use tracing::warn;

/// Bytes read per step when walking the journal backwards.
const TAIL_CHUNK: u64 = 16 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub path: String,
    /// When set, every classified crop is kept here as JPEG.
    pub image_dir: Option<String>,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self { path: "data/journal.jsonl".into(), image_dir: None }
    }
}

/// Append-only JSONL record of captures, detections and actions.
pub struct Journal {
    path: PathBuf,
    image_dir: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl Journal {
    pub fn new(cfg: &JournalConfig) -> Self {
        Self {
            path: PathBuf::from(&cfg.path),
            image_dir: cfg.image_dir.as_ref().map(PathBuf::from),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("open journal {}", self.path.display()))?;
        f.write_all(&line).await?;
        f.flush().await?;
        Ok(())
    }

    /// Stores a crop next to the journal; returns its path, or `None` when image keeping is off.
    pub async fn save_image(&self, name: &str, jpeg: &[u8]) -> Result<Option<String>> {
        let Some(dir) = &self.image_dir else { return Ok(None); };
        fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}.jpg", name));
        fs::write(&path, jpeg).await.with_context(|| format!("write {}", path.display()))?;
        Ok(Some(path.to_string_lossy().into_owned()))
    }

    /// Maps a name relative to the image directory onto a file path. Names
    /// that could leave the directory are refused.
    pub fn resolve_image(&self, name: &str) -> Option<PathBuf> {
        let dir = self.image_dir.as_ref()?;
        let rel = Path::new(name);
        let plain = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if name.is_empty() || !plain {
            return None;
        }
        Some(dir.join(rel))
    }

    /// Newest-first tail of the journal. Unparseable lines are skipped.
    ///
    /// Reads backwards from the end in fixed chunks, so the cost follows
    /// `limit` rather than the size of the file.
    pub async fn recent(&self, limit: usize) -> Result<Vec<JournalEntry>> {
        let mut f = match fs::File::open(&self.path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e).with_context(|| format!("open journal {}", self.path.display())),
        };
        let mut pos = f.metadata().await?.len();
        let mut out = Vec::new();
        // head of a line that started before `pos`
        let mut carry: Vec<u8> = Vec::new();

        while pos > 0 && out.len() < limit {
            let n = TAIL_CHUNK.min(pos);
            pos -= n;
            f.seek(SeekFrom::Start(pos)).await?;
            let mut buf = vec![0u8; n as usize];
            f.read_exact(&mut buf).await?;
            buf.extend_from_slice(&carry);

            let mut lines: Vec<&[u8]> = buf.split(|b| *b == b'\n').collect();
            let head = if pos > 0 { lines.remove(0).to_vec() } else { Vec::new() };
            for line in lines.into_iter().rev() {
                if out.len() >= limit {
                    break;
                }
                push_line(&mut out, line);
            }
            carry = head;
        }
        Ok(out)
    }
}

fn push_line(out: &mut Vec<JournalEntry>, line: &[u8]) {
    if line.iter().all(|b| b.is_ascii_whitespace()) {
        return;
    }
    match serde_json::from_slice::<JournalEntry>(line) {
        Ok(e) => out.push(e),
        Err(e) => warn!("journal: skipping bad line: {}", e),
    }
}
