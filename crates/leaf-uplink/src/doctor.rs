use anyhow::Result;
use std::path::Path;

use crate::{ClassifierConfig, JournalConfig};

pub fn check_journal(cfg: &JournalConfig) -> Result<()> {
    let p = Path::new(&cfg.path);
    anyhow::ensure!(!cfg.path.is_empty(), "journal.path empty");
    if p.exists() {
        anyhow::ensure!(p.is_file(), "journal.path is not a file: {}", cfg.path);
    }
    if let Some(dir) = &cfg.image_dir {
        let d = Path::new(dir);
        if d.exists() {
            anyhow::ensure!(d.is_dir(), "journal.image_dir is not a dir: {}", dir);
        }
    }
    Ok(())
}

pub fn check_classifier(cfg: &ClassifierConfig) -> Result<()> {
    anyhow::ensure!(
        cfg.url.starts_with("http://") || cfg.url.starts_with("https://"),
        "classifier.url must be http(s): {}", cfg.url
    );
    anyhow::ensure!(cfg.timeout_ms >= 100 && cfg.timeout_ms <= 120_000, "classifier.timeout_ms should be 100..120000");
    anyhow::ensure!(cfg.input_size >= 32, "classifier.input_size too small");
    anyhow::ensure!(cfg.jpeg_quality >= 10 && cfg.jpeg_quality <= 100, "classifier.jpeg_quality should be 10..100");
    Ok(())
}
