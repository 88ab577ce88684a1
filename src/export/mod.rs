pub mod metrics;

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

use self::metrics::SyncMetrics;

/// Write metrics to a node-exporter textfile collector path.
///
/// The file is replaced atomically: metrics go to a temporary file in the
/// same directory, which is then renamed over `path`.
pub fn write_textfile(path: &Path, metrics: &SyncMetrics) -> Result<()> {
    let text = metrics.encode_text()?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary metrics file in {}", dir.display()))?;
    tmp.write_all(text.as_bytes())
        .context("writing metrics")?;
    tmp.persist(path)
        .with_context(|| format!("replacing {}", path.display()))?;

    tracing::debug!(path = %path.display(), "metrics textfile written");

    Ok(())
}
