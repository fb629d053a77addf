use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Source and destination of the static-asset staging step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticAssets {
    pub source: PathBuf,
    pub root: PathBuf,
}

/// Copy every file under `assets.source` into `assets.root`, keeping the
/// relative layout. Existing files are overwritten, so repeated runs converge
/// on the same tree. Returns the number of files copied.
pub async fn stage(assets: &StaticAssets) -> Result<usize> {
    let meta = tokio::fs::metadata(&assets.source)
        .await
        .with_context(|| format!("static source {} is not readable", assets.source.display()))?;
    if !meta.is_dir() {
        return Err(anyhow!(
            "static source {} is not a directory",
            assets.source.display()
        ));
    }

    let mut copied = 0usize;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(assets.source.clone(), assets.root.clone())];
    while let Some((from_dir, to_dir)) = pending.pop() {
        tokio::fs::create_dir_all(&to_dir)
            .await
            .with_context(|| format!("failed to create {}", to_dir.display()))?;
        let mut entries = tokio::fs::read_dir(&from_dir)
            .await
            .with_context(|| format!("failed to list {}", from_dir.display()))?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let target = to_dir.join(entry.file_name());
            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else if file_type.is_file() {
                copy_file(&entry.path(), &target).await?;
                copied += 1;
            } else {
                debug!(path = %entry.path().display(), "skipping non-regular file");
            }
        }
    }

    info!(
        copied,
        source = %assets.source.display(),
        root = %assets.root.display(),
        "static assets staged"
    );
    Ok(copied)
}

async fn copy_file(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("failed to copy {} to {}", from.display(), to.display()))?;
    Ok(())
}
