//! Saving downloaded models to disk

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::{ForgeError, Result};
use crate::utils::sanitize_file_stem;

pub const MODEL_EXTENSION: &str = "glb";

/// File name a model generated from `prompt` is saved under
pub fn export_file_name(prompt: &str) -> String {
    format!("{}.{}", sanitize_file_stem(prompt), MODEL_EXTENSION)
}

/// Write `bytes` to `dir/<sanitised prompt>.glb`.
///
/// Refuses to replace an existing file unless `force` is set. Creates `dir`
/// when missing and returns the written path.
pub async fn export_model(dir: &Path, prompt: &str, bytes: &[u8], force: bool) -> Result<PathBuf> {
    if !dir.exists() {
        fs::create_dir_all(dir).await.map_err(|e| {
            ForgeError::io_from_error(format!("Create directory {}", dir.display()), e)
        })?;
    } else if !dir.is_dir() {
        return Err(ForgeError::export(format!(
            "Not a directory: {}",
            dir.display()
        )));
    }

    let path = dir.join(export_file_name(prompt));
    if path.exists() && !force {
        return Err(ForgeError::file_exists(path.display().to_string()));
    }

    fs::write(&path, bytes)
        .await
        .map_err(|e| ForgeError::io_from_error(format!("Write model {}", path.display()), e))?;

    info!(path = %path.display(), size = bytes.len(), "model exported");
    Ok(path)
}
