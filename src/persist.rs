//! File import/export of the sequence table and device configuration.
//!
//! Exports are pretty-printed JSON named with the local date, e.g.
//! `spi_sequences_2024-05-01.json`. Neither direction talks to the backend.
//!
//! A *table file* is a sequence export that a one-shot caller (the CLI) treats
//! as the authoritative table: it is loaded, edited through the store, and
//! written back. The backend has no read endpoint for its table, so editing
//! without one would replace the backend's table with a fresh one.

use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::device::{ConfigModel, DeviceConfig};
use crate::error::Result;
use crate::sequence::{SequenceEntry, SequenceId, SequenceStore};

const SEQUENCES_STEM: &str = "spi_sequences";
const CONFIG_STEM: &str = "spi_config";

fn dated_filename(stem: &str, date: NaiveDate) -> String {
    format!("{stem}_{}.json", date.format("%Y-%m-%d"))
}

/// File name for a sequence export made on `date`.
#[must_use]
pub fn sequences_filename(date: NaiveDate) -> String {
    dated_filename(SEQUENCES_STEM, date)
}

/// File name for a config export made on `date`.
#[must_use]
pub fn config_filename(date: NaiveDate) -> String {
    dated_filename(CONFIG_STEM, date)
}

/// Write the sequence table into `directory`, returning the file path.
pub async fn export_sequences(store: &SequenceStore, directory: &Path) -> Result<PathBuf> {
    let path = directory.join(sequences_filename(Local::now().date_naive()));
    let text = store.export_to().await?;
    tokio::fs::write(&path, text).await?;
    tracing::info!(path = %path.display(), "Exported sequences");
    Ok(path)
}

/// Replace the local sequence table with the contents of `path`.
pub async fn import_sequences(store: &SequenceStore, path: &Path) -> Result<usize> {
    let text = tokio::fs::read_to_string(path).await?;
    store.import_from(&text).await
}

/// Write the local sequence table to `path`.
pub async fn write_sequences(store: &SequenceStore, path: &Path) -> Result<()> {
    let text = store.export_to().await?;
    tokio::fs::write(path, text).await?;
    tracing::debug!(path = %path.display(), "Wrote sequence table file");
    Ok(())
}

/// Add an entry to the table kept in `path` and write the file back.
///
/// A missing file starts a new, empty table. The backend receives the file's
/// table plus the new entry.
pub async fn add_to_table_file(
    store: &SequenceStore,
    path: &Path,
    received: &str,
    response: &str,
) -> Result<SequenceEntry> {
    if tokio::fs::try_exists(path).await? {
        import_sequences(store, path).await?;
    }
    let entry = store.add(received, response).await?;
    write_sequences(store, path).await?;
    Ok(entry)
}

/// Remove an entry from the table kept in `path` and write the file back.
///
/// The file must exist; nothing is sent otherwise.
pub async fn remove_from_table_file(
    store: &SequenceStore,
    path: &Path,
    id: &SequenceId,
) -> Result<()> {
    import_sequences(store, path).await?;
    store.remove(id).await?;
    write_sequences(store, path).await
}

/// Write the current device configuration into `directory`, returning the file path.
pub async fn export_config(model: &ConfigModel, directory: &Path) -> Result<PathBuf> {
    let path = directory.join(config_filename(Local::now().date_naive()));
    let text = model.export_json().await?;
    tokio::fs::write(&path, text).await?;
    tracing::info!(path = %path.display(), "Exported device configuration");
    Ok(path)
}

/// Replace the config form with the contents of `path`.
pub async fn import_config(model: &ConfigModel, path: &Path) -> Result<DeviceConfig> {
    let text = tokio::fs::read_to_string(path).await?;
    model.import_json(&text).await
}
