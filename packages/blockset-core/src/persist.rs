//! Whole-file atomic replacement
//!
//! Data is written to a temporary file in the destination directory, synced,
//! then renamed over the destination. Readers observe either the previous
//! content or the new content, never a partial file.

use crate::errors::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically replace `path` with `bytes`.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    write_with(path, |w| {
        w.write_all(bytes)?;
        Ok(())
    })
}

/// Atomically replace `path` with the bincode encoding of `value`.
pub fn atomic_write_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    write_with(path, |w| {
        bincode::serialize_into(w, value)?;
        Ok(())
    })
}

/// Read a bincode file written by [`atomic_write_bincode`].
pub fn read_bincode<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(bincode::deserialize_from(reader)?)
}

fn write_with<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&mut File>) -> Result<()>,
{
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        fill(&mut writer)?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
