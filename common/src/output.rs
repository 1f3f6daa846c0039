//! Layout of the shared output directory.
//!
//! Reducers append to `temp_<owner>.txt`, one decimal integer per line, where
//! `<owner>` is the sanitized address of the reducer owning the key range.
//! The master writes `final_output.txt` once every chunk has been mapped.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::sanitize_addr;

pub const FINAL_OUTPUT: &str = "final_output.txt";

pub fn temp_file_name(owner: &str) -> String {
    format!("temp_{}.txt", sanitize_addr(owner))
}

pub fn temp_path(output_dir: &Path, owner: &str) -> PathBuf {
    output_dir.join(temp_file_name(owner))
}

pub fn final_path(output_dir: &Path) -> PathBuf {
    output_dir.join(FINAL_OUTPUT)
}

/// Renders keys as the line-oriented text stored in output files.
pub fn encode_lines(keys: &[i64]) -> String {
    let mut out = String::with_capacity(keys.len() * 4);
    for key in keys {
        out.push_str(&key.to_string());
        out.push('\n');
    }
    out
}

/// Parses an output file's contents. Blank lines are skipped; lines that are
/// not integers are logged and dropped.
pub fn decode_lines(contents: &str, source: &str) -> Vec<i64> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| match line.parse::<i64>() {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Skipping malformed line `{line}` in {source}: {e}");
                None
            }
        })
        .collect()
}

/// Appends `keys` to the owner's temp file as a single write.
pub async fn append_records(output_dir: &Path, owner: &str, keys: &[i64]) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let path = temp_path(output_dir, owner);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
        .with_context(|| format!("opening {}", path.display()))?;
    file.write_all(encode_lines(keys).as_bytes())
        .await
        .with_context(|| format!("appending to {}", path.display()))?;
    file.flush().await?;
    Ok(path)
}

/// Removes the final output and every reducer temp file.
pub async fn purge(output_dir: &Path) -> Result<usize> {
    let mut removed = 0;

    let final_output = final_path(output_dir);
    match fs::remove_file(&final_output).await {
        Ok(()) => removed += 1,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {e}", final_output.display()),
    }

    let pattern = output_dir.join("temp_*.txt");
    let pattern = pattern.to_string_lossy();
    for entry in glob::glob(&pattern).context("building temp file pattern")? {
        match entry {
            Ok(path) => match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Removed {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {e}", path.display()),
            },
            Err(e) => warn!("Unreadable temp file entry: {e}"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_file_is_named_by_owner() {
        assert_eq!(temp_file_name("reducer1:9002"), "temp_reducer1_9002.txt");
    }

    #[test]
    fn lines_survive_encoding() {
        let text = encode_lines(&[3, -1, 42]);
        assert_eq!(text, "3\n-1\n42\n");
        assert_eq!(decode_lines(&text, "test"), vec![3, -1, 42]);
        assert_eq!(decode_lines("\n7\n\nnope\n 8 \n", "test"), vec![7, 8]);
    }

    #[tokio::test]
    async fn appends_accumulate_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        append_records(dir.path(), "r:1", &[1, 2]).await.unwrap();
        append_records(dir.path(), "r:1", &[3]).await.unwrap();
        append_records(dir.path(), "r:2", &[9]).await.unwrap();

        let first = std::fs::read_to_string(temp_path(dir.path(), "r:1")).unwrap();
        assert_eq!(first, "1\n2\n3\n");
        let second = std::fs::read_to_string(temp_path(dir.path(), "r:2")).unwrap();
        assert_eq!(second, "9\n");
    }

    #[tokio::test]
    async fn purge_removes_temp_and_final_files_only() {
        let dir = tempfile::tempdir().unwrap();
        append_records(dir.path(), "r:1", &[1]).await.unwrap();
        append_records(dir.path(), "r:2", &[2]).await.unwrap();
        std::fs::write(final_path(dir.path()), "1\n2\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "keep").unwrap();

        assert_eq!(purge(dir.path()).await.unwrap(), 3);
        assert!(!final_path(dir.path()).exists());
        assert!(!temp_path(dir.path(), "r:1").exists());
        assert!(dir.path().join("notes.txt").exists());

        // Nothing left to remove.
        assert_eq!(purge(dir.path()).await.unwrap(), 0);
    }
}
