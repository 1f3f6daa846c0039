use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use common::output;
use common::planner::ReducerRanges;
use tokio::fs;
use tracing::{info, warn};

/// Concatenates the owners' temp files into the final output, in
/// lower-bound order.
///
/// Each owner's keys are sorted before they are written, since batches from
/// different mappers may interleave inside a temp file. Keys outside the
/// owner's range are dropped and missing temp files are skipped. Returns the
/// number of keys written.
pub async fn combine_outputs(output_dir: &Path, ranges: &ReducerRanges) -> Result<usize> {
    let mut combined = String::new();
    let mut total = 0;

    for range in ranges.iter() {
        let path = output::temp_path(output_dir, &range.address);
        let contents = match fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("[COMBINE] No output for {}, skipping", range.address);
                continue;
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };

        let decoded = output::decode_lines(&contents, &path.display().to_string());
        let (mut keys, strays): (Vec<i64>, Vec<i64>) =
            decoded.into_iter().partition(|key| range.contains(*key));
        if !strays.is_empty() {
            warn!(
                "[COMBINE] Dropping {} keys in {} outside [{}, {})",
                strays.len(),
                path.display(),
                range.lower,
                range.upper
            );
        }
        keys.sort_unstable();

        total += keys.len();
        combined.push_str(&output::encode_lines(&keys));
    }

    fs::create_dir_all(output_dir)
        .await
        .with_context(|| format!("creating {}", output_dir.display()))?;
    let final_path = output::final_path(output_dir);
    fs::write(&final_path, combined)
        .await
        .with_context(|| format!("writing {}", final_path.display()))?;

    info!("[COMBINE] Wrote {total} keys to {}", final_path.display());
    Ok(total)
}
