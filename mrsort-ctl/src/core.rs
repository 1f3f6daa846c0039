use std::fmt::Write;
use std::path::Path;

use anyhow::Result;
use common::checkpoint::{ChunkState, CheckpointStore};
use common::output;

// Tasks

pub async fn status(store: &CheckpointStore) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "[Status]");
    let _ = writeln!(out, "stage: {}", store.stage().await);
    let _ = writeln!(out, "completed: {}", store.completed().await);

    if let Some(status) = store.load_status().await {
        let pending: Vec<String> = status
            .iter()
            .filter(|(_, state)| **state == ChunkState::Pending)
            .map(|(id, _)| id.to_string())
            .collect();
        let _ = writeln!(
            out,
            "chunks: {}/{} done",
            status.len() - pending.len(),
            status.len()
        );
        if !pending.is_empty() {
            let _ = writeln!(out, "pending: {}", pending.join(", "));
        }
    }

    if let Some(ranges) = store.load_ranges().await {
        let _ = writeln!(out);
        let _ = writeln!(out, "[Ranges]");
        for range in ranges.iter() {
            let _ = writeln!(out, "{} [{}, {})", range.address, range.lower, range.upper);
        }
    }

    out
}

pub async fn workers(store: &CheckpointStore) -> String {
    let mut out = String::from("[Workers]\n");
    match store.load_workers().await {
        Some(workers) if !workers.is_empty() => {
            for worker in workers {
                let _ = writeln!(out, "{:<8} {}", worker.role.to_string(), worker.address);
            }
        }
        _ => out.push_str("no saved roster\n"),
    }
    out
}

pub async fn reset(store: &CheckpointStore, output_dir: Option<&Path>) -> Result<String> {
    store.reset().await?;
    store.clear_completed().await?;
    let mut out = format!("Cleared checkpoint in {}\n", store.dir().display());

    if let Some(dir) = output_dir {
        let removed = output::purge(dir).await?;
        let _ = writeln!(out, "Removed {removed} output files from {}", dir.display());
    }
    Ok(out)
}
