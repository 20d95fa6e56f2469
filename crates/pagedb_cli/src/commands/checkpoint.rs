//! Checkpoint command implementation.

use pagedb_core::{Engine, EngineSettings};
use std::path::Path;
use std::time::Duration;

/// Opens the data file, folds the log into it and closes it again.
///
/// Returns the number of pages folded by the explicit checkpoint; the
/// shutdown checkpoint on dispose folds whatever is left.
pub fn checkpoint(path: &Path, timeout: Duration) -> Result<usize, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No data file found at {}", path.display()).into());
    }
    let settings = EngineSettings::new(path.to_path_buf())
        .timeout(timeout)
        .checkpoint_on_shutdown(true);
    Ok(Engine::scoped(settings, |engine| engine.checkpoint())?)
}

/// Runs the checkpoint command.
pub fn run(path: &Path, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let folded = checkpoint(path, timeout)?;
    println!("✓ Checkpoint complete: {folded} pages folded into {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn checkpoint_empties_the_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ckpt.db");
        let engine = Engine::open(EngineSettings::new(path.clone()).checkpoint_on_shutdown(false)).unwrap();
        let txn = engine.begin().unwrap();
        txn.allocate_page().unwrap();
        txn.commit().unwrap();
        engine.dispose().unwrap();

        assert_eq!(checkpoint(&path, Duration::from_secs(1)).unwrap(), 2);
        let log = std::fs::metadata(dir.path().join("ckpt-log.db")).unwrap();
        assert_eq!(log.len(), 0);
    }
}
