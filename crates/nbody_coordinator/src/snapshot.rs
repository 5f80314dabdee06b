//! Saved simulation state.
//!
//! A snapshot is the MessagePack encoding of [`Snapshot`]. It is written on
//! the `savePlanets` control message and can seed a new run at start-up.

use std::path::Path;

use anyhow::{Context, Result};
use nbody_core::BodySet;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Everything needed to resume a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub bodies: BodySet,
    /// Steps completed when the snapshot was taken.
    pub step: u64,
    pub delta_t: f64,
}

/// Write `snapshot` to `path`, replacing any existing file.
///
/// # Errors
///
/// Returns an error if encoding or the write fails.
pub async fn save(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = nbody_net::encode(snapshot)?;
    tokio::fs::write(path, &bytes)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    info!(
        path = %path.display(),
        bodies = snapshot.bodies.count(),
        step = snapshot.step,
        "snapshot saved"
    );
    Ok(())
}

/// Read a snapshot written by [`save`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid snapshot.
pub async fn load(path: &Path) -> Result<Snapshot> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading snapshot {}", path.display()))?;
    let snapshot: Snapshot = nbody_net::decode(&bytes)
        .with_context(|| format!("decoding snapshot {}", path.display()))?;
    info!(
        path = %path.display(),
        bodies = snapshot.bodies.count(),
        step = snapshot.step,
        "snapshot loaded"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use nbody_core::scenario::{ClusterParams, random_cluster};

    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("nbody-{name}-{}.msgpack", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let path = temp_path("snapshot");
        let snapshot = Snapshot {
            bodies: random_cluster(6, &ClusterParams::default(), 21),
            step: 120,
            delta_t: 3600.0,
        };

        save(&path, &snapshot).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded, snapshot);

        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_rejects_garbage() {
        let path = temp_path("garbage");
        tokio::fs::write(&path, b"not a snapshot").await.unwrap();
        assert!(load(&path).await.is_err());
        tokio::fs::remove_file(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = load(Path::new("/nonexistent/nbody.msgpack")).await.unwrap_err();
        assert!(format!("{err:#}").contains("reading snapshot"));
    }
}
