//! Gap state persisted per station, so a restarted data manager keeps acknowledging what
//! it already received.

use std::io;
use std::path::{Path, PathBuf};

use cd11_rs_protocol::GapList;
use tracing::{debug, info, warn};

use crate::error::{DataManError, Result};

/// One JSON file per station under a state directory.
#[derive(Clone, Debug)]
pub struct GapStateStore {
    dir: PathBuf,
}

impl GapStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, station: &str) -> PathBuf {
        self.dir.join(format!("{station}.json"))
    }

    /// Stored gap list for `station`. Missing or unreadable state starts empty.
    pub async fn load(&self, station: &str) -> GapList {
        let path = self.path(station);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(station, path = %path.display(), "no stored gap state");
                return GapList::new();
            }
            Err(e) => {
                warn!(station, path = %path.display(), error = %e, "cannot read gap state, starting empty");
                return GapList::new();
            }
        };
        match serde_json::from_slice::<GapList>(&bytes) {
            Ok(gaps) => {
                info!(
                    station,
                    lowest = ?gaps.lowest(),
                    highest = ?gaps.highest(),
                    "gap state loaded"
                );
                gaps
            }
            Err(e) => {
                warn!(station, path = %path.display(), error = %e, "corrupt gap state, starting empty");
                GapList::new()
            }
        }
    }

    /// Write `gaps` for `station`, replacing the stored state in one rename.
    pub async fn persist(&self, station: &str, gaps: &GapList) -> Result<()> {
        let path = self.path(station);
        let tmp = self.dir.join(format!("{station}.json.tmp"));
        let json =
            serde_json::to_vec(gaps).map_err(|e| gap_state_error(station, io::Error::other(e)))?;
        let write = async {
            tokio::fs::create_dir_all(&self.dir).await?;
            tokio::fs::write(&tmp, &json).await?;
            tokio::fs::rename(&tmp, &path).await
        };
        write.await.map_err(|source| gap_state_error(station, source))?;
        debug!(station, path = %path.display(), "gap state persisted");
        Ok(())
    }

    /// Remove the stored state for `station`. Nothing stored is not an error.
    pub async fn clear(&self, station: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path(station)).await {
            Ok(()) => {
                info!(station, "gap state cleared");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(gap_state_error(station, e)),
        }
    }
}

fn gap_state_error(station: &str, source: io::Error) -> DataManError {
    DataManError::GapState {
        station: station.to_owned(),
        source,
    }
}
