use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::info;

use crate::compactor;
use crate::engine::Engine;
use crate::limits::*;
use crate::notify::NotifyHub;

/// One engine per shelter network. A network is the pgwire database name;
/// every agency of a continuum of care connects to the same one, so the
/// one-bed-per-case rule holds across all of them.
pub struct NetworkManager {
    engines: DashMap<String, Arc<Engine>>,
    data_dir: PathBuf,
    compact_threshold: u64,
}

/// Keep only characters that are safe in a file name.
fn wal_file_stem(network: &str) -> io::Result<String> {
    if network.len() > MAX_NETWORK_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "network name too long",
        ));
    }
    let safe: String = network
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if safe.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "empty network name",
        ));
    }
    Ok(safe)
}

impl NetworkManager {
    pub fn new(data_dir: PathBuf, compact_threshold: u64) -> Self {
        Self {
            engines: DashMap::new(),
            data_dir,
            compact_threshold,
        }
    }

    /// Get the network's engine, replaying its WAL on first use.
    pub fn get_or_open(&self, network: &str) -> io::Result<Arc<Engine>> {
        let stem = wal_file_stem(network)?;
        if let Some(engine) = self.engines.get(&stem) {
            return Ok(engine.value().clone());
        }
        if self.engines.len() >= MAX_NETWORKS {
            return Err(io::Error::other("too many networks"));
        }

        // Holding the entry keeps two first connections from replaying twice.
        let engine = match self.engines.entry(stem.clone()) {
            Entry::Occupied(e) => return Ok(e.get().clone()),
            Entry::Vacant(slot) => {
                let wal_path = self.data_dir.join(format!("{stem}.wal"));
                let engine = Arc::new(Engine::new(wal_path, Arc::new(NotifyHub::new()))?);
                tokio::spawn(compactor::run_compactor(engine.clone(), self.compact_threshold));
                slot.insert(engine.clone());
                engine
            }
        };
        metrics::gauge!(crate::observability::NETWORKS_ACTIVE).set(self.engines.len() as f64);
        info!(network = %stem, "network opened");
        Ok(engine)
    }
}
