use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use common::error::ApiError;

use crate::core::meta::{BlockLocationRecord, KvDb, ScanPage, block_key_for, block_scan_prefix};
use crate::core::namespace::Namespace;
use crate::core::placement::{PlacementDecision, Selector};
use crate::core::registry::NodeRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnregisterOutcome {
    NotFound,
    HolderNotPresent,
    HolderRemoved,
    RecordDeleted,
}

impl fmt::Display for UnregisterOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            UnregisterOutcome::NotFound => "Block not found",
            UnregisterOutcome::HolderNotPresent => "Node does not hold this block",
            UnregisterOutcome::HolderRemoved => "Node removed from block holders",
            UnregisterOutcome::RecordDeleted => "Last holder removed, block mapping deleted",
        };
        f.write_str(msg)
    }
}

/// Which nodes hold which block, persisted in RocksDB under `block:{hash}`.
/// Read-modify-write sequences are serialized by `write_lock`.
#[derive(Clone)]
pub struct BlockDirectory {
    db: KvDb,
    registry: NodeRegistry,
    selector: Arc<Selector>,
    replication_factor: usize,
    write_lock: Arc<Mutex<()>>,
}

impl BlockDirectory {
    pub fn new(
        db: KvDb,
        registry: NodeRegistry,
        selector: Arc<Selector>,
        replication_factor: usize,
    ) -> Self {
        Self {
            db,
            registry,
            selector,
            replication_factor,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, ApiError> {
        self.write_lock
            .lock()
            .map_err(|_| ApiError::LockPoisoned("block directory"))
    }

    pub fn register_holder(&self, block_hash: &str, node_id: &str) -> Result<(), ApiError> {
        require("hash", block_hash)?;
        require("node", node_id)?;

        let _guard = self.lock()?;
        let key = block_key_for(block_hash);
        let mut record = self
            .db
            .get::<BlockLocationRecord>(&key)?
            .unwrap_or_else(|| BlockLocationRecord::new(block_hash));

        if record.holder_ids.insert(node_id.to_string()) {
            self.db.put(&key, &record)?;
            info!(block_hash, node_id, "registered block holder");
        } else {
            debug!(block_hash, node_id, "block holder already registered");
        }
        Ok(())
    }

    pub fn get_holders(&self, block_hash: &str) -> Result<Option<BTreeSet<String>>, ApiError> {
        let record = self
            .db
            .get::<BlockLocationRecord>(&block_key_for(block_hash))?;
        Ok(record.map(|r| r.holder_ids))
    }

    pub fn unregister_holder(
        &self,
        block_hash: &str,
        node_id: &str,
    ) -> Result<UnregisterOutcome, ApiError> {
        require("hash", block_hash)?;
        require("node", node_id)?;

        let _guard = self.lock()?;
        let key = block_key_for(block_hash);
        let Some(mut record) = self.db.get::<BlockLocationRecord>(&key)? else {
            return Ok(UnregisterOutcome::NotFound);
        };

        if !record.holder_ids.remove(node_id) {
            return Ok(UnregisterOutcome::HolderNotPresent);
        }

        if record.holder_ids.is_empty() {
            self.db.delete(&key)?;
            info!(block_hash, node_id, "last holder removed, deleted block record");
            Ok(UnregisterOutcome::RecordDeleted)
        } else {
            self.db.put(&key, &record)?;
            info!(block_hash, node_id, "removed block holder");
            Ok(UnregisterOutcome::HolderRemoved)
        }
    }

    /// Returns whether a record existed.
    pub fn unregister_all(&self, block_hash: &str) -> Result<bool, ApiError> {
        require("hash", block_hash)?;

        let _guard = self.lock()?;
        let key = block_key_for(block_hash);
        if !self.db.exists(&key)? {
            return Ok(false);
        }
        self.db.delete(&key)?;
        info!(block_hash, "deleted block record");
        Ok(true)
    }

    pub fn clear_all(&self) -> Result<usize, ApiError> {
        let _guard = self.lock()?;
        let removed = self.db.delete_prefix(&block_scan_prefix())?;
        info!(removed, "cleared block location directory");
        Ok(removed)
    }

    pub fn request_placement(
        &self,
        block_hash: &str,
        requesting: Option<&str>,
    ) -> Result<PlacementDecision, ApiError> {
        let holders = if block_hash.is_empty() {
            None
        } else {
            Some(self.get_holders(block_hash)?.unwrap_or_default())
        };
        let membership = self.registry.membership()?;
        Ok(self.selector.select(
            holders.as_ref(),
            self.replication_factor,
            requesting,
            &membership,
        ))
    }

    /// One page of records, resuming strictly after `after`.
    pub fn scan_page(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> anyhow::Result<ScanPage<BlockLocationRecord>> {
        self.db.scan_prefix(&block_scan_prefix(), after, limit)
    }

    /// Holder sets for every block of a file, in the namespace's block order.
    /// Blocks with no record map to an empty set.
    pub fn holders_for_file(
        &self,
        namespace: &dyn Namespace,
        file_hash: &str,
    ) -> Result<Vec<(String, BTreeSet<String>)>, ApiError> {
        require("file hash", file_hash)?;

        namespace
            .block_hashes_for_file(file_hash)?
            .into_iter()
            .map(|hash| {
                let holders = self.get_holders(&hash)?.unwrap_or_default();
                Ok::<_, ApiError>((hash, holders))
            })
            .collect()
    }
}

fn require(what: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", what)));
    }
    Ok(())
}
