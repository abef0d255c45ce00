//! Flow slot allocation and scanning under the output root.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument};

use extractflow_shared::{Checkpoint, ExtractflowError, Result};

use crate::store::ArtifactStore;

const SLOT_PREFIX: &str = "flow";

/// One `flow{N}` directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSlot {
    pub id: u32,
    pub dir: PathBuf,
}

impl FlowSlot {
    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.dir)
    }
}

/// A slot found by [`FlowAllocator::scan`], with its checkpoint if readable.
#[derive(Debug, Clone)]
pub struct SlotEntry {
    pub slot: FlowSlot,
    pub checkpoint: Option<Checkpoint>,
}

/// Hands out monotonically numbered slots under the output root.
#[derive(Debug, Clone)]
pub struct FlowAllocator {
    root: PathBuf,
}

impl FlowAllocator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `max(existing slot ids) + 1`, or `1` when there are none.
    pub fn next_slot_id(&self) -> u32 {
        self.slot_ids().into_iter().max().map_or(1, |max| max + 1)
    }

    /// Directory of slot `id`, created on first access.
    pub fn slot_dir(&self, id: u32) -> Result<PathBuf> {
        let dir = self.root.join(format!("{SLOT_PREFIX}{id}"));
        std::fs::create_dir_all(&dir).map_err(|e| ExtractflowError::io(&dir, e))?;
        Ok(dir)
    }

    pub fn slot(&self, id: u32) -> Result<FlowSlot> {
        Ok(FlowSlot {
            id,
            dir: self.slot_dir(id)?,
        })
    }

    /// Create the next slot.
    pub fn allocate(&self) -> Result<FlowSlot> {
        let slot = self.slot(self.next_slot_id())?;
        debug!(slot = slot.id, "allocated flow slot");
        Ok(slot)
    }

    /// Every existing slot with its checkpoint, ascending by id.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn scan(&self) -> Vec<SlotEntry> {
        let mut ids = self.slot_ids();
        ids.sort_unstable();

        ids.into_iter()
            .map(|id| {
                let slot = FlowSlot {
                    id,
                    dir: self.root.join(format!("{SLOT_PREFIX}{id}")),
                };
                let checkpoint = slot.store().load_checkpoint();
                SlotEntry { slot, checkpoint }
            })
            .collect()
    }

    /// The lowest-numbered slot whose checkpoint satisfies `predicate`.
    pub fn find_slot_with_checkpoint<F>(&self, predicate: F) -> Option<SlotEntry>
    where
        F: Fn(&Checkpoint) -> bool,
    {
        self.scan()
            .into_iter()
            .find(|entry| entry.checkpoint.as_ref().is_some_and(&predicate))
    }

    fn slot_ids(&self) -> Vec<u32> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };

        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .filter_map(|e| parse_slot_id(&e.file_name().to_string_lossy()))
            .collect()
    }
}

fn parse_slot_id(name: &str) -> Option<u32> {
    let digits = name.strip_prefix(SLOT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
