//! Named save-slots. The slot is always an explicit parameter on the
//! engine; `SlotView` just binds one name for callers juggling several.

use std::sync::Arc;

use relic_region::RegionHandle;
use relic_task::{Pace, TaskFuture};

use crate::RegionFileError;
use crate::engine::{ApplyMode, RegionStore};

/// A snapshot slot name, sanitized for use as a directory component.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Slot(String);

impl Slot {
    pub const DEFAULT_NAME: &'static str = "default";

    /// Empty or path-ish names fall back to the default slot.
    pub fn named(name: impl Into<String>) -> Self {
        let name: String = name.into();
        let cleaned: String = name
            .chars()
            .map(|c| match c {
                '/' | '\\' | '.' | ':' => '_',
                c => c,
            })
            .collect();
        if cleaned.trim().is_empty() {
            Self::default_slot()
        } else {
            Slot(cleaned)
        }
    }

    pub fn default_slot() -> Self {
        Slot(Self::DEFAULT_NAME.to_string())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::default_slot()
    }
}

/// A store bound to one slot: the decorator callers reach for when a region
/// keeps several independent save states.
pub struct SlotView<'a> {
    store: &'a RegionStore,
    slot: Slot,
}

impl<'a> SlotView<'a> {
    pub fn new(store: &'a RegionStore, slot: Slot) -> Self {
        Self { store, slot }
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn save(&self, region: &Arc<RegionHandle>) -> TaskFuture {
        self.store.save_data(region, &self.slot)
    }

    pub fn can_restore(&self, region: &Arc<RegionHandle>) -> bool {
        self.store.can_restore(region, &self.slot)
    }

    pub fn restore(&self, region: &Arc<RegionHandle>, pace: Pace, mode: ApplyMode) -> TaskFuture {
        self.store.restore_data(region, &self.slot, pace, mode)
    }

    pub fn delete(&self, region: &Arc<RegionHandle>) -> Result<usize, RegionFileError> {
        self.store.delete_data(region, &self.slot)
    }
}
