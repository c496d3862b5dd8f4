//! Purpose: Allocate and decode virtual object identifiers.
//! Exports: `VirtualObjectIdManager`, `IndexGenerator`, `CounterIndexGenerator`, `LinecardIndexTable`.
//! Role: Gives objects stable identity independent of backend handles.
//! Invariants: Decoding an allocated id yields the exact type and linecard used at allocation.
//! Invariants: A hardware descriptor always maps to the same linecard id (warm restart).
//! Invariants: Layout is object index 0..40, linecard index 40..48, type 48..56, context 56..64.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, warn};

use crate::core::types::{ObjectId, ObjectType};

const OBJECT_INDEX_BITS: u32 = 40;
const LINECARD_INDEX_BITS: u32 = 8;
const OBJECT_TYPE_BITS: u32 = 8;

const LINECARD_INDEX_SHIFT: u32 = OBJECT_INDEX_BITS;
const OBJECT_TYPE_SHIFT: u32 = LINECARD_INDEX_SHIFT + LINECARD_INDEX_BITS;
const GLOBAL_CONTEXT_SHIFT: u32 = OBJECT_TYPE_SHIFT + OBJECT_TYPE_BITS;

pub const OBJECT_INDEX_MAX: u64 = (1 << OBJECT_INDEX_BITS) - 1;

/// Source of object indices for non-linecard ids.
pub trait IndexGenerator: Send + Sync {
    /// Next unused index, or `None` once exhausted.
    fn increment(&self) -> Option<u64>;
}

/// Process-local monotonically increasing index source.
#[derive(Debug, Default)]
pub struct CounterIndexGenerator {
    next: AtomicU64,
}

impl CounterIndexGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after `last`, e.g. when the last issued index was persisted elsewhere.
    pub fn starting_after(last: u64) -> Self {
        Self {
            next: AtomicU64::new(last),
        }
    }
}

impl IndexGenerator for CounterIndexGenerator {
    fn increment(&self) -> Option<u64> {
        let previous = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                (current < OBJECT_INDEX_MAX).then_some(current + 1)
            })
            .ok()?;
        Some(previous + 1)
    }
}

/// Maps hardware descriptors onto linecard indices.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct LinecardIndexTable {
    by_hardware_info: HashMap<String, u8>,
}

impl LinecardIndexTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, hardware_info: impl Into<String>, index: u8) {
        self.by_hardware_info.insert(hardware_info.into(), index);
    }

    pub fn index_of(&self, hardware_info: &str) -> Option<u8> {
        self.by_hardware_info.get(hardware_info).copied()
    }
}

pub struct VirtualObjectIdManager {
    global_context: u8,
    linecards: LinecardIndexTable,
    generator: std::sync::Arc<dyn IndexGenerator>,
}

impl VirtualObjectIdManager {
    pub fn new(
        global_context: u8,
        linecards: LinecardIndexTable,
        generator: std::sync::Arc<dyn IndexGenerator>,
    ) -> Self {
        Self {
            global_context,
            linecards,
            generator,
        }
    }

    /// Linecard id for a hardware descriptor. Same descriptor, same id.
    pub fn allocate_linecard_id(&self, hardware_info: &str) -> Option<ObjectId> {
        let Some(index) = self.linecards.index_of(hardware_info) else {
            error!(hardware_info, "no linecard index configured for hardware info");
            return None;
        };
        Some(encode(
            self.global_context,
            index,
            ObjectType::Linecard,
            u64::from(index),
        ))
    }

    pub fn allocate_object_id(
        &self,
        object_type: ObjectType,
        linecard_id: ObjectId,
    ) -> Option<ObjectId> {
        if object_type.is_root() {
            error!("linecard ids must be allocated from hardware info");
            return None;
        }
        if self.object_type_query(linecard_id) != Some(ObjectType::Linecard) {
            error!(%linecard_id, %object_type, "object id scope is not a linecard");
            return None;
        }
        let linecard_index = linecard_index_of(linecard_id);
        let Some(object_index) = self.generator.increment() else {
            warn!(%object_type, "object index space exhausted");
            return None;
        };
        if object_index > OBJECT_INDEX_MAX {
            warn!(object_index, "object index out of range");
            return None;
        }
        Some(encode(
            self.global_context,
            linecard_index,
            object_type,
            object_index,
        ))
    }

    pub fn object_type_query(&self, object_id: ObjectId) -> Option<ObjectType> {
        if object_id.is_null() {
            return None;
        }
        let raw = (object_id.raw() >> OBJECT_TYPE_SHIFT) & mask(OBJECT_TYPE_BITS);
        let object_type = ObjectType::from_u8(raw as u8);
        if object_type.is_none() {
            warn!(%object_id, raw, "object id carries an unknown object type");
        }
        object_type
    }

    pub fn linecard_id_query(&self, object_id: ObjectId) -> Option<ObjectId> {
        self.object_type_query(object_id)?;
        let index = linecard_index_of(object_id);
        Some(encode(
            global_context_of(object_id),
            index,
            ObjectType::Linecard,
            u64::from(index),
        ))
    }

    pub fn linecard_index_query(&self, object_id: ObjectId) -> Option<u8> {
        self.object_type_query(object_id)?;
        Some(linecard_index_of(object_id))
    }

    pub fn global_context_query(&self, object_id: ObjectId) -> Option<u8> {
        self.object_type_query(object_id)?;
        Some(global_context_of(object_id))
    }
}

fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

fn encode(global_context: u8, linecard_index: u8, object_type: ObjectType, index: u64) -> ObjectId {
    ObjectId::from_raw(
        (u64::from(global_context) << GLOBAL_CONTEXT_SHIFT)
            | ((object_type as u64) << OBJECT_TYPE_SHIFT)
            | (u64::from(linecard_index) << LINECARD_INDEX_SHIFT)
            | (index & OBJECT_INDEX_MAX),
    )
}

fn linecard_index_of(object_id: ObjectId) -> u8 {
    ((object_id.raw() >> LINECARD_INDEX_SHIFT) & mask(LINECARD_INDEX_BITS)) as u8
}

fn global_context_of(object_id: ObjectId) -> u8 {
    (object_id.raw() >> GLOBAL_CONTEXT_SHIFT) as u8
}
