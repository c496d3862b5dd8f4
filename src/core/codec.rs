//! Purpose: Serialize attributes and counter ids into field/value pairs and back.
//! Exports: `FieldValue`, attr list (de)serialization, `clear_oid_values`, `transfer_attributes`,
//!          `StatMetadata`, `StatCatalog`, `serialize_counter_ids`, `parse_counter`.
//! Role: Codec boundary between the typed facade and the string-keyed command channel.
//! Invariants: Field is the decimal attribute id; value is tagged JSON of `AttrValue`.
//! Invariants: Count-only transfers never copy list contents.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::error::{Error, ErrorKind};
use crate::core::types::{
    AttrValue, Attribute, ObjectId, ObjectType, StatId, StatValue, StatValueKind,
};

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub field: String,
    pub value: String,
}

impl FieldValue {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Placeholder written when an object is created without attributes.
    pub fn null_sentinel() -> Self {
        Self::new("NULL", "NULL")
    }

    pub fn is_null_sentinel(&self) -> bool {
        self.field == "NULL" && self.value == "NULL"
    }
}

pub fn serialize_attribute(attr: &Attribute) -> Result<FieldValue, Error> {
    let value = serde_json::to_string(&attr.value).map_err(|err| {
        Error::new(ErrorKind::InvalidParameter)
            .with_message(format!("failed to encode attribute {}", attr.id))
            .with_source(err)
    })?;
    Ok(FieldValue::new(attr.id.to_string(), value))
}

pub fn serialize_attr_list(attrs: &[Attribute]) -> Result<Vec<FieldValue>, Error> {
    attrs.iter().map(serialize_attribute).collect()
}

pub fn deserialize_attribute(entry: &FieldValue) -> Result<Attribute, Error> {
    let id = entry.field.parse::<u32>().map_err(|err| {
        Error::new(ErrorKind::ProtocolDesync)
            .with_message(format!("attribute field is not an id: {}", entry.field))
            .with_source(err)
    })?;
    let value: AttrValue = serde_json::from_str(&entry.value).map_err(|err| {
        Error::new(ErrorKind::ProtocolDesync)
            .with_message(format!("attribute {id} has an undecodable value"))
            .with_source(err)
    })?;
    Ok(Attribute { id, value })
}

/// Decodes reply fields, skipping the create sentinel.
pub fn deserialize_attr_list(entries: &[FieldValue]) -> Result<Vec<Attribute>, Error> {
    entries
        .iter()
        .filter(|entry| !entry.is_null_sentinel())
        .map(deserialize_attribute)
        .collect()
}

/// Nulls every object id the caller buffer may still hold from an earlier call.
/// List capacities are kept since the backend sizes its reply from them.
pub fn clear_oid_values(attrs: &mut [Attribute]) {
    for attr in attrs {
        match &mut attr.value {
            AttrValue::Oid(id) => *id = ObjectId::NULL,
            AttrValue::OidList(list) => list.iter_mut().for_each(|id| *id = ObjectId::NULL),
            AttrValue::U32List(list) => list.iter_mut().for_each(|item| *item = 0),
            _ => {}
        }
    }
}

/// Copies decoded reply values into the caller buffer.
///
/// With `count_only` set, list attributes are resized to the true element
/// count and nothing else is copied, so the caller can retry with that buffer.
pub fn transfer_attributes(
    object_type: ObjectType,
    src: &[Attribute],
    dst: &mut [Attribute],
    count_only: bool,
) -> Result<(), Error> {
    if src.len() != dst.len() {
        return Err(Error::new(ErrorKind::ProtocolDesync).with_message(format!(
            "get reply for {object_type} has {} attributes, requested {}",
            src.len(),
            dst.len()
        )));
    }

    if let Some((src, dst)) = src.iter().zip(dst.iter()).find(|(src, dst)| src.id != dst.id) {
        return Err(Error::new(ErrorKind::ProtocolDesync).with_message(format!(
            "get reply attribute id {} does not match requested {}",
            src.id, dst.id
        )));
    }

    // A list longer than its buffer turns the whole transfer into a size report.
    let overflow = src.iter().zip(dst.iter()).find_map(|(src, dst)| {
        match (src.value.list_len(), dst.value.list_len()) {
            (Some(needed), Some(capacity)) if needed > capacity => {
                Some((src.id, needed, capacity))
            }
            _ => None,
        }
    });
    let count_only = count_only || overflow.is_some();

    for (src, dst) in src.iter().zip(dst.iter_mut()) {
        transfer_value(src, dst, count_only)?;
    }
    match overflow {
        Some((id, needed, capacity)) => Err(Error::new(ErrorKind::BufferOverflow)
            .with_message(format!(
                "attribute {id} needs {needed} elements, buffer holds {capacity}"
            ))),
        None => Ok(()),
    }
}

fn transfer_value(src: &Attribute, dst: &mut Attribute, count_only: bool) -> Result<(), Error> {
    let id = src.id;
    let src_type = src.value.type_name();
    let dst_type = dst.value.type_name();
    match (&src.value, &mut dst.value) {
        (AttrValue::OidList(from), AttrValue::OidList(to)) => {
            transfer_list(from, to, ObjectId::NULL, count_only);
            Ok(())
        }
        (AttrValue::U32List(from), AttrValue::U32List(to)) => {
            transfer_list(from, to, 0, count_only);
            Ok(())
        }
        (from, to) if from.is_list() || to.is_list() => Err(type_mismatch(id, src_type, dst_type)),
        _ if count_only => Ok(()),
        (AttrValue::Pointer(_), AttrValue::Pointer(_)) => Ok(()),
        (from, to) if std::mem::discriminant(from) == std::mem::discriminant(&*to) => {
            *to = from.clone();
            Ok(())
        }
        // Null asks the backend for the value without committing to a type.
        (from, to) if matches!(to, AttrValue::Null) => {
            *to = from.clone();
            Ok(())
        }
        _ => Err(type_mismatch(id, src_type, dst_type)),
    }
}

fn transfer_list<T: Copy>(from: &[T], to: &mut Vec<T>, null: T, count_only: bool) {
    to.clear();
    if count_only {
        to.resize(from.len(), null);
    } else {
        to.extend_from_slice(from);
    }
}

fn type_mismatch(id: u32, src_type: &str, dst_type: &str) -> Error {
    Error::new(ErrorKind::ProtocolDesync).with_message(format!(
        "attribute {id} reply type {src_type} does not match buffer type {dst_type}"
    ))
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct StatInfo {
    pub name: String,
    pub kind: StatValueKind,
}

/// Statically declared counters per object type.
pub trait StatMetadata: Send + Sync {
    fn stat_info(&self, object_type: ObjectType, stat_id: StatId) -> Option<&StatInfo>;
}

#[derive(Clone, Debug, Default)]
pub struct StatCatalog {
    entries: HashMap<(ObjectType, StatId), StatInfo>,
}

impl StatCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Catalog with the counters every OTAI backend reports.
    pub fn builtin() -> Self {
        use StatValueKind::{Double, Uint64};

        let mut catalog = Self::empty();
        let builtin: &[(ObjectType, StatId, &str, StatValueKind)] = &[
            (ObjectType::Linecard, 0, "OTAI_LINECARD_STAT_MEMORY_AVAILABLE", Uint64),
            (ObjectType::Linecard, 1, "OTAI_LINECARD_STAT_MEMORY_UTILIZED", Uint64),
            (ObjectType::Linecard, 2, "OTAI_LINECARD_STAT_CPU_UTILIZATION", Double),
            (ObjectType::Port, 0, "OTAI_PORT_STAT_INPUT_POWER", Double),
            (ObjectType::Port, 1, "OTAI_PORT_STAT_OUTPUT_POWER", Double),
            (ObjectType::Transceiver, 0, "OTAI_TRANSCEIVER_STAT_TEMPERATURE", Double),
            (ObjectType::Ethernet, 0, "OTAI_ETHERNET_STAT_IN_PKTS", Uint64),
            (ObjectType::Ethernet, 1, "OTAI_ETHERNET_STAT_OUT_PKTS", Uint64),
            (ObjectType::Ethernet, 2, "OTAI_ETHERNET_STAT_IN_CRC_ERRORS", Uint64),
            (ObjectType::Otn, 0, "OTAI_OTN_STAT_PRE_FEC_BER", Double),
            (ObjectType::Otn, 1, "OTAI_OTN_STAT_ERRORED_SECONDS", Uint64),
            (ObjectType::Och, 0, "OTAI_OCH_STAT_CHROMATIC_DISPERSION", Double),
            (ObjectType::Och, 1, "OTAI_OCH_STAT_OSNR", Double),
            (ObjectType::Oa, 0, "OTAI_OA_STAT_ACTUAL_GAIN", Double),
            (ObjectType::Osc, 0, "OTAI_OSC_STAT_INPUT_POWER", Double),
        ];
        for (object_type, id, name, kind) in builtin {
            catalog.insert(*object_type, *id, *name, *kind);
        }
        catalog
    }

    pub fn insert(
        &mut self,
        object_type: ObjectType,
        stat_id: StatId,
        name: impl Into<String>,
        kind: StatValueKind,
    ) {
        self.entries.insert(
            (object_type, stat_id),
            StatInfo {
                name: name.into(),
                kind,
            },
        );
    }
}

impl StatMetadata for StatCatalog {
    fn stat_info(&self, object_type: ObjectType, stat_id: StatId) -> Option<&StatInfo> {
        self.entries.get(&(object_type, stat_id))
    }
}

/// One field per counter, named after the counter, with an empty value.
pub fn serialize_counter_ids(
    metadata: &dyn StatMetadata,
    object_type: ObjectType,
    counter_ids: &[StatId],
) -> Result<Vec<FieldValue>, Error> {
    counter_ids
        .iter()
        .map(|id| {
            metadata
                .stat_info(object_type, *id)
                .map(|info| FieldValue::new(info.name.clone(), ""))
                .ok_or_else(|| {
                    Error::new(ErrorKind::InvalidParameter)
                        .with_message(format!("unknown counter {id} for {object_type}"))
                })
        })
        .collect()
}

pub fn parse_counter(kind: StatValueKind, text: &str) -> Result<StatValue, Error> {
    let text = text.trim();
    let parsed = match kind {
        StatValueKind::Uint64 => text.parse::<u64>().map(StatValue::U64).ok(),
        StatValueKind::Double => text.parse::<f64>().map(StatValue::Double).ok(),
    };
    parsed.ok_or_else(|| {
        Error::new(ErrorKind::ProtocolDesync)
            .with_message(format!("counter value {text:?} is not a valid {kind:?}"))
    })
}
