//! Purpose: Define the OTAI object model carried across the command channel.
//! Exports: `ObjectType`, `ObjectId`, `Attribute`, `AttrValue`, `Status`, stat types, linecard attr ids.
//! Role: Shared vocabulary for the facade, codec, virtualizer, and simulated backend.
//! Invariants: Wire names are stable (`OTAI_OBJECT_TYPE_*`, `OTAI_STATUS_*`, `oid:0x<hex>`).
//! Invariants: List values carry their buffer capacity as their length.
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::error::{Error, ErrorKind};
use crate::core::notification::Notification;

pub type AttrId = u32;
pub type StatId = u32;

macro_rules! object_types {
    ($($variant:ident = $value:literal => $name:literal,)*) => {
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub enum ObjectType {
            $($variant = $value,)*
        }

        impl ObjectType {
            pub const ALL: &'static [ObjectType] = &[$(ObjectType::$variant,)*];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(ObjectType::$variant => $name,)*
                }
            }

            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $($value => Some(ObjectType::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

object_types! {
    Linecard = 1 => "OTAI_OBJECT_TYPE_LINECARD",
    Port = 2 => "OTAI_OBJECT_TYPE_PORT",
    Transceiver = 3 => "OTAI_OBJECT_TYPE_TRANSCEIVER",
    LogicalChannel = 4 => "OTAI_OBJECT_TYPE_LOGICALCHANNEL",
    Otn = 5 => "OTAI_OBJECT_TYPE_OTN",
    Ethernet = 6 => "OTAI_OBJECT_TYPE_ETHERNET",
    PhysicalChannel = 7 => "OTAI_OBJECT_TYPE_PHYSICALCHANNEL",
    Och = 8 => "OTAI_OBJECT_TYPE_OCH",
    Lldp = 9 => "OTAI_OBJECT_TYPE_LLDP",
    Assignment = 10 => "OTAI_OBJECT_TYPE_ASSIGNMENT",
    Interface = 11 => "OTAI_OBJECT_TYPE_INTERFACE",
    Oa = 12 => "OTAI_OBJECT_TYPE_OA",
    Osc = 13 => "OTAI_OBJECT_TYPE_OSC",
    Aps = 14 => "OTAI_OBJECT_TYPE_APS",
    ApsPort = 15 => "OTAI_OBJECT_TYPE_APSPORT",
    Attenuator = 16 => "OTAI_OBJECT_TYPE_ATTENUATOR",
    Wss = 17 => "OTAI_OBJECT_TYPE_WSS",
    MediaChannel = 18 => "OTAI_OBJECT_TYPE_MEDIACHANNEL",
    Ocm = 19 => "OTAI_OBJECT_TYPE_OCM",
    Otdr = 20 => "OTAI_OBJECT_TYPE_OTDR",
}

impl ObjectType {
    /// The root of the scoping hierarchy.
    pub fn is_root(self) -> bool {
        self == ObjectType::Linecard
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ObjectType::ALL
            .iter()
            .copied()
            .find(|object_type| object_type.as_str() == value)
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidParameter)
                    .with_message(format!("unknown object type: {value}"))
            })
    }
}

impl Serialize for ObjectType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ObjectType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    pub const NULL: ObjectId = ObjectId(0);

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "oid:0x{:x}", self.0)
    }
}

impl FromStr for ObjectId {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let hex = value
            .strip_prefix("oid:0x")
            .or_else(|| value.strip_prefix("0x"))
            .ok_or_else(|| {
                Error::new(ErrorKind::InvalidParameter)
                    .with_message(format!("object id must look like oid:0x<hex>: {value}"))
            })?;
        u64::from_str_radix(hex, 16).map(ObjectId).map_err(|err| {
            Error::new(ErrorKind::InvalidParameter)
                .with_message(format!("invalid object id: {value}"))
                .with_source(err)
        })
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! statuses {
    ($($variant:ident => $name:literal,)*) => {
        #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
        pub enum Status {
            $($variant,)*
        }

        impl Status {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Status::$variant => $name,)*
                }
            }
        }

        impl FromStr for Status {
            type Err = Error;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($name => Ok(Status::$variant),)*
                    _ => Err(Error::new(ErrorKind::ProtocolDesync)
                        .with_message(format!("unknown status in reply: {value}"))),
                }
            }
        }
    };
}

statuses! {
    Success => "OTAI_STATUS_SUCCESS",
    Failure => "OTAI_STATUS_FAILURE",
    NotSupported => "OTAI_STATUS_NOT_SUPPORTED",
    NoMemory => "OTAI_STATUS_NO_MEMORY",
    InsufficientResources => "OTAI_STATUS_INSUFFICIENT_RESOURCES",
    InvalidParameter => "OTAI_STATUS_INVALID_PARAMETER",
    ItemAlreadyExists => "OTAI_STATUS_ITEM_ALREADY_EXISTS",
    ItemNotFound => "OTAI_STATUS_ITEM_NOT_FOUND",
    BufferOverflow => "OTAI_STATUS_BUFFER_OVERFLOW",
    NotImplemented => "OTAI_STATUS_NOT_IMPLEMENTED",
    Uninitialized => "OTAI_STATUS_UNINITIALIZED",
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Status {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

/// User callback stored in a notification pointer attribute.
#[derive(Clone)]
pub struct NotificationCallback(Arc<dyn Fn(&Notification) + Send + Sync>);

impl NotificationCallback {
    pub fn new(callback: impl Fn(&Notification) + Send + Sync + 'static) -> Self {
        Self(Arc::new(callback))
    }

    pub fn call(&self, notification: &Notification) {
        (self.0)(notification)
    }
}

impl fmt::Debug for NotificationCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationCallback({:p})", Arc::as_ptr(&self.0))
    }
}

// Only reached when a pointer value omits its presence flag, which decodes as absent.
impl<'de> Deserialize<'de> for NotificationCallback {
    fn deserialize<D: Deserializer<'de>>(_deserializer: D) -> Result<Self, D::Error> {
        Err(serde::de::Error::custom(
            "notification callbacks cannot be decoded",
        ))
    }
}

impl PartialEq for NotificationCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Null,
    Bool(bool),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Double(f64),
    Str(String),
    Oid(ObjectId),
    OidList(Vec<ObjectId>),
    U32List(Vec<u32>),
    /// Callbacks never cross the process boundary; only presence is sent.
    Pointer(#[serde(with = "pointer_presence")] Option<NotificationCallback>),
}

impl AttrValue {
    pub fn is_list(&self) -> bool {
        matches!(self, AttrValue::OidList(_) | AttrValue::U32List(_))
    }

    pub fn list_len(&self) -> Option<usize> {
        match self {
            AttrValue::OidList(list) => Some(list.len()),
            AttrValue::U32List(list) => Some(list.len()),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            AttrValue::Null => "null",
            AttrValue::Bool(_) => "bool",
            AttrValue::U32(_) => "u32",
            AttrValue::I32(_) => "i32",
            AttrValue::U64(_) => "u64",
            AttrValue::I64(_) => "i64",
            AttrValue::Double(_) => "double",
            AttrValue::Str(_) => "str",
            AttrValue::Oid(_) => "oid",
            AttrValue::OidList(_) => "oid_list",
            AttrValue::U32List(_) => "u32_list",
            AttrValue::Pointer(_) => "pointer",
        }
    }
}

mod pointer_presence {
    use super::NotificationCallback;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NotificationCallback>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_bool(value.is_some())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NotificationCallback>, D::Error> {
        let _present = bool::deserialize(deserializer)?;
        Ok(None)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub id: AttrId,
    pub value: AttrValue,
}

impl Attribute {
    pub fn new(id: AttrId, value: AttrValue) -> Self {
        Self { id, value }
    }
}

/// Attribute ids defined on the linecard object.
pub mod linecard_attr {
    use super::AttrId;

    pub const HARDWARE_INFO: AttrId = 0;
    pub const LINECARD_STATE_CHANGE_NOTIFY: AttrId = 1;
    pub const LINECARD_ALARM_NOTIFY: AttrId = 2;
    pub const OCM_SPECTRUM_POWER_NOTIFY: AttrId = 3;
    pub const OTDR_RESULT_NOTIFY: AttrId = 4;
    pub const BOARD_MODE: AttrId = 5;
    pub const OPER_STATUS: AttrId = 6;
    pub const SERIAL_NO: AttrId = 7;

    pub const CUSTOM_RANGE_START: AttrId = 0x1000_0000;

    /// Client-side extension: push queued commands to the backend.
    pub const FLUSH: AttrId = CUSTOM_RANGE_START;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatValueKind {
    Uint64,
    Double,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StatValue {
    U64(u64),
    Double(f64),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatsMode {
    ReadOnly,
    ReadAndClear,
}
