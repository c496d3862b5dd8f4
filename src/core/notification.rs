//! Purpose: Typed backend notifications, their factory, and the linecard callback table.
//! Exports: `Notification`, `NotificationKind`, `NotificationFactory`, `JsonNotificationFactory`,
//!          `MetadataValidator`, `LinecardNotifications`.
//! Role: Decodes raw notification messages and routes them to user callbacks.
//! Invariants: Unknown names or malformed bodies decode to `None`; they never panic.
//! Invariants: A notification invokes at most one callback, chosen by its kind.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::core::types::{NotificationCallback, ObjectId};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum NotificationKind {
    LinecardStateChange,
    LinecardAlarm,
    OcmSpectrumPower,
    OtdrResult,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 4] = [
        NotificationKind::LinecardStateChange,
        NotificationKind::LinecardAlarm,
        NotificationKind::OcmSpectrumPower,
        NotificationKind::OtdrResult,
    ];

    pub fn name(self) -> &'static str {
        match self {
            NotificationKind::LinecardStateChange => "linecard_state_change",
            NotificationKind::LinecardAlarm => "linecard_alarm",
            NotificationKind::OcmSpectrumPower => "ocm_spectrum_power",
            NotificationKind::OtdrResult => "otdr_result",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinecardStateChange {
    pub linecard_id: ObjectId,
    pub oper_status: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinecardAlarm {
    pub linecard_id: ObjectId,
    pub alarm_type: String,
    #[serde(default)]
    pub resource_oid: Option<ObjectId>,
    pub severity: String,
    pub status: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time_created: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpectrumPower {
    pub lower_frequency: u64,
    pub upper_frequency: u64,
    pub power: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OcmSpectrumPower {
    pub linecard_id: ObjectId,
    pub ocm_id: ObjectId,
    pub powers: Vec<SpectrumPower>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OtdrResult {
    pub linecard_id: ObjectId,
    pub otdr_id: ObjectId,
    #[serde(default)]
    pub result: Value,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Notification {
    LinecardStateChange(LinecardStateChange),
    LinecardAlarm(LinecardAlarm),
    OcmSpectrumPower(OcmSpectrumPower),
    OtdrResult(OtdrResult),
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::LinecardStateChange(_) => NotificationKind::LinecardStateChange,
            Notification::LinecardAlarm(_) => NotificationKind::LinecardAlarm,
            Notification::OcmSpectrumPower(_) => NotificationKind::OcmSpectrumPower,
            Notification::OtdrResult(_) => NotificationKind::OtdrResult,
        }
    }

    /// Every object id the notification refers to, null ids included.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        match self {
            Notification::LinecardStateChange(n) => vec![n.linecard_id],
            Notification::LinecardAlarm(n) => {
                let mut ids = vec![n.linecard_id];
                ids.extend(n.resource_oid);
                ids
            }
            Notification::OcmSpectrumPower(n) => vec![n.linecard_id, n.ocm_id],
            Notification::OtdrResult(n) => vec![n.linecard_id, n.otdr_id],
        }
    }

    /// First non-null referenced id, or null when there is none.
    pub fn any_object_id(&self) -> ObjectId {
        self.object_ids()
            .into_iter()
            .find(|id| !id.is_null())
            .unwrap_or(ObjectId::NULL)
    }

    /// Runs the callback registered for this kind, if any. Returns whether one ran.
    pub fn execute_callback(&self, table: &LinecardNotifications) -> bool {
        match table.get(self.kind()) {
            Some(callback) => {
                callback.call(self);
                true
            }
            None => false,
        }
    }
}

/// Turns a raw notification message into a typed notification.
pub trait NotificationFactory: Send + Sync {
    fn decode(&self, name: &str, body: &str) -> Option<Notification>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct JsonNotificationFactory;

impl NotificationFactory for JsonNotificationFactory {
    fn decode(&self, name: &str, body: &str) -> Option<Notification> {
        let kind = NotificationKind::from_name(name)?;
        let decoded = match kind {
            NotificationKind::LinecardStateChange => {
                serde_json::from_str(body).map(Notification::LinecardStateChange)
            }
            NotificationKind::LinecardAlarm => {
                serde_json::from_str(body).map(Notification::LinecardAlarm)
            }
            NotificationKind::OcmSpectrumPower => {
                serde_json::from_str(body).map(Notification::OcmSpectrumPower)
            }
            NotificationKind::OtdrResult => {
                serde_json::from_str(body).map(Notification::OtdrResult)
            }
        };
        match decoded {
            Ok(notification) => Some(notification),
            Err(err) => {
                warn!(name, error = %err, "failed to decode notification body");
                None
            }
        }
    }
}

/// Object metadata kept in sync with what notifications report.
///
/// Held through a `Weak` reference; called from the notification delivery
/// thread while the api lock is held.
pub trait MetadataValidator: Send + Sync {
    fn process_notification(&self, notification: &Notification);
}

/// Per-linecard notification callbacks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LinecardNotifications {
    pub on_linecard_state_change: Option<NotificationCallback>,
    pub on_linecard_alarm: Option<NotificationCallback>,
    pub on_ocm_spectrum_power: Option<NotificationCallback>,
    pub on_otdr_result: Option<NotificationCallback>,
}

impl LinecardNotifications {
    pub fn get(&self, kind: NotificationKind) -> Option<&NotificationCallback> {
        match kind {
            NotificationKind::LinecardStateChange => self.on_linecard_state_change.as_ref(),
            NotificationKind::LinecardAlarm => self.on_linecard_alarm.as_ref(),
            NotificationKind::OcmSpectrumPower => self.on_ocm_spectrum_power.as_ref(),
            NotificationKind::OtdrResult => self.on_otdr_result.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, kind: NotificationKind) -> &mut Option<NotificationCallback> {
        match kind {
            NotificationKind::LinecardStateChange => &mut self.on_linecard_state_change,
            NotificationKind::LinecardAlarm => &mut self.on_linecard_alarm,
            NotificationKind::OcmSpectrumPower => &mut self.on_ocm_spectrum_power,
            NotificationKind::OtdrResult => &mut self.on_otdr_result,
        }
    }

    pub fn is_empty(&self) -> bool {
        NotificationKind::ALL
            .into_iter()
            .all(|kind| self.get(kind).is_none())
    }
}
