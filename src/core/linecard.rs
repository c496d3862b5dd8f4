//! Purpose: Track the root linecard and the callbacks registered through its attributes.
//! Exports: `Linecard`, `notification_kind_for`.
//! Role: Root-entity state consulted by notification dispatch.
//! Invariants: Only pointer attributes with a notification id change the callback table.
use tracing::debug;

use crate::core::notification::{LinecardNotifications, NotificationKind};
use crate::core::types::{AttrValue, Attribute, ObjectId, linecard_attr};

#[derive(Clone, Debug)]
pub struct Linecard {
    id: ObjectId,
    notifications: LinecardNotifications,
}

impl Linecard {
    pub fn new(id: ObjectId, attrs: &[Attribute]) -> Self {
        let mut linecard = Self {
            id,
            notifications: LinecardNotifications::default(),
        };
        linecard.update_notifications(attrs);
        linecard
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Copy of the callback table, safe to use after the lock is released.
    pub fn notifications(&self) -> LinecardNotifications {
        self.notifications.clone()
    }

    /// Applies notification pointer attributes; everything else is ignored.
    pub fn update_notifications(&mut self, attrs: &[Attribute]) {
        for attr in attrs {
            let Some(kind) = notification_kind_for(attr.id) else {
                continue;
            };
            let AttrValue::Pointer(callback) = &attr.value else {
                continue;
            };
            debug!(
                linecard_id = %self.id,
                notification = kind.name(),
                registered = callback.is_some(),
                "updating linecard notification pointer"
            );
            *self.notifications.slot_mut(kind) = callback.clone();
        }
    }
}

pub fn notification_kind_for(attr_id: u32) -> Option<NotificationKind> {
    match attr_id {
        linecard_attr::LINECARD_STATE_CHANGE_NOTIFY => Some(NotificationKind::LinecardStateChange),
        linecard_attr::LINECARD_ALARM_NOTIFY => Some(NotificationKind::LinecardAlarm),
        linecard_attr::OCM_SPECTRUM_POWER_NOTIFY => Some(NotificationKind::OcmSpectrumPower),
        linecard_attr::OTDR_RESULT_NOTIFY => Some(NotificationKind::OtdrResult),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::Linecard;
    use crate::core::notification::NotificationKind;
    use crate::core::types::{AttrValue, Attribute, NotificationCallback, ObjectId, linecard_attr};

    fn pointer(id: u32, set: bool) -> Attribute {
        let callback = set.then(|| NotificationCallback::new(|_| {}));
        Attribute::new(id, AttrValue::Pointer(callback))
    }

    #[test]
    fn create_captures_pointer_attributes() {
        let linecard = Linecard::new(
            ObjectId::from_raw(0x1000000000000),
            &[
                Attribute::new(linecard_attr::HARDWARE_INFO, AttrValue::Str("slot-1".into())),
                pointer(linecard_attr::LINECARD_ALARM_NOTIFY, true),
            ],
        );
        let table = linecard.notifications();
        assert!(table.get(NotificationKind::LinecardAlarm).is_some());
        assert!(table.get(NotificationKind::LinecardStateChange).is_none());
    }

    #[test]
    fn set_replaces_and_clears_pointers() {
        let mut linecard = Linecard::new(
            ObjectId::from_raw(0x1000000000000),
            &[pointer(linecard_attr::OTDR_RESULT_NOTIFY, true)],
        );
        linecard.update_notifications(&[pointer(linecard_attr::OTDR_RESULT_NOTIFY, false)]);
        linecard.update_notifications(&[pointer(linecard_attr::LINECARD_STATE_CHANGE_NOTIFY, true)]);
        let table = linecard.notifications();
        assert!(table.get(NotificationKind::OtdrResult).is_none());
        assert!(table.get(NotificationKind::LinecardStateChange).is_some());
    }

    #[test]
    fn non_pointer_values_are_ignored() {
        let linecard = Linecard::new(
            ObjectId::from_raw(0x1000000000000),
            &[Attribute::new(linecard_attr::LINECARD_ALARM_NOTIFY, AttrValue::U32(1))],
        );
        assert!(linecard.notifications().is_empty());
    }
}
