//! Purpose: Route inbound notifications from the delivery thread to linecard callbacks.
//! Exports: `ApiLock`, `ApiGuard`, `PendingNotification`.
//! Role: Background half of the interface; reads state the foreground writes.
//! Invariants: Metadata is processed under the api lock before any user callback runs.
//! Invariants: Expired metadata, unknown names, and a missing linecard drop the notification.
//! Invariants: Once teardown starts, waiting for the api lock gives up instead of blocking it.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use tracing::{debug, warn};

use crate::core::channel::NotificationMessage;
use crate::core::linecard::Linecard;
use crate::core::notification::{
    LinecardNotifications, MetadataValidator, Notification, NotificationFactory,
};
use crate::core::vid::VirtualObjectIdManager;

#[derive(Debug, Default)]
struct LockState {
    held: Mutex<bool>,
    released: Condvar,
}

/// Exclusion domain shared by foreground callers and notification processing.
///
/// Hold it around any foreground work that touches the same metadata the
/// dispatcher validates notifications against.
#[derive(Clone, Debug, Default)]
pub struct ApiLock {
    inner: Arc<LockState>,
}

/// Held api lock; released on drop.
#[must_use]
#[derive(Debug)]
pub struct ApiGuard<'a> {
    lock: &'a ApiLock,
}

impl ApiLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self) -> ApiGuard<'_> {
        let mut held = self.held();
        while *held {
            held = self.wait(held);
        }
        *held = true;
        ApiGuard { lock: self }
    }

    /// Waits for the lock until `closing` is raised and waiters are woken.
    fn lock_unless_closing(&self, closing: &AtomicBool) -> Option<ApiGuard<'_>> {
        let mut held = self.held();
        while *held {
            if closing.load(Ordering::SeqCst) {
                return None;
            }
            held = self.wait(held);
        }
        *held = true;
        Some(ApiGuard { lock: self })
    }

    /// Wakes every waiter so it re-checks its closing flag.
    pub(crate) fn wake_waiters(&self) {
        let _held = self.held();
        self.inner.released.notify_all();
    }

    fn held(&self) -> MutexGuard<'_, bool> {
        self.inner
            .held
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn wait<'a>(&self, held: MutexGuard<'a, bool>) -> MutexGuard<'a, bool> {
        self.inner
            .released
            .wait(held)
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Drop for ApiGuard<'_> {
    fn drop(&mut self) {
        *self.lock.held() = false;
        self.lock.inner.released.notify_all();
    }
}

/// State written by the foreground and read by the dispatcher.
#[derive(Default)]
pub(crate) struct LocalState {
    pub(crate) linecard: Option<Linecard>,
    pub(crate) vid_manager: Option<Arc<VirtualObjectIdManager>>,
    pub(crate) meta: Option<Weak<dyn MetadataValidator>>,
}

pub(crate) type SharedState = Arc<Mutex<LocalState>>;

pub(crate) fn lock_state(state: &Mutex<LocalState>) -> MutexGuard<'_, LocalState> {
    state.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// A notification whose callbacks were resolved but not yet run.
#[derive(Debug)]
pub struct PendingNotification {
    pub notification: Notification,
    pub callbacks: LinecardNotifications,
}

impl PendingNotification {
    /// Runs the matching callback on the calling thread.
    pub fn execute(&self) -> bool {
        self.notification.execute_callback(&self.callbacks)
    }
}

pub(crate) enum DeliveryTarget {
    Inline,
    Queued(Sender<PendingNotification>),
}

pub(crate) struct NotificationDispatcher {
    factory: Arc<dyn NotificationFactory>,
    state: SharedState,
    api_lock: ApiLock,
    closing: Arc<AtomicBool>,
    target: DeliveryTarget,
}

impl NotificationDispatcher {
    pub(crate) fn new(
        factory: Arc<dyn NotificationFactory>,
        state: SharedState,
        api_lock: ApiLock,
        closing: Arc<AtomicBool>,
        target: DeliveryTarget,
    ) -> Self {
        Self {
            factory,
            state,
            api_lock,
            closing,
            target,
        }
    }

    pub(crate) fn handle(&self, message: &NotificationMessage) {
        let Some(notification) = self.factory.decode(&message.name, &message.body) else {
            debug!(name = %message.name, "dropping undecodable notification");
            return;
        };

        let Some(callbacks) = self.sync_process(&notification) else {
            return;
        };

        match &self.target {
            DeliveryTarget::Inline => {
                notification.execute_callback(&callbacks);
            }
            DeliveryTarget::Queued(queue) => {
                let pending = PendingNotification {
                    notification,
                    callbacks,
                };
                if queue.send(pending).is_err() {
                    debug!("notification queue closed, dropping notification");
                }
            }
        }
    }

    fn sync_process(&self, notification: &Notification) -> Option<LinecardNotifications> {
        let Some(_api_guard) = self.api_lock.lock_unless_closing(&self.closing) else {
            debug!(
                kind = notification.kind().name(),
                "interface closing, dropping notification"
            );
            return None;
        };

        let (meta, vid_manager) = {
            let state = lock_state(&self.state);
            (
                state.meta.as_ref().and_then(Weak::upgrade),
                state.vid_manager.clone(),
            )
        };

        let Some(meta) = meta else {
            warn!("meta pointer expired, dropping notification");
            return None;
        };
        meta.process_notification(notification);
        drop(meta);

        let object_id = notification.any_object_id();
        let linecard_id = vid_manager.and_then(|manager| manager.linecard_id_query(object_id));

        let state = lock_state(&self.state);
        match &state.linecard {
            Some(linecard) => {
                if linecard_id.is_some_and(|id| id != linecard.id()) {
                    debug!(
                        tracked = %linecard.id(),
                        reported = ?linecard_id,
                        "notification scope differs from tracked linecard"
                    );
                }
                Some(linecard.notifications())
            }
            None => {
                warn!(
                    linecard_id = ?linecard_id,
                    "linecard not present, dropping notification"
                );
                None
            }
        }
    }
}
