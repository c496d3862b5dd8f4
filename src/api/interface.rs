//! Purpose: The OTAI object API facade over a remote backend.
//! Exports: `RemoteInterface`, `object_key`, `is_extension_attribute`.
//! Role: Lifecycle state machine plus one command and one blocking wait per operation.
//! Invariants: Exactly one command is outstanding between a send and its wait; callers must not
//!             overlap operations on one interface (`&mut self` enforces it in-process).
//! Invariants: Teardown stops notification delivery before local state is cleared.
//! Invariants: Protocol desync errors are returned as fatal and never retried.
#![allow(clippy::result_large_err)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, error, info};

use super::dispatch::{
    ApiLock, DeliveryTarget, LocalState, NotificationDispatcher, PendingNotification,
    SharedState, lock_state,
};
use crate::config::{InterfaceConfig, NotificationDelivery};
use crate::core::channel::{
    Channel, CommandTag, NotificationHandler, NotificationMessage, Reply, Transport,
};
use crate::core::codec::{
    FieldValue, StatMetadata, clear_oid_values, deserialize_attr_list, parse_counter,
    serialize_attr_list, serialize_attribute, serialize_counter_ids, transfer_attributes,
};
use crate::core::error::{Error, ErrorKind};
use crate::core::linecard::Linecard;
use crate::core::notification::{JsonNotificationFactory, MetadataValidator, NotificationFactory};
use crate::core::types::{
    AttrId, AttrValue, Attribute, ObjectId, ObjectType, StatId, StatValue, StatsMode, Status,
    linecard_attr,
};
use crate::core::vid::{CounterIndexGenerator, IndexGenerator, VirtualObjectIdManager};

type ApiResult<T> = Result<T, Error>;

/// Channel key for an object: `<ObjectType>:<SerializedObjectId>`.
pub fn object_key(object_type: ObjectType, object_id: ObjectId) -> String {
    format!("{}:{}", object_type.as_str(), object_id)
}

/// Linecard attributes in the custom range are handled client-side.
pub fn is_extension_attribute(object_type: ObjectType, attr_id: AttrId) -> bool {
    object_type.is_root() && attr_id >= linecard_attr::CUSTOM_RANGE_START
}

struct Session {
    channel: Box<dyn Channel>,
    closing: Arc<AtomicBool>,
    pending: Option<Receiver<PendingNotification>>,
}

pub struct RemoteInterface {
    config: InterfaceConfig,
    transport: Arc<dyn Transport>,
    factory: Arc<dyn NotificationFactory>,
    stats: Arc<dyn StatMetadata>,
    index_generator: Arc<dyn IndexGenerator>,
    api_lock: ApiLock,
    state: SharedState,
    session: Option<Session>,
}

impl RemoteInterface {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let config = InterfaceConfig::default();
        let stats = Arc::new(config.stat_catalog());
        Self {
            config,
            transport,
            factory: Arc::new(JsonNotificationFactory),
            stats,
            index_generator: Arc::new(CounterIndexGenerator::new()),
            api_lock: ApiLock::new(),
            state: Arc::new(Mutex::new(LocalState::default())),
            session: None,
        }
    }

    /// Also rebuilds the counter catalog from the config.
    pub fn with_config(mut self, config: InterfaceConfig) -> Self {
        self.stats = Arc::new(config.stat_catalog());
        self.config = config;
        self
    }

    pub fn with_stat_metadata(mut self, stats: Arc<dyn StatMetadata>) -> Self {
        self.stats = stats;
        self
    }

    pub fn with_notification_factory(mut self, factory: Arc<dyn NotificationFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Object indices survive re-initialization when the generator is shared.
    pub fn with_index_generator(mut self, generator: Arc<dyn IndexGenerator>) -> Self {
        self.index_generator = generator;
        self
    }

    pub fn with_api_lock(mut self, api_lock: ApiLock) -> Self {
        self.api_lock = api_lock;
        self
    }

    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    pub fn api_lock(&self) -> ApiLock {
        self.api_lock.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn initialize(&mut self) -> ApiResult<()> {
        if self.session.is_some() {
            error!("already initialized");
            return Err(Error::new(ErrorKind::AlreadyInitialized)
                .with_message("interface is already initialized"));
        }
        self.config.validate()?;

        self.clear_local_state(Some(Arc::new(VirtualObjectIdManager::new(
            self.config.global_context,
            self.config.linecard_table(),
            self.index_generator.clone(),
        ))));

        let closing = Arc::new(AtomicBool::new(false));
        let (target, pending) = match self.config.notification_delivery {
            NotificationDelivery::Inline => (DeliveryTarget::Inline, None),
            NotificationDelivery::Queued => {
                let (tx, rx) = mpsc::channel();
                (DeliveryTarget::Queued(tx), Some(rx))
            }
        };
        let dispatcher = NotificationDispatcher::new(
            self.factory.clone(),
            self.state.clone(),
            self.api_lock.clone(),
            closing.clone(),
            target,
        );
        let handler: NotificationHandler =
            Arc::new(move |message: &NotificationMessage| dispatcher.handle(message));

        let channel = match self.transport.connect(self.config.buffered, handler) {
            Ok(channel) => channel,
            Err(err) => {
                self.clear_local_state(None);
                return Err(err);
            }
        };

        self.session = Some(Session {
            channel,
            closing,
            pending,
        });
        info!(
            global_context = self.config.global_context,
            buffered = self.config.buffered,
            "initialized"
        );
        Ok(())
    }

    /// Stops notification delivery, then clears local state.
    ///
    /// Calling this while another thread is blocked in an operation on the
    /// same interface is not supported.
    pub fn uninitialize(&mut self) -> ApiResult<()> {
        let Some(session) = self.session.take() else {
            error!("not initialized");
            return Err(
                Error::new(ErrorKind::NotInitialized).with_message("interface is not initialized")
            );
        };
        info!("uninitialize begin");

        session.closing.store(true, Ordering::SeqCst);
        self.api_lock.wake_waiters();
        drop(session);

        self.clear_local_state(None);
        info!("uninitialize end");
        Ok(())
    }

    /// Attaches the metadata store notifications are validated against.
    /// Only a weak reference is kept.
    pub fn set_meta(&mut self, meta: Weak<dyn MetadataValidator>) {
        lock_state(&self.state).meta = Some(meta);
    }

    /// Id of the linecard created through this interface, if any.
    pub fn tracked_linecard(&self) -> Option<ObjectId> {
        lock_state(&self.state).linecard.as_ref().map(Linecard::id)
    }

    pub fn object_type_query(&self, object_id: ObjectId) -> Option<ObjectType> {
        self.vid_manager()
            .ok()?
            .object_type_query(object_id)
    }

    pub fn linecard_id_query(&self, object_id: ObjectId) -> Option<ObjectId> {
        self.vid_manager()
            .ok()?
            .linecard_id_query(object_id)
    }

    /// Runs queued notification callbacks on the calling thread.
    /// Returns how many notifications were drained.
    pub fn process_pending_notifications(&self) -> usize {
        let Some(pending) = self
            .session
            .as_ref()
            .and_then(|session| session.pending.as_ref())
        else {
            return 0;
        };
        let mut drained = 0;
        for notification in pending.try_iter() {
            notification.execute();
            drained += 1;
        }
        drained
    }

    pub fn create(
        &mut self,
        object_type: ObjectType,
        linecard_id: ObjectId,
        attrs: &[Attribute],
    ) -> ApiResult<ObjectId> {
        let vid_manager = self.vid_manager()?;

        let object_id = if object_type.is_root() {
            // Same hardware always gets the same linecard id (warm restart).
            vid_manager.allocate_linecard_id(hardware_info(attrs))
        } else {
            vid_manager.allocate_object_id(object_type, linecard_id)
        };
        let Some(object_id) = object_id else {
            error!(
                %object_type,
                %linecard_id,
                "failed to allocate object id"
            );
            return Err(Error::new(ErrorKind::InsufficientResources)
                .with_message(format!("failed to allocate id for {object_type}")));
        };

        let mut fields = serialize_attr_list(attrs)?;
        if fields.is_empty() {
            // The backend must see a record even with no attributes.
            fields.push(FieldValue::null_sentinel());
        }

        let key = object_key(object_type, object_id);
        info!(key = %key, fields = fields.len(), "generic create");
        self.channel()?.set(&key, fields, CommandTag::Create)?;
        self.wait_for_status(&key)?;

        if object_type.is_root() {
            lock_state(&self.state).linecard = Some(Linecard::new(object_id, attrs));
        }
        Ok(object_id)
    }

    pub fn remove(&mut self, object_type: ObjectType, object_id: ObjectId) -> ApiResult<()> {
        let key = object_key(object_type, object_id);
        info!(key = %key, "generic remove");
        self.channel()?.del(&key, CommandTag::Remove)?;
        self.wait_for_status(&key)?;

        if object_type.is_root() {
            info!(linecard_id = %object_id, "removing linecard");
            lock_state(&self.state).linecard = None;
        }
        Ok(())
    }

    pub fn set(
        &mut self,
        object_type: ObjectType,
        object_id: ObjectId,
        attr: &Attribute,
    ) -> ApiResult<()> {
        if is_extension_attribute(object_type, attr.id) {
            return self.set_extension_attribute(attr);
        }

        let fields = vec![serialize_attribute(attr)?];
        let key = object_key(object_type, object_id);
        debug!(key = %key, fields = fields.len(), "generic set");
        self.channel()?.set(&key, fields, CommandTag::Set)?;
        self.wait_for_status(&key)?;

        if object_type.is_root() {
            if let Some(linecard) = lock_state(&self.state).linecard.as_mut() {
                linecard.update_notifications(std::slice::from_ref(attr));
            }
        }
        Ok(())
    }

    /// Fills `attrs` on success. On `BufferOverflow` the list attributes are
    /// resized to the element counts the backend reported.
    pub fn get(
        &mut self,
        object_type: ObjectType,
        object_id: ObjectId,
        attrs: &mut [Attribute],
    ) -> ApiResult<()> {
        // Reused buffers may still hold ids from an earlier call.
        clear_oid_values(attrs);

        let fields = serialize_attr_list(attrs)?;
        let key = object_key(object_type, object_id);
        debug!(key = %key, fields = fields.len(), "generic get");
        self.channel()?.set(&key, fields, CommandTag::Get)?;
        let reply = self.wait_reply(&key)?;

        match reply.status {
            Status::Success | Status::BufferOverflow => {
                let count_only = reply.status == Status::BufferOverflow;
                if reply.fields.is_empty() {
                    return Err(desync(
                        &key,
                        format!(
                            "status {} but get reply carried no values",
                            reply.status
                        ),
                    ));
                }
                deserialize_attr_list(&reply.fields)
                    .and_then(|values| {
                        transfer_attributes(object_type, &values, attrs, count_only)
                    })
                    .map_err(|err| escalate(err, &key))?;
                if count_only {
                    return Err(Error::from_status(Status::BufferOverflow).with_key(key));
                }
                Ok(())
            }
            status => Err(Error::from_status(status).with_key(key)),
        }
    }

    pub fn get_stats(
        &mut self,
        object_type: ObjectType,
        object_id: ObjectId,
        counter_ids: &[StatId],
    ) -> ApiResult<Vec<StatValue>> {
        self.channel()?;
        let fields = serialize_counter_ids(self.stats.as_ref(), object_type, counter_ids)?;
        let kinds = counter_ids
            .iter()
            .filter_map(|id| self.stats.stat_info(object_type, *id).map(|info| info.kind))
            .collect::<Vec<_>>();

        let key = object_key(object_type, object_id);
        debug!(key = %key, fields = fields.len(), "generic get stats");
        self.channel()?.set(&key, fields, CommandTag::GetStats)?;
        let reply = self.wait_reply(&key)?;

        if reply.status != Status::Success {
            return Err(Error::from_status(reply.status).with_key(key));
        }
        if reply.fields.len() != counter_ids.len() {
            return Err(desync(
                &key,
                format!(
                    "wrong number of counters, got {}, expected {}",
                    reply.fields.len(),
                    counter_ids.len()
                ),
            ));
        }

        reply
            .fields
            .iter()
            .zip(kinds)
            .map(|(entry, kind)| parse_counter(kind, &entry.value))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| escalate(err, &key))
    }

    /// Mode-qualified stats are not supported by this interface.
    pub fn get_stats_ext(
        &mut self,
        object_type: ObjectType,
        object_id: ObjectId,
        _counter_ids: &[StatId],
        mode: StatsMode,
    ) -> ApiResult<Vec<StatValue>> {
        error!(%object_type, %object_id, ?mode, "get_stats_ext not implemented");
        Err(Error::new(ErrorKind::NotImplemented).with_message("get_stats_ext is not implemented"))
    }

    pub fn clear_stats(
        &mut self,
        object_type: ObjectType,
        object_id: ObjectId,
        counter_ids: &[StatId],
    ) -> ApiResult<()> {
        self.channel()?;
        let fields = serialize_counter_ids(self.stats.as_ref(), object_type, counter_ids)?;
        let key = object_key(object_type, object_id);
        debug!(key = %key, fields = fields.len(), "generic clear stats");
        self.channel()?.set(&key, fields, CommandTag::ClearStats)?;
        self.wait_for_status(&key)
    }

    fn set_extension_attribute(&mut self, attr: &Attribute) -> ApiResult<()> {
        match attr.id {
            linecard_attr::FLUSH => {
                debug!("flush requested");
                self.channel()?.flush()
            }
            id => {
                error!(attr_id = id, "unknown extension attribute");
                Err(Error::new(ErrorKind::Failure)
                    .with_message(format!("unknown extension attribute: {id}")))
            }
        }
    }

    fn channel(&mut self) -> ApiResult<&mut dyn Channel> {
        match self.session.as_mut() {
            Some(session) => Ok(session.channel.as_mut()),
            None => Err(Error::new(ErrorKind::NotInitialized)
                .with_message("interface is not initialized")),
        }
    }

    fn wait_reply(&mut self, key: &str) -> ApiResult<Reply> {
        self.channel()?
            .wait(CommandTag::GetResponse)
            .map_err(|err| escalate(err, key))
    }

    fn wait_for_status(&mut self, key: &str) -> ApiResult<()> {
        let reply = self.wait_reply(key)?;
        if reply.status == Status::Success {
            return Ok(());
        }
        debug!(key, status = %reply.status, "backend rejected command");
        Err(Error::from_status(reply.status).with_key(key))
    }

    fn vid_manager(&self) -> ApiResult<Arc<VirtualObjectIdManager>> {
        lock_state(&self.state)
            .vid_manager
            .clone()
            .ok_or_else(|| {
                Error::new(ErrorKind::NotInitialized).with_message("interface is not initialized")
            })
    }

    fn clear_local_state(&self, vid_manager: Option<Arc<VirtualObjectIdManager>>) {
        info!("clearing local state");
        let mut state = lock_state(&self.state);
        state.linecard = None;
        state.vid_manager = vid_manager;
    }
}

impl Drop for RemoteInterface {
    fn drop(&mut self) {
        if self.session.is_some() {
            let _ = self.uninitialize();
        }
    }
}

fn hardware_info(attrs: &[Attribute]) -> &str {
    attrs
        .iter()
        .find_map(|attr| match &attr.value {
            AttrValue::Str(info) if attr.id == linecard_attr::HARDWARE_INFO => Some(info.as_str()),
            _ => None,
        })
        .unwrap_or("")
}

fn desync(key: &str, message: String) -> Error {
    escalate(
        Error::new(ErrorKind::ProtocolDesync).with_message(message),
        key,
    )
}

fn escalate(err: Error, key: &str) -> Error {
    if err.is_fatal() {
        error!(key, error = %err, "protocol desync with backend");
    }
    if err.key().is_some() {
        return err;
    }
    err.with_key(key)
}
