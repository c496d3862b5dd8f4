//! Purpose: End-to-end tests for `RemoteInterface` over the in-process transport.
//! Exports: None (integration test module).
//! Role: Validate object lifecycle, stats, and notification delivery against `SimBackend`.
//! Invariants: Bounded waits avoid test flakiness.

use otai_remote::api::{
    AttrValue, Attribute, ErrorKind, MetadataValidator, Notification, NotificationCallback,
    NotificationKind, ObjectId, ObjectType, RemoteInterface, StatValue, Status, linecard_attr,
    object_key,
};
use otai_remote::config::{InterfaceConfig, LinecardContext, NotificationDelivery};
use otai_remote::core::channel::{CommandTag, MemoryTransport};
use otai_remote::core::codec::FieldValue;
use otai_remote::sim::SimBackend;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

type TestResult<T> = Result<T, Box<dyn std::error::Error>>;

const LINECARD: ObjectId = ObjectId::from_raw(0x1000000000000);
const STATE_BODY: &str = r#"{"linecard_id":"oid:0x1000000000000","oper_status":"ACTIVE"}"#;

#[derive(Default)]
struct CountingMeta {
    seen: AtomicUsize,
}

impl MetadataValidator for CountingMeta {
    fn process_notification(&self, _notification: &Notification) {
        self.seen.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    backend: Arc<SimBackend>,
    api: RemoteInterface,
    meta: Arc<CountingMeta>,
}

impl Harness {
    fn start(config: InterfaceConfig) -> TestResult<Self> {
        let backend = Arc::new(SimBackend::new());
        let transport = Arc::new(MemoryTransport::new(backend.clone()));
        let mut api = RemoteInterface::new(transport).with_config(config);
        let meta = Arc::new(CountingMeta::default());
        let shared: Arc<dyn MetadataValidator> = meta.clone();
        api.set_meta(Arc::downgrade(&shared));
        api.initialize()?;
        Ok(Self { backend, api, meta })
    }
}

fn recording_callback() -> (NotificationCallback, Receiver<(NotificationKind, Option<String>)>) {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    let callback = NotificationCallback::new(move |notification: &Notification| {
        let thread = std::thread::current().name().map(str::to_string);
        let _ = tx
            .lock()
            .expect("lock")
            .send((notification.kind(), thread));
    });
    (callback, rx)
}

fn state_change_pointer(callback: NotificationCallback) -> Attribute {
    Attribute::new(
        linecard_attr::LINECARD_STATE_CHANGE_NOTIFY,
        AttrValue::Pointer(Some(callback)),
    )
}

#[test]
fn object_lifecycle_round_trip() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;

    let linecard = h.api.create(
        ObjectType::Linecard,
        ObjectId::NULL,
        &[Attribute::new(
            linecard_attr::SERIAL_NO,
            AttrValue::Str("SN-1".into()),
        )],
    )?;
    assert_eq!(linecard, LINECARD);
    assert_eq!(h.api.tracked_linecard(), Some(LINECARD));

    let mut attrs = [Attribute::new(linecard_attr::SERIAL_NO, AttrValue::Null)];
    h.api.get(ObjectType::Linecard, linecard, &mut attrs)?;
    assert_eq!(attrs[0].value, AttrValue::Str("SN-1".into()));

    h.api.set(
        ObjectType::Linecard,
        linecard,
        &Attribute::new(linecard_attr::SERIAL_NO, AttrValue::Str("SN-2".into())),
    )?;
    h.api.get(ObjectType::Linecard, linecard, &mut attrs)?;
    assert_eq!(attrs[0].value, AttrValue::Str("SN-2".into()));

    let port = h.api.create(ObjectType::Port, linecard, &[])?;
    assert_eq!(h.api.object_type_query(port), Some(ObjectType::Port));
    assert_eq!(h.api.linecard_id_query(port), Some(linecard));
    assert_eq!(h.backend.record(&object_key(ObjectType::Port, port)), Some(Vec::new()));

    h.api.remove(ObjectType::Port, port)?;
    let err = h.api.remove(ObjectType::Port, port).expect_err("gone");
    assert_eq!(err.kind(), ErrorKind::ItemNotFound);

    let err = h
        .api
        .create(ObjectType::Linecard, ObjectId::NULL, &[])
        .expect_err("duplicate");
    assert_eq!(err.kind(), ErrorKind::ItemAlreadyExists);
    // The failed create leaves the tracked linecard in place.
    assert_eq!(h.api.tracked_linecard(), Some(LINECARD));

    h.api.remove(ObjectType::Linecard, linecard)?;
    assert_eq!(h.api.tracked_linecard(), None);
    assert_eq!(h.backend.object_count(), 0);

    let ops = h
        .backend
        .commands()
        .iter()
        .map(|command| command.op)
        .collect::<Vec<_>>();
    assert_eq!(ops.first(), Some(&CommandTag::Create));
    assert_eq!(ops.last(), Some(&CommandTag::Remove));
    Ok(())
}

#[test]
fn list_overflow_reports_count_then_retry_succeeds() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let linecard = h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;
    let port = h.api.create(ObjectType::Port, linecard, &[])?;
    let members = vec![linecard, port, linecard];
    h.api.set(
        ObjectType::Port,
        port,
        &Attribute::new(20, AttrValue::OidList(members.clone())),
    )?;

    let mut attrs = [Attribute::new(20, AttrValue::OidList(vec![ObjectId::NULL]))];
    let err = h
        .api
        .get(ObjectType::Port, port, &mut attrs)
        .expect_err("overflow");
    assert_eq!(err.kind(), ErrorKind::BufferOverflow);
    assert_eq!(attrs[0].value.list_len(), Some(3));

    h.api.get(ObjectType::Port, port, &mut attrs)?;
    assert_eq!(attrs[0].value, AttrValue::OidList(members));
    Ok(())
}

#[test]
fn oversized_list_in_success_reply_reports_true_size() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let linecard = h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;
    let port = h.api.create(ObjectType::Port, linecard, &[])?;

    h.backend.inject_reply(
        Status::Success,
        vec![
            FieldValue::new("7", r#"{"type":"str","value":"x"}"#),
            FieldValue::new("9", r#"{"type":"u32_list","value":[1,2,3]}"#),
        ],
    );
    let mut attrs = [
        Attribute::new(7, AttrValue::Null),
        Attribute::new(9, AttrValue::U32List(vec![0])),
    ];
    let err = h
        .api
        .get(ObjectType::Port, port, &mut attrs)
        .expect_err("overflow");
    assert_eq!(err.kind(), ErrorKind::BufferOverflow);
    assert_eq!(err.status(), Status::BufferOverflow);
    assert!(!err.is_fatal());
    assert_eq!(attrs[0].value, AttrValue::Null);
    assert_eq!(attrs[1].value.list_len(), Some(3));
    Ok(())
}

#[test]
fn stats_read_and_clear() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let linecard = h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;
    let ethernet = h.api.create(ObjectType::Ethernet, linecard, &[])?;
    let key = object_key(ObjectType::Ethernet, ethernet);
    h.backend.set_counter(&key, "OTAI_ETHERNET_STAT_IN_PKTS", 42);
    h.backend.set_counter(&key, "OTAI_ETHERNET_STAT_IN_CRC_ERRORS", 3);

    let values = h.api.get_stats(ObjectType::Ethernet, ethernet, &[0, 2])?;
    assert_eq!(values, vec![StatValue::U64(42), StatValue::U64(3)]);

    h.api.clear_stats(ObjectType::Ethernet, ethernet, &[2])?;
    let values = h.api.get_stats(ObjectType::Ethernet, ethernet, &[0, 2])?;
    assert_eq!(values, vec![StatValue::U64(42), StatValue::U64(0)]);

    let err = h
        .api
        .get_stats(ObjectType::Ethernet, ethernet, &[77])
        .expect_err("unknown counter");
    assert_eq!(err.kind(), ErrorKind::InvalidParameter);
    Ok(())
}

#[test]
fn malformed_replies_are_fatal() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let linecard = h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;

    h.backend.inject_reply(Status::Success, Vec::new());
    let mut attrs = [Attribute::new(linecard_attr::SERIAL_NO, AttrValue::Null)];
    let err = h
        .api
        .get(ObjectType::Linecard, linecard, &mut attrs)
        .expect_err("empty payload");
    assert!(err.is_fatal());

    h.backend.inject_reply(
        Status::Success,
        vec![FieldValue::new("OTAI_LINECARD_STAT_MEMORY_AVAILABLE", "1")],
    );
    let err = h
        .api
        .get_stats(ObjectType::Linecard, linecard, &[0, 1])
        .expect_err("short stats");
    assert!(err.is_fatal());
    Ok(())
}

#[test]
fn inline_notifications_run_on_delivery_thread() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let (callback, rx) = recording_callback();
    h.api.create(
        ObjectType::Linecard,
        ObjectId::NULL,
        &[state_change_pointer(callback)],
    )?;

    assert!(h.backend.emit("linecard_state_change", STATE_BODY));
    let (kind, thread) = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(kind, NotificationKind::LinecardStateChange);
    assert_eq!(thread.as_deref(), Some("otai-notifications"));
    assert_eq!(h.meta.seen.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn queued_notifications_wait_for_caller() -> TestResult<()> {
    let config = InterfaceConfig {
        notification_delivery: NotificationDelivery::Queued,
        ..InterfaceConfig::default()
    };
    let mut h = Harness::start(config)?;
    let (callback, rx) = recording_callback();
    h.api.create(
        ObjectType::Linecard,
        ObjectId::NULL,
        &[state_change_pointer(callback)],
    )?;
    assert!(h.backend.emit("linecard_state_change", STATE_BODY));

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut drained = 0;
    while drained == 0 && Instant::now() < deadline {
        drained = h.api.process_pending_notifications();
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(drained, 1);
    let (_, thread) = rx.recv_timeout(Duration::from_secs(1))?;
    assert_eq!(thread, std::thread::current().name().map(str::to_string));
    Ok(())
}

#[test]
fn expired_metadata_drops_notifications() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    let (callback, rx) = recording_callback();
    h.api.create(
        ObjectType::Linecard,
        ObjectId::NULL,
        &[state_change_pointer(callback)],
    )?;

    let Harness { backend, api, meta } = h;
    drop(meta);
    assert!(backend.emit("linecard_state_change", STATE_BODY));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    drop(api);
    Ok(())
}

#[test]
fn uninitialize_detaches_backend() -> TestResult<()> {
    let mut h = Harness::start(InterfaceConfig::default())?;
    h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;
    assert!(h.backend.is_attached());

    h.api.uninitialize()?;
    assert!(!h.backend.is_attached());
    assert!(!h.backend.emit("linecard_state_change", STATE_BODY));
    assert_eq!(h.api.tracked_linecard(), None);

    let err = h
        .api
        .get_stats(ObjectType::Linecard, LINECARD, &[0])
        .expect_err("closed");
    assert_eq!(err.kind(), ErrorKind::NotInitialized);
    Ok(())
}

#[test]
fn linecard_ids_survive_restart() -> TestResult<()> {
    let config = InterfaceConfig {
        global_context: 2,
        linecards: vec![
            LinecardContext {
                index: 0,
                hardware_info: String::new(),
            },
            LinecardContext {
                index: 5,
                hardware_info: "slot-5".to_string(),
            },
        ],
        ..InterfaceConfig::default()
    };
    let hardware = [Attribute::new(
        linecard_attr::HARDWARE_INFO,
        AttrValue::Str("slot-5".into()),
    )];

    let first = {
        let mut h = Harness::start(config.clone())?;
        h.api.create(ObjectType::Linecard, ObjectId::NULL, &hardware)?
    };
    let mut h = Harness::start(config)?;
    let second = h.api.create(ObjectType::Linecard, ObjectId::NULL, &hardware)?;
    assert_eq!(first, second);
    assert_ne!(first, LINECARD);
    Ok(())
}

#[test]
fn buffered_channel_flushes_on_wait() -> TestResult<()> {
    let config = InterfaceConfig {
        buffered: true,
        ..InterfaceConfig::default()
    };
    let mut h = Harness::start(config)?;
    let linecard = h.api.create(ObjectType::Linecard, ObjectId::NULL, &[])?;
    h.api.set(
        ObjectType::Linecard,
        linecard,
        &Attribute::new(linecard_attr::FLUSH, AttrValue::Bool(true)),
    )?;
    let port = h.api.create(ObjectType::Port, linecard, &[])?;
    assert_eq!(h.backend.commands().len(), 2);
    assert!(h.backend.record(&object_key(ObjectType::Port, port)).is_some());
    Ok(())
}
