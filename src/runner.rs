//! Purpose: Execute JSON step manifests against `RemoteInterface` and the simulated backend.
//! Exports: `run_manifest`.
//! Role: Scripted end-to-end driver behind `otai-remote run`.
//! Invariants: Steps execute in order and stop at the first unexpected outcome.
//! Invariants: Each completed step prints exactly one JSON line on stdout.
#![allow(clippy::result_large_err)]

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use otai_remote::api::{
    AttrValue, Attribute, Error, ErrorKind, MetadataValidator, Notification,
    NotificationCallback, ObjectId, ObjectType, RemoteInterface, StatId, Status, linecard_attr,
    object_key,
};
use otai_remote::config::InterfaceConfig;
use otai_remote::core::channel::MemoryTransport;
use otai_remote::core::codec::FieldValue;
use otai_remote::sim::SimBackend;

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(2);
const DELIVERY_POLL: Duration = Duration::from_millis(5);

#[derive(Deserialize)]
struct Manifest {
    steps: Vec<Step>,
}

#[derive(Deserialize)]
struct Step {
    #[serde(default)]
    id: Option<String>,
    #[serde(flatten)]
    op: StepOp,
    #[serde(default)]
    expect: Option<Value>,
}

#[derive(Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum StepOp {
    Initialize,
    Uninitialize,
    Create {
        object_type: ObjectType,
        #[serde(default)]
        linecard_id: Option<String>,
        #[serde(default)]
        attrs: Vec<Value>,
        #[serde(default)]
        save_as: Option<String>,
    },
    Remove {
        object_type: ObjectType,
        object_id: String,
    },
    Set {
        object_type: ObjectType,
        object_id: String,
        attr: Value,
    },
    Get {
        object_type: ObjectType,
        object_id: String,
        attrs: Vec<Value>,
    },
    GetStats {
        object_type: ObjectType,
        object_id: String,
        counters: Vec<StatId>,
    },
    ClearStats {
        object_type: ObjectType,
        object_id: String,
        counters: Vec<StatId>,
    },
    Flush {
        linecard_id: String,
    },
    Emit {
        name: String,
        #[serde(default)]
        body: Value,
    },
    SetCounter {
        object_type: ObjectType,
        object_id: String,
        name: String,
        value: String,
    },
    InjectReply {
        status: Status,
        #[serde(default)]
        fields: Vec<FieldValue>,
    },
}

impl StepOp {
    fn name(&self) -> &'static str {
        match self {
            StepOp::Initialize => "initialize",
            StepOp::Uninitialize => "uninitialize",
            StepOp::Create { .. } => "create",
            StepOp::Remove { .. } => "remove",
            StepOp::Set { .. } => "set",
            StepOp::Get { .. } => "get",
            StepOp::GetStats { .. } => "get_stats",
            StepOp::ClearStats { .. } => "clear_stats",
            StepOp::Flush { .. } => "flush",
            StepOp::Emit { .. } => "emit",
            StepOp::SetCounter { .. } => "set_counter",
            StepOp::InjectReply { .. } => "inject_reply",
        }
    }
}

/// Accepts every notification; counts what it saw.
#[derive(Default)]
struct RecordingMeta {
    seen: AtomicUsize,
}

impl MetadataValidator for RecordingMeta {
    fn process_notification(&self, notification: &Notification) {
        self.seen.fetch_add(1, Ordering::SeqCst);
        debug!(kind = notification.kind().name(), "metadata updated");
    }
}

struct Runner {
    backend: Arc<SimBackend>,
    api: RemoteInterface,
    _meta: Arc<RecordingMeta>,
    delivered: Arc<AtomicUsize>,
    names: HashMap<String, ObjectId>,
}

pub fn run_manifest(path: &Path, config: InterfaceConfig) -> Result<(), Error> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to read manifest {}", path.display()))
            .with_source(err)
    })?;
    let manifest: Manifest = serde_json::from_str(&text).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("failed to parse manifest json")
            .with_source(err)
    })?;

    let mut runner = Runner::new(config);
    for (index, step) in manifest.steps.iter().enumerate() {
        let outcome = runner.run_step(&step.op);
        let line = check_outcome(index, step, outcome)?;
        println!("{line}");
    }
    Ok(())
}

impl Runner {
    fn new(config: InterfaceConfig) -> Self {
        let backend = Arc::new(SimBackend::new());
        let transport = Arc::new(MemoryTransport::new(backend.clone()));
        let mut api = RemoteInterface::new(transport).with_config(config);
        let meta = Arc::new(RecordingMeta::default());
        let shared: Arc<dyn MetadataValidator> = meta.clone();
        api.set_meta(Arc::downgrade(&shared));
        Self {
            backend,
            api,
            _meta: meta,
            delivered: Arc::new(AtomicUsize::new(0)),
            names: HashMap::new(),
        }
    }

    fn run_step(&mut self, op: &StepOp) -> Result<Value, Error> {
        match op {
            StepOp::Initialize => self.api.initialize().map(|()| Value::Null),
            StepOp::Uninitialize => self.api.uninitialize().map(|()| Value::Null),
            StepOp::Create {
                object_type,
                linecard_id,
                attrs,
                save_as,
            } => {
                let linecard_id = match linecard_id {
                    Some(reference) => self.resolve(reference)?,
                    None => ObjectId::NULL,
                };
                let attrs = self.parse_attrs(attrs)?;
                let object_id = self.api.create(*object_type, linecard_id, &attrs)?;
                if let Some(name) = save_as {
                    self.names.insert(name.clone(), object_id);
                }
                Ok(json!({ "object_id": object_id }))
            }
            StepOp::Remove {
                object_type,
                object_id,
            } => {
                let object_id = self.resolve(object_id)?;
                self.api.remove(*object_type, object_id).map(|()| Value::Null)
            }
            StepOp::Set {
                object_type,
                object_id,
                attr,
            } => {
                let object_id = self.resolve(object_id)?;
                let attr = self.parse_attr(attr)?;
                self.api
                    .set(*object_type, object_id, &attr)
                    .map(|()| Value::Null)
            }
            StepOp::Get {
                object_type,
                object_id,
                attrs,
            } => {
                let object_id = self.resolve(object_id)?;
                let mut attrs = self.parse_attrs(attrs)?;
                match self.api.get(*object_type, object_id, &mut attrs) {
                    Ok(()) => Ok(json!({ "attrs": attrs })),
                    Err(err) if err.kind() == ErrorKind::BufferOverflow => {
                        let counts = attrs
                            .iter()
                            .map(|attr| json!({ "id": attr.id, "count": attr.value.list_len() }))
                            .collect::<Vec<_>>();
                        let detail = format!("list sizes: {}", Value::Array(counts));
                        Err(err.with_message(detail))
                    }
                    Err(err) => Err(err),
                }
            }
            StepOp::GetStats {
                object_type,
                object_id,
                counters,
            } => {
                let object_id = self.resolve(object_id)?;
                let values = self.api.get_stats(*object_type, object_id, counters)?;
                Ok(json!({ "values": values }))
            }
            StepOp::ClearStats {
                object_type,
                object_id,
                counters,
            } => {
                let object_id = self.resolve(object_id)?;
                self.api
                    .clear_stats(*object_type, object_id, counters)
                    .map(|()| Value::Null)
            }
            StepOp::Flush { linecard_id } => {
                let linecard_id = self.resolve(linecard_id)?;
                let attr = Attribute::new(linecard_attr::FLUSH, AttrValue::Bool(true));
                self.api
                    .set(ObjectType::Linecard, linecard_id, &attr)
                    .map(|()| Value::Null)
            }
            StepOp::Emit { name, body } => Ok(json!({ "delivered": self.emit(name, body) })),
            StepOp::SetCounter {
                object_type,
                object_id,
                name,
                value,
            } => {
                let object_id = self.resolve(object_id)?;
                self.backend
                    .set_counter(&object_key(*object_type, object_id), name, value);
                Ok(Value::Null)
            }
            StepOp::InjectReply { status, fields } => {
                self.backend.inject_reply(*status, fields.clone());
                Ok(Value::Null)
            }
        }
    }

    /// `$name` refers to an id saved by an earlier create step.
    fn resolve(&self, reference: &str) -> Result<ObjectId, Error> {
        match reference.strip_prefix('$') {
            Some(name) => self.names.get(name).copied().ok_or_else(|| {
                Error::new(ErrorKind::Usage).with_message(format!("unknown object name: {name}"))
            }),
            None => ObjectId::from_str(reference),
        }
    }

    fn parse_attrs(&self, values: &[Value]) -> Result<Vec<Attribute>, Error> {
        values.iter().map(|value| self.parse_attr(value)).collect()
    }

    /// Pointer attributes marked `true` get a callback that counts deliveries.
    fn parse_attr(&self, value: &Value) -> Result<Attribute, Error> {
        let mut attr: Attribute = serde_json::from_value(value.clone()).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid attribute: {value}"))
                .with_source(err)
        })?;
        let wants_callback = value.pointer("/value/type") == Some(&json!("pointer"))
            && value.pointer("/value/value") == Some(&Value::Bool(true));
        if wants_callback {
            let delivered = self.delivered.clone();
            attr.value = AttrValue::Pointer(Some(NotificationCallback::new(move |notification| {
                delivered.fetch_add(1, Ordering::SeqCst);
                debug!(kind = notification.kind().name(), "notification delivered");
            })));
        }
        Ok(attr)
    }

    fn emit(&self, name: &str, body: &Value) -> bool {
        let before = self.delivered.load(Ordering::SeqCst);
        if !self.backend.emit(name, &body.to_string()) {
            return false;
        }
        let deadline = Instant::now() + DELIVERY_TIMEOUT;
        loop {
            self.api.process_pending_notifications();
            if self.delivered.load(Ordering::SeqCst) > before {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(DELIVERY_POLL);
        }
    }
}

fn check_outcome(index: usize, step: &Step, outcome: Result<Value, Error>) -> Result<Value, Error> {
    let mut line = Map::new();
    line.insert("step".to_string(), json!(index));
    if let Some(id) = &step.id {
        line.insert("id".to_string(), json!(id));
    }
    line.insert("op".to_string(), json!(step.op.name()));

    let expect = step.expect.as_ref();
    let expect_error = expect.and_then(|expect| expect.get("error"));
    match (outcome, expect_error) {
        (Ok(result), None) => {
            if let Some(expect) = expect {
                expect_fields(index, step, expect, &result)?;
            }
            line.insert("result".to_string(), result);
        }
        (Ok(_), Some(_)) => {
            return Err(step_err(index, step, "expected error but operation succeeded"));
        }
        (Err(err), None) => {
            let message = format!("unexpected error: {err}");
            return Err(Error::new(err.kind()).with_message(step_message(index, step, &message)));
        }
        (Err(err), Some(expect_error)) => {
            expect_error_matches(index, step, expect_error, &err)?;
            line.insert(
                "error".to_string(),
                json!({
                    "kind": format!("{:?}", err.kind()),
                    "status": err.status(),
                    "fatal": err.is_fatal(),
                }),
            );
        }
    }
    Ok(Value::Object(line))
}

fn expect_fields(index: usize, step: &Step, expect: &Value, result: &Value) -> Result<(), Error> {
    let Some(expected) = expect.as_object() else {
        return Err(step_err(index, step, "expect must be an object"));
    };
    for (field, want) in expected {
        let got = result.get(field).unwrap_or(&Value::Null);
        if got != want {
            return Err(step_err(
                index,
                step,
                &format!("expected {field} {want}, got {got}"),
            ));
        }
    }
    Ok(())
}

fn expect_error_matches(
    index: usize,
    step: &Step,
    expect_error: &Value,
    err: &Error,
) -> Result<(), Error> {
    let kind = expect_error
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| step_err(index, step, "expect.error.kind is required"))?;
    let actual = format!("{:?}", err.kind());
    if kind != actual {
        return Err(step_err(
            index,
            step,
            &format!("expected error kind {kind}, got {actual}"),
        ));
    }
    if let Some(fatal) = expect_error.get("fatal").and_then(Value::as_bool) {
        if fatal != err.is_fatal() {
            return Err(step_err(
                index,
                step,
                &format!("expected fatal={fatal}, got {}", err.is_fatal()),
            ));
        }
    }
    Ok(())
}

fn step_message(index: usize, step: &Step, message: &str) -> String {
    let mut out = format!("step {index}");
    if let Some(id) = &step.id {
        out.push_str(&format!(" ({id})"));
    }
    out.push_str(": ");
    out.push_str(message);
    out
}

fn step_err(index: usize, step: &Step, message: &str) -> Error {
    Error::new(ErrorKind::Failure).with_message(step_message(index, step, message))
}
