//! Purpose: In-process OTAI backend for tests, demos, and the manifest runner.
//! Exports: `SimBackend`.
//! Role: Server side of `MemoryTransport`; keeps objects as field maps keyed by object key.
//! Invariants: Every command gets exactly one reply, echoing its sequence token.
//! Invariants: Injected replies are consumed once, in order, before normal handling.
#![allow(clippy::result_large_err)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::core::channel::{Backend, BackendLink, Command, CommandTag, NotificationMessage, Reply};
use crate::core::codec::{FieldValue, clear_oid_values, deserialize_attribute, serialize_attribute};
use crate::core::types::Status;

type Fields = BTreeMap<String, String>;

#[derive(Default)]
pub struct SimBackend {
    objects: Mutex<HashMap<String, Fields>>,
    counters: Mutex<HashMap<String, Fields>>,
    injected: Mutex<VecDeque<(Status, Vec<FieldValue>)>>,
    commands: Mutex<Vec<Command>>,
    link: Mutex<Option<BackendLink>>,
}

impl SimBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sends a notification to the connected client. False when none is attached.
    pub fn emit(&self, name: &str, body: &str) -> bool {
        let link = lock(&self.link).clone();
        match link {
            Some(link) => link.notify(NotificationMessage::new(name, body)),
            None => {
                warn!(name, "no client attached, notification not sent");
                false
            }
        }
    }

    /// Answers the next command with `status` and `fields` instead of handling it.
    pub fn inject_reply(&self, status: Status, fields: Vec<FieldValue>) {
        lock(&self.injected).push_back((status, fields));
    }

    pub fn set_counter(&self, key: &str, name: &str, value: impl ToString) {
        lock(&self.counters)
            .entry(key.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
    }

    /// Stored fields of an object, in field order.
    pub fn record(&self, key: &str) -> Option<Vec<FieldValue>> {
        lock(&self.objects).get(key).map(|fields| {
            fields
                .iter()
                .map(|(field, value)| FieldValue::new(field.clone(), value.clone()))
                .collect()
        })
    }

    pub fn object_count(&self) -> usize {
        lock(&self.objects).len()
    }

    pub fn commands(&self) -> Vec<Command> {
        lock(&self.commands).clone()
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.link).is_some()
    }

    fn dispatch(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        match command.op {
            CommandTag::Create => self.create(command),
            CommandTag::Remove => self.remove(command),
            CommandTag::Set => self.set(command),
            CommandTag::Get => self.get(command),
            CommandTag::GetStats => self.get_stats(command),
            CommandTag::ClearStats => self.clear_stats(command),
            CommandTag::GetResponse => {
                warn!(key = %command.key, "client sent a response tag as a command");
                (Status::Failure, Vec::new())
            }
        }
    }

    fn create(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        let mut objects = lock(&self.objects);
        if objects.contains_key(&command.key) {
            return (Status::ItemAlreadyExists, Vec::new());
        }
        let fields = command
            .fields
            .iter()
            .filter(|entry| !entry.is_null_sentinel())
            .map(|entry| (entry.field.clone(), entry.value.clone()))
            .collect();
        objects.insert(command.key.clone(), fields);
        (Status::Success, Vec::new())
    }

    fn remove(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        if lock(&self.objects).remove(&command.key).is_none() {
            return (Status::ItemNotFound, Vec::new());
        }
        lock(&self.counters).remove(&command.key);
        (Status::Success, Vec::new())
    }

    fn set(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        let mut objects = lock(&self.objects);
        let Some(fields) = objects.get_mut(&command.key) else {
            return (Status::ItemNotFound, Vec::new());
        };
        for entry in &command.fields {
            fields.insert(entry.field.clone(), entry.value.clone());
        }
        (Status::Success, Vec::new())
    }

    fn get(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        let objects = lock(&self.objects);
        let Some(fields) = objects.get(&command.key) else {
            return (Status::ItemNotFound, Vec::new());
        };

        let mut values = Vec::with_capacity(command.fields.len());
        let mut overflow = false;
        for entry in &command.fields {
            let Ok(requested) = deserialize_attribute(entry) else {
                return (Status::InvalidParameter, Vec::new());
            };
            let Some(stored) = fields.get(&entry.field) else {
                debug!(key = %command.key, attr = requested.id, "attribute not set");
                return (Status::ItemNotFound, Vec::new());
            };
            let stored = FieldValue::new(entry.field.clone(), stored.clone());
            let Ok(stored) = deserialize_attribute(&stored) else {
                return (Status::Failure, Vec::new());
            };
            if let (Some(capacity), Some(needed)) =
                (requested.value.list_len(), stored.value.list_len())
            {
                overflow |= needed > capacity;
            }
            values.push(stored);
        }

        if overflow {
            clear_oid_values(&mut values);
        }
        let encoded = values
            .iter()
            .map(serialize_attribute)
            .collect::<Result<Vec<_>, _>>();
        match (encoded, overflow) {
            (Ok(fields), false) => (Status::Success, fields),
            (Ok(fields), true) => (Status::BufferOverflow, fields),
            (Err(_), _) => (Status::Failure, Vec::new()),
        }
    }

    fn get_stats(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        if !lock(&self.objects).contains_key(&command.key) {
            return (Status::ItemNotFound, Vec::new());
        }
        let counters = lock(&self.counters);
        let stored = counters.get(&command.key);
        let fields = command
            .fields
            .iter()
            .map(|entry| {
                let value = stored
                    .and_then(|counters| counters.get(&entry.field))
                    .map_or("0", String::as_str);
                FieldValue::new(entry.field.clone(), value)
            })
            .collect();
        (Status::Success, fields)
    }

    fn clear_stats(&self, command: &Command) -> (Status, Vec<FieldValue>) {
        if !lock(&self.objects).contains_key(&command.key) {
            return (Status::ItemNotFound, Vec::new());
        }
        let mut counters = lock(&self.counters);
        let stored = counters.entry(command.key.clone()).or_default();
        for entry in &command.fields {
            stored.insert(entry.field.clone(), "0".to_string());
        }
        (Status::Success, Vec::new())
    }
}

impl Backend for SimBackend {
    fn attach(&self, link: &BackendLink) {
        *lock(&self.link) = Some(link.clone());
    }

    fn handle(&self, command: Command, link: &BackendLink) {
        debug!(seq = command.seq, op = %command.op, key = %command.key, "sim command");
        let injected = lock(&self.injected).pop_front();
        let (status, fields) = match injected {
            Some(reply) => reply,
            None => self.dispatch(&command),
        };
        let reply = Reply::to(&command, status, fields);
        lock(&self.commands).push(command);
        if !link.reply(reply) {
            debug!("client gone before reply was delivered");
        }
    }

    fn detach(&self) {
        lock(&self.link).take();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}
