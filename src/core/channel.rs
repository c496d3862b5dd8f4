//! Purpose: Command channel between the client and the backend, plus an in-process transport.
//! Exports: `Channel`, `Transport`, `CommandTag`, `Command`, `Reply`, `NotificationMessage`,
//!          `NotificationHandler`, `Backend`, `BackendLink`, `MemoryTransport`, `MemoryChannel`.
//! Role: Carries commands out, one reply back per command, and notifications on their own thread.
//! Invariants: Replies are consumed strictly in command order; a reply whose sequence token
//!             or op tag does not match the outstanding command is a protocol desync.
//! Invariants: Dropping a channel stops and joins the delivery thread before returning.
#![allow(clippy::result_large_err)]

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use tracing::{debug, warn};

use crate::core::codec::FieldValue;
use crate::core::error::{Error, ErrorKind};
use crate::core::types::Status;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandTag {
    Create,
    Remove,
    Set,
    Get,
    GetStats,
    ClearStats,
    #[serde(rename = "getresponse")]
    GetResponse,
}

impl CommandTag {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandTag::Create => "create",
            CommandTag::Remove => "remove",
            CommandTag::Set => "set",
            CommandTag::Get => "get",
            CommandTag::GetStats => "get_stats",
            CommandTag::ClearStats => "clear_stats",
            CommandTag::GetResponse => "getresponse",
        }
    }
}

impl fmt::Display for CommandTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Command {
    pub seq: u64,
    pub op: CommandTag,
    pub key: String,
    pub fields: Vec<FieldValue>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Reply {
    pub seq: u64,
    pub op: CommandTag,
    pub status: Status,
    pub fields: Vec<FieldValue>,
}

impl Reply {
    /// Reply to `command` on the shared response path.
    pub fn to(command: &Command, status: Status, fields: Vec<FieldValue>) -> Self {
        Self {
            seq: command.seq,
            op: CommandTag::GetResponse,
            status,
            fields,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct NotificationMessage {
    pub name: String,
    pub body: String,
    pub fields: Vec<FieldValue>,
}

impl NotificationMessage {
    pub fn new(name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: body.into(),
            fields: Vec::new(),
        }
    }
}

/// Invoked on the transport's delivery thread, once per inbound notification.
pub type NotificationHandler = Arc<dyn Fn(&NotificationMessage) + Send + Sync>;

/// One connected command channel.
///
/// Callers must not interleave commands: each `set`/`del` is followed by
/// exactly one `wait` before the next command is issued.
pub trait Channel: Send {
    fn set(&mut self, key: &str, fields: Vec<FieldValue>, command: CommandTag)
    -> Result<(), Error>;
    fn del(&mut self, key: &str, command: CommandTag) -> Result<(), Error>;
    /// Blocks until the next reply arrives. No timeout.
    fn wait(&mut self, command: CommandTag) -> Result<Reply, Error>;
    fn flush(&mut self) -> Result<(), Error>;
}

/// Builds channels bound to a notification handler.
pub trait Transport: Send + Sync {
    fn connect(
        &self,
        buffered: bool,
        handler: NotificationHandler,
    ) -> Result<Box<dyn Channel>, Error>;
}

/// Server side of an in-process channel.
pub trait Backend: Send + Sync + 'static {
    /// Called on the backend thread before the first command.
    fn attach(&self, _link: &BackendLink) {}

    fn handle(&self, command: Command, link: &BackendLink);

    /// Called on the backend thread once the client side closed.
    fn detach(&self) {}
}

enum Delivery {
    Notification(NotificationMessage),
    Stop,
}

#[derive(Clone)]
pub struct BackendLink {
    replies: Sender<Reply>,
    notifications: Sender<Delivery>,
}

impl BackendLink {
    /// Returns false once the client side is gone.
    pub fn reply(&self, reply: Reply) -> bool {
        self.replies.send(reply).is_ok()
    }

    pub fn notify(&self, message: NotificationMessage) -> bool {
        self.notifications
            .send(Delivery::Notification(message))
            .is_ok()
    }
}

pub struct MemoryTransport<B: Backend> {
    backend: Arc<B>,
}

impl<B: Backend> MemoryTransport<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }
}

impl<B: Backend> Transport for MemoryTransport<B> {
    fn connect(
        &self,
        buffered: bool,
        handler: NotificationHandler,
    ) -> Result<Box<dyn Channel>, Error> {
        Ok(Box::new(MemoryChannel::open(
            self.backend.clone(),
            buffered,
            handler,
        )?))
    }
}

pub struct MemoryChannel {
    commands: Option<Sender<Command>>,
    replies: Receiver<Reply>,
    delivery: Sender<Delivery>,
    buffered: bool,
    pending: Vec<Command>,
    next_seq: u64,
    outstanding: Option<u64>,
    backend_thread: Option<JoinHandle<()>>,
    delivery_thread: Option<JoinHandle<()>>,
}

impl MemoryChannel {
    pub fn open<B: Backend>(
        backend: Arc<B>,
        buffered: bool,
        handler: NotificationHandler,
    ) -> Result<Self, Error> {
        let (command_tx, command_rx) = mpsc::channel::<Command>();
        let (reply_tx, reply_rx) = mpsc::channel::<Reply>();
        let (delivery_tx, delivery_rx) = mpsc::channel::<Delivery>();

        let delivery_thread = thread::Builder::new()
            .name("otai-notifications".to_string())
            .spawn(move || run_delivery(delivery_rx, handler))
            .map_err(spawn_error)?;

        let link = BackendLink {
            replies: reply_tx,
            notifications: delivery_tx.clone(),
        };
        let backend_thread = thread::Builder::new()
            .name("otai-backend".to_string())
            .spawn(move || {
                backend.attach(&link);
                while let Ok(command) = command_rx.recv() {
                    backend.handle(command, &link);
                }
                backend.detach();
            });
        let backend_thread = match backend_thread {
            Ok(handle) => handle,
            Err(err) => {
                let _ = delivery_tx.send(Delivery::Stop);
                let _ = delivery_thread.join();
                return Err(spawn_error(err));
            }
        };

        Ok(Self {
            commands: Some(command_tx),
            replies: reply_rx,
            delivery: delivery_tx,
            buffered,
            pending: Vec::new(),
            next_seq: 1,
            outstanding: None,
            backend_thread: Some(backend_thread),
            delivery_thread: Some(delivery_thread),
        })
    }

    fn enqueue(&mut self, op: CommandTag, key: &str, fields: Vec<FieldValue>) -> Result<(), Error> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.outstanding = Some(seq);
        let command = Command {
            seq,
            op,
            key: key.to_string(),
            fields,
        };
        if self.buffered {
            self.pending.push(command);
            return Ok(());
        }
        self.send(command)
    }

    fn send(&self, command: Command) -> Result<(), Error> {
        let sender = self.commands.as_ref().ok_or_else(disconnected)?;
        sender.send(command).map_err(|_| disconnected())
    }
}

impl Channel for MemoryChannel {
    fn set(
        &mut self,
        key: &str,
        fields: Vec<FieldValue>,
        command: CommandTag,
    ) -> Result<(), Error> {
        self.enqueue(command, key, fields)
    }

    fn del(&mut self, key: &str, command: CommandTag) -> Result<(), Error> {
        self.enqueue(command, key, Vec::new())
    }

    fn wait(&mut self, command: CommandTag) -> Result<Reply, Error> {
        self.flush()?;
        let reply = self.replies.recv().map_err(|_| disconnected())?;
        let expected = self.outstanding.take();
        if reply.op != command {
            return Err(Error::new(ErrorKind::ProtocolDesync).with_message(format!(
                "expected {command} reply, got {}",
                reply.op
            )));
        }
        if expected != Some(reply.seq) {
            return Err(Error::new(ErrorKind::ProtocolDesync).with_message(format!(
                "reply sequence {} does not match outstanding command {expected:?}",
                reply.seq
            )));
        }
        Ok(reply)
    }

    fn flush(&mut self) -> Result<(), Error> {
        if self.pending.is_empty() {
            return Ok(());
        }
        debug!(count = self.pending.len(), "flushing buffered commands");
        for command in std::mem::take(&mut self.pending) {
            self.send(command)?;
        }
        Ok(())
    }
}

impl Drop for MemoryChannel {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            warn!(
                count = self.pending.len(),
                "dropping buffered commands on channel close"
            );
        }
        self.commands.take();
        if let Some(handle) = self.backend_thread.take() {
            let _ = handle.join();
        }
        let _ = self.delivery.send(Delivery::Stop);
        if let Some(handle) = self.delivery_thread.take() {
            let _ = handle.join();
        }
    }
}

fn run_delivery(deliveries: Receiver<Delivery>, handler: NotificationHandler) {
    while let Ok(delivery) = deliveries.recv() {
        match delivery {
            Delivery::Notification(message) => handler(&message),
            Delivery::Stop => break,
        }
    }
    debug!("notification delivery stopped");
}

fn disconnected() -> Error {
    Error::new(ErrorKind::Transport).with_message("backend channel disconnected")
}

fn spawn_error(err: std::io::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("failed to spawn channel thread")
        .with_source(err)
}
