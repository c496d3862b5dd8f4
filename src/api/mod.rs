//! Purpose: Define the public Rust API boundary for the remote OTAI interface.
//! Exports: The facade, its locking and notification types, and the core types callers need.
//! Role: Public, additive-only surface; hides dispatch internals.
//! Invariants: Callers reach the backend only through `RemoteInterface`.

mod dispatch;
mod interface;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::notification::{
    MetadataValidator, Notification, NotificationFactory, NotificationKind,
};
pub use crate::core::types::{
    AttrId, AttrValue, Attribute, NotificationCallback, ObjectId, ObjectType, StatId, StatValue,
    StatsMode, Status, linecard_attr,
};
pub use dispatch::{ApiGuard, ApiLock, PendingNotification};
pub use interface::{RemoteInterface, is_extension_attribute, object_key};
