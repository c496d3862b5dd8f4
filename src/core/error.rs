// Error modeling shared by the facade, transport, codec, and CLI.
use std::error::Error as StdError;
use std::fmt;

use crate::core::types::Status;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    Failure,
    InsufficientResources,
    NotImplemented,
    BufferOverflow,
    InvalidParameter,
    NotSupported,
    ItemNotFound,
    ItemAlreadyExists,
    NoMemory,
    AlreadyInitialized,
    NotInitialized,
    ProtocolDesync,
    Transport,
    Usage,
    Io,
}

impl ErrorKind {
    /// Kind for a non-success status reported by the backend.
    pub fn from_status(status: Status) -> Self {
        match status {
            Status::Success | Status::Failure | Status::Uninitialized => ErrorKind::Failure,
            Status::NotSupported => ErrorKind::NotSupported,
            Status::NoMemory => ErrorKind::NoMemory,
            Status::InsufficientResources => ErrorKind::InsufficientResources,
            Status::InvalidParameter => ErrorKind::InvalidParameter,
            Status::ItemAlreadyExists => ErrorKind::ItemAlreadyExists,
            Status::ItemNotFound => ErrorKind::ItemNotFound,
            Status::BufferOverflow => ErrorKind::BufferOverflow,
            Status::NotImplemented => ErrorKind::NotImplemented,
        }
    }

    pub fn status(self) -> Status {
        match self {
            ErrorKind::InsufficientResources => Status::InsufficientResources,
            ErrorKind::NotImplemented => Status::NotImplemented,
            ErrorKind::BufferOverflow => Status::BufferOverflow,
            ErrorKind::InvalidParameter | ErrorKind::Usage => Status::InvalidParameter,
            ErrorKind::NotSupported => Status::NotSupported,
            ErrorKind::ItemNotFound => Status::ItemNotFound,
            ErrorKind::ItemAlreadyExists => Status::ItemAlreadyExists,
            ErrorKind::NoMemory => Status::NoMemory,
            ErrorKind::Failure
            | ErrorKind::AlreadyInitialized
            | ErrorKind::NotInitialized
            | ErrorKind::ProtocolDesync
            | ErrorKind::Transport
            | ErrorKind::Io => Status::Failure,
        }
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    key: Option<String>,
    status: Option<Status>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            key: None,
            status: None,
            source: None,
        }
    }

    /// Error for a reply that carried a non-success status.
    pub fn from_status(status: Status) -> Self {
        Self::new(ErrorKind::from_status(status)).with_status(status)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Wire status equivalent of this error. A status reported by the
    /// backend wins over the one derived from the kind.
    pub fn status(&self) -> Status {
        self.status.unwrap_or_else(|| self.kind.status())
    }

    /// Client and backend have diverged; the session cannot be trusted.
    pub fn is_fatal(&self) -> bool {
        self.kind == ErrorKind::ProtocolDesync
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(key) = &self.key {
            write!(f, " (key: {key})")?;
        }
        if let Some(status) = self.status {
            write!(f, " (status: {})", status.as_str())?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Failure => 1,
        ErrorKind::Usage => 2,
        ErrorKind::ItemNotFound => 3,
        ErrorKind::ItemAlreadyExists => 4,
        ErrorKind::InsufficientResources | ErrorKind::NoMemory => 5,
        ErrorKind::InvalidParameter => 6,
        ErrorKind::NotImplemented | ErrorKind::NotSupported => 7,
        ErrorKind::BufferOverflow => 8,
        ErrorKind::AlreadyInitialized | ErrorKind::NotInitialized => 9,
        ErrorKind::Transport | ErrorKind::Io => 10,
        ErrorKind::ProtocolDesync => 70,
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, ErrorKind, to_exit_code};
    use crate::core::types::Status;

    #[test]
    fn exit_code_mapping_is_stable() {
        let cases = [
            (ErrorKind::Failure, 1),
            (ErrorKind::Usage, 2),
            (ErrorKind::ItemNotFound, 3),
            (ErrorKind::ItemAlreadyExists, 4),
            (ErrorKind::InsufficientResources, 5),
            (ErrorKind::InvalidParameter, 6),
            (ErrorKind::NotImplemented, 7),
            (ErrorKind::BufferOverflow, 8),
            (ErrorKind::NotInitialized, 9),
            (ErrorKind::Transport, 10),
            (ErrorKind::ProtocolDesync, 70),
        ];

        for (kind, code) in cases {
            assert_eq!(to_exit_code(kind), code);
        }
    }

    #[test]
    fn lifecycle_errors_report_failure_status() {
        assert_eq!(Error::new(ErrorKind::AlreadyInitialized).status(), Status::Failure);
        assert_eq!(Error::new(ErrorKind::NotInitialized).status(), Status::Failure);
    }

    #[test]
    fn backend_status_is_preserved() {
        let err = Error::from_status(Status::Uninitialized);
        assert_eq!(err.kind(), ErrorKind::Failure);
        assert_eq!(err.status(), Status::Uninitialized);
        assert!(!err.is_fatal());
    }

    #[test]
    fn only_desync_is_fatal() {
        assert!(Error::new(ErrorKind::ProtocolDesync).is_fatal());
        assert!(!Error::new(ErrorKind::BufferOverflow).is_fatal());
        assert!(!Error::new(ErrorKind::Transport).is_fatal());
    }

    #[test]
    fn display_includes_key_and_status() {
        let err = Error::from_status(Status::ItemNotFound)
            .with_message("remove rejected")
            .with_key("OTAI_OBJECT_TYPE_PORT:oid:0x2000000000001");
        let text = err.to_string();
        assert!(text.starts_with("ItemNotFound: remove rejected"));
        assert!(text.contains("(key: OTAI_OBJECT_TYPE_PORT:oid:0x2000000000001)"));
        assert!(text.contains("(status: OTAI_STATUS_ITEM_NOT_FOUND)"));
    }
}
