// Core modules: object model, identifiers, codec, channel, and errors.
pub mod channel;
pub mod codec;
pub mod error;
pub mod linecard;
pub mod notification;
pub mod types;
pub mod vid;
