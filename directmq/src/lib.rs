#![cfg_attr(not(test), warn(clippy::unwrap_used))]

pub mod message;
pub mod topic;
pub mod wire;

#[cfg(feature = "logger")]
pub mod logger;

pub mod prelude {
    pub use crate::message::{DataFrame, DeliveryStrategy, Message, NodeId, Ttl};
    pub use crate::wire::{Binary, Codec};
}
