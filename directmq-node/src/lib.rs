#![cfg_attr(not(test), warn(clippy::unwrap_used))]

pub mod api;
pub mod config;
pub mod edge;
pub mod node;
pub mod portal;
pub mod router;
pub mod runtime;
pub mod subscription;
#[cfg(test)]
pub mod tests;

pub use node::Node;
pub use runtime::Runtime;

pub mod prelude {
    pub use crate::api::Diagnostics;
    pub use crate::config::Config;
    pub use crate::edge::{EdgeId, State};
    pub use crate::node::Node;
    pub use crate::runtime::{Handle, HandleError, Runtime};
    pub use crate::subscription::SubscriptionId;
    pub use directmq::prelude::*;
}
