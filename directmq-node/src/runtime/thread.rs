use std::{fmt, io, thread};

use directmq::message::NodeId;

/// Spawn a named OS thread.
pub fn spawn<D, F, T>(nid: &NodeId, label: D, f: F) -> io::Result<thread::JoinHandle<T>>
where
    D: fmt::Display,
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new().name(name(nid, label)).spawn(f)
}

pub fn name<D: fmt::Display>(nid: &NodeId, label: D) -> String {
    if cfg!(debug_assertions) {
        format!("{nid} {:<14}", format!("<{label}>"))
    } else {
        format!("{label}")
    }
}
