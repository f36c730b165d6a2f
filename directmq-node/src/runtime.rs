//! Threaded TCP runtime.
//!
//! The node lives on the thread that calls [`Runtime::run`]. Everything else
//! talks to it through a [`Handle`], which queues commands on a channel that
//! only the node's thread reads. Each connection gets a reader thread that
//! forwards packets as they arrive, and each listener gets an accept thread.
//! Subscription handlers run on threads of their own, so they may use a
//! [`Handle`] too.
pub mod handle;
pub mod thread;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt, io, net, thread as std_thread};

use crossbeam_channel as chan;
use log::*;

use directmq::message::{DeliveryStrategy, NodeId};

use crate::api;
use crate::api::native::Handler;
use crate::config::Config;
use crate::edge::EdgeId;
use crate::node::Node;
use crate::portal::tcp::{self, TcpPortal};
use crate::subscription::SubscriptionId;

pub use handle::Error as HandleError;
pub use handle::Handle;

/// A runtime error.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Commands sent to the node's thread.
pub enum Command {
    Publish {
        topic: String,
        payload: Vec<u8>,
        delivery_strategy: DeliveryStrategy,
        reply: chan::Sender<Result<(), api::Error>>,
    },
    Subscribe {
        pattern: String,
        handler: Handler,
        reply: chan::Sender<Result<SubscriptionId, api::Error>>,
    },
    Unsubscribe(SubscriptionId),
    /// Add an edge for a TCP connection.
    Attach {
        stream: net::TcpStream,
        initiator: bool,
    },
    /// A packet arrived on an edge's connection.
    Received(EdgeId, Vec<u8>),
    /// An edge's connection was closed from the other side.
    Closed(EdgeId, String),
    BridgedNodeIds(chan::Sender<Vec<NodeId>>),
    SubscribedTopics(chan::Sender<Vec<String>>),
    Shutdown {
        reason: String,
        reply: chan::Sender<()>,
    },
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish { topic, payload, .. } => {
                write!(f, "Publish({topic}, {} byte(s))", payload.len())
            }
            Self::Subscribe { pattern, .. } => write!(f, "Subscribe({pattern})"),
            Self::Unsubscribe(id) => write!(f, "Unsubscribe({id})"),
            Self::Attach { stream, initiator } => {
                write!(f, "Attach({:?}, initiator = {initiator})", stream.peer_addr())
            }
            Self::Received(edge, packet) => write!(f, "Received({edge}, {} byte(s))", packet.len()),
            Self::Closed(edge, reason) => write!(f, "Closed({edge}, {reason})"),
            Self::BridgedNodeIds(_) => write!(f, "BridgedNodeIds"),
            Self::SubscribedTopics(_) => write!(f, "SubscribedTopics"),
            Self::Shutdown { reason, .. } => write!(f, "Shutdown({reason})"),
        }
    }
}

/// Runs a node over TCP.
#[derive(Debug)]
pub struct Runtime {
    node: Node<TcpPortal>,
    handle: Handle,
    commands: chan::Receiver<Command>,
    listeners: Vec<net::TcpListener>,
    /// Tells accept threads to stop.
    stopping: Arc<AtomicBool>,
}

impl Runtime {
    /// Bind the configured listen addresses. Nothing else happens until
    /// [`Runtime::run`] is called.
    pub fn init(config: Config) -> Result<Self, Error> {
        let listeners = config
            .listen
            .iter()
            .map(net::TcpListener::bind)
            .collect::<Result<Vec<_>, _>>()?;
        let (sender, commands) = chan::unbounded();
        let handle = Handle::new(config.host_id.clone(), sender);
        let node = Node::new(config, fastrand::Rng::new());

        Ok(Self {
            node,
            handle,
            commands,
            listeners,
            stopping: Arc::default(),
        })
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Addresses we're listening on.
    pub fn local_addrs(&self) -> io::Result<Vec<net::SocketAddr>> {
        self.listeners.iter().map(|l| l.local_addr()).collect()
    }

    /// Run until the node is shut down through a [`Handle`].
    pub fn run(mut self) -> Result<(), Error> {
        let id = self.node.id().clone();
        let mut acceptors = Vec::new();

        for listener in self.listeners.drain(..) {
            let addr = listener.local_addr()?;
            let handle = self.handle.clone();
            let stopping = self.stopping.clone();

            info!(target: "runtime", "Listening on {addr}");

            let acceptor = thread::spawn(&id, "accept", move || accept(listener, handle, stopping));
            match acceptor {
                Ok(acceptor) => acceptors.push((addr, acceptor)),
                Err(e) => {
                    stop(&self.stopping, acceptors);
                    return Err(e.into());
                }
            }
        }
        for addr in self.node.config().connect.clone() {
            match net::TcpStream::connect(addr) {
                Ok(stream) => self.attach(stream, true),
                Err(e) => warn!(target: "runtime", "Failed to connect to {addr}: {e}"),
            }
        }
        info!(target: "runtime", "Running node {id}");

        while let Ok(cmd) = self.commands.recv() {
            trace!(target: "runtime", "Received command {cmd:?}");

            match cmd {
                Command::Publish {
                    topic,
                    payload,
                    delivery_strategy,
                    reply,
                } => {
                    let result = self.node.publish(&topic, payload, delivery_strategy);
                    reply.send(result).ok();
                }
                Command::Subscribe {
                    pattern,
                    handler,
                    reply,
                } => {
                    let result = self.node.subscribe(&pattern, handler);
                    reply.send(result).ok();
                }
                Command::Unsubscribe(id) => self.node.unsubscribe(id),
                Command::Attach { stream, initiator } => self.attach(stream, initiator),
                Command::Received(edge, packet) => {
                    self.node.process_incoming_packet(edge, &packet);
                }
                Command::Closed(edge, reason) => {
                    self.node.remove_edge(edge, reason);
                }
                Command::BridgedNodeIds(reply) => {
                    reply.send(self.node.bridged_node_ids()).ok();
                }
                Command::SubscribedTopics(reply) => {
                    let topics = self
                        .node
                        .subscribed_topics()
                        .iter()
                        .map(|t| t.to_string())
                        .collect();
                    reply.send(topics).ok();
                }
                Command::Shutdown { reason, reply } => {
                    self.node.close_node(reason, move || {
                        reply.send(()).ok();
                    });
                    break;
                }
            }
        }
        stop(&self.stopping, acceptors);

        info!(target: "runtime", "Node {id} stopped");

        Ok(())
    }

    /// Add an edge for a connection and start reading from it.
    fn attach(&mut self, stream: net::TcpStream, initiator: bool) {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| String::from("unknown"));
        let reader = match stream.try_clone() {
            Ok(reader) => reader,
            Err(e) => {
                warn!(target: "runtime", "Failed to attach connection to {peer}: {e}");
                return;
            }
        };
        let edge = if initiator {
            self.node.add_connecting_edge(TcpPortal::new(stream))
        } else {
            self.node.add_listening_edge(TcpPortal::new(stream))
        };
        debug!(target: "runtime", "Attached connection to {peer} as {edge}");

        let handle = self.handle.clone();
        if let Err(e) = thread::spawn(self.node.id(), edge, move || read(edge, reader, handle)) {
            self.node.remove_edge(edge, format!("Failed to start reader: {e}"));
        }
    }
}

/// Stop the accept threads and wait for them to release their listeners.
fn stop(stopping: &AtomicBool, acceptors: Vec<(net::SocketAddr, std_thread::JoinHandle<()>)>) {
    stopping.store(true, Ordering::SeqCst);

    for (addr, thread) in acceptors {
        // Wake the thread up, it's blocked on `accept`.
        let wake = if addr.ip().is_unspecified() {
            let localhost: net::IpAddr = if addr.is_ipv4() {
                net::Ipv4Addr::LOCALHOST.into()
            } else {
                net::Ipv6Addr::LOCALHOST.into()
            };
            net::SocketAddr::new(localhost, addr.port())
        } else {
            addr
        };
        if let Err(e) = net::TcpStream::connect(wake) {
            warn!(target: "runtime", "Failed to stop listener on {addr}: {e}");
            continue;
        }
        if thread.join().is_err() {
            error!(target: "runtime", "Listener thread on {addr} panicked");
        }
    }
}

/// Accept connections until the runtime stops or the node goes away.
fn accept(listener: net::TcpListener, handle: Handle, stopping: Arc<AtomicBool>) {
    for stream in listener.incoming() {
        if stopping.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                if handle.accept(stream).is_err() {
                    break;
                }
            }
            Err(e) => warn!(target: "runtime", "Failed to accept connection: {e}"),
        }
    }
}

/// Hand every packet read from a connection to the node.
fn read(edge: EdgeId, mut reader: net::TcpStream, handle: Handle) {
    loop {
        let reason = match tcp::read_packet(&mut reader) {
            Ok(Some(packet)) => {
                if handle.received(edge, packet).is_err() {
                    return;
                }
                continue;
            }
            Ok(None) => String::from("Connection closed by peer"),
            Err(e) => format!("Connection error: {e}"),
        };
        trace!(target: "runtime", "Reader of {edge} stopping: {reason}");

        handle.closed(edge, reason).ok();
        return;
    }
}
