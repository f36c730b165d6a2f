use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::{fmt, io, net};

use crossbeam_channel as chan;
use thiserror::Error;

use directmq::message::{DeliveryStrategy, NodeId};

use crate::api;
use crate::edge::EdgeId;
use crate::runtime::{thread, Command};
use crate::subscription::SubscriptionId;

/// An error resulting from a handle method.
#[derive(Error, Debug)]
pub enum Error {
    /// The command channel is no longer connected.
    #[error("command channel is not connected")]
    ChannelDisconnected,
    /// The command returned an error.
    #[error("command failed: {0}")]
    Command(#[from] api::Error),
    /// An I/O error occured.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<chan::RecvError> for Error {
    fn from(_: chan::RecvError) -> Self {
        Self::ChannelDisconnected
    }
}

impl<T> From<chan::SendError<T>> for Error {
    fn from(_: chan::SendError<T>) -> Self {
        Self::ChannelDisconnected
    }
}

/// Talks to a running node from any thread.
#[derive(Clone)]
pub struct Handle {
    id: NodeId,
    commands: chan::Sender<Command>,
    /// Whether a shutdown was initiated or not. Prevents attempting to shutdown twice.
    shutdown: Arc<AtomicBool>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

impl Handle {
    pub(crate) fn new(id: NodeId, commands: chan::Sender<Command>) -> Self {
        Self {
            id,
            commands,
            shutdown: Arc::default(),
        }
    }

    /// Id of the node behind this handle.
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn publish(
        &self,
        topic: impl ToString,
        payload: impl Into<Vec<u8>>,
        delivery_strategy: DeliveryStrategy,
    ) -> Result<(), Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::Publish {
            topic: topic.to_string(),
            payload: payload.into(),
            delivery_strategy,
            reply,
        })?;
        receiver.recv()??;

        Ok(())
    }

    /// Subscribe to a pattern.
    ///
    /// The handler runs on a thread of its own, one publication at a time, so
    /// it may call back into the node through a [`Handle`]. The thread exits
    /// once the subscription is gone.
    pub fn subscribe(
        &self,
        pattern: impl ToString,
        mut handler: impl FnMut(&str, &[u8]) + Send + 'static,
    ) -> Result<SubscriptionId, Error> {
        let pattern = pattern.to_string();
        let (deliveries, pending) = chan::unbounded::<(String, Vec<u8>)>();

        thread::spawn(&self.id, "handler", move || {
            for (topic, payload) in pending {
                handler(&topic, &payload);
            }
        })?;

        let (reply, receiver) = chan::bounded(1);
        self.command(Command::Subscribe {
            pattern,
            handler: Box::new(move |topic: &str, payload: &[u8]| {
                deliveries.send((topic.to_owned(), payload.to_vec())).ok();
            }),
            reply,
        })?;
        let id = receiver.recv()??;

        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> Result<(), Error> {
        self.command(Command::Unsubscribe(id))
    }

    /// Dial a peer and bridge with it.
    pub fn connect(&self, addr: net::SocketAddr) -> Result<(), Error> {
        let stream = net::TcpStream::connect(addr)?;

        self.command(Command::Attach {
            stream,
            initiator: true,
        })
    }

    /// Bridge with a peer that dialed us.
    pub fn accept(&self, stream: net::TcpStream) -> Result<(), Error> {
        self.command(Command::Attach {
            stream,
            initiator: false,
        })
    }

    /// Ids of the nodes we're bridged with.
    pub fn bridged_node_ids(&self) -> Result<Vec<NodeId>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::BridgedNodeIds(reply))?;

        receiver.recv().map_err(Error::from)
    }

    /// Every pattern routed through the node.
    pub fn subscribed_topics(&self) -> Result<Vec<String>, Error> {
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::SubscribedTopics(reply))?;

        receiver.recv().map_err(Error::from)
    }

    /// Close every edge and stop the runtime. Returns once the node is closed.
    pub fn shutdown(&self, reason: impl ToString) -> Result<(), Error> {
        // Only the first call goes through.
        if self
            .shutdown
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }
        let (reply, receiver) = chan::bounded(1);
        self.command(Command::Shutdown {
            reason: reason.to_string(),
            reply,
        })?;
        receiver.recv()?;

        Ok(())
    }

    pub(crate) fn received(&self, edge: EdgeId, packet: Vec<u8>) -> Result<(), Error> {
        self.command(Command::Received(edge, packet))
    }

    pub(crate) fn closed(&self, edge: EdgeId, reason: impl ToString) -> Result<(), Error> {
        self.command(Command::Closed(edge, reason.to_string()))
    }

    fn command(&self, cmd: Command) -> Result<(), Error> {
        self.commands.send(cmd).map_err(Error::from)
    }
}
