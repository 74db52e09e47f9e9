pub mod audit;
pub mod intercept;
pub mod node;
pub mod simulation;

pub use audit::*;
pub use intercept::*;
pub use node::*;
pub use simulation::*;

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::agreement::{Envelope, Message, NodeId};

/*
    Network communication is point-to-point, authenticated and reliable:
    a correct node receives a message from another correct node if and only
    if the latter sent it. Delivery on each sender-to-receiver link is FIFO;
    nothing is promised about the order of messages from different senders.
    A broadcast is the sender putting the same point-to-point message on
    every link, its own included.
*/

/// Fire-and-forget delivery into node mailboxes. Sending never blocks.
pub trait MessageBus: Send + Sync {
    fn send(&self, envelope: Envelope);

    fn broadcast(&self, from: NodeId, recipients: &[NodeId], message: &Message) {
        for &to in recipients {
            self.send(Envelope::new(from, to, message.clone()));
        }
    }
}

/// One unbounded channel per node.
#[derive(Debug, Clone)]
pub struct ChannelBus {
    senders: HashMap<NodeId, UnboundedSender<Envelope>>,
}

impl ChannelBus {
    /// Builds the bus and the matching mailboxes, in `ids` order.
    pub fn new(ids: impl IntoIterator<Item = NodeId>) -> (Self, Vec<Mailbox>) {
        let mut senders = HashMap::new();
        let mut mailboxes = Vec::new();
        for id in ids {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(id, tx);
            mailboxes.push(Mailbox { id, rx });
        }
        (ChannelBus { senders }, mailboxes)
    }
}

impl MessageBus for ChannelBus {
    fn send(&self, envelope: Envelope) {
        let Some(tx) = self.senders.get(&envelope.to) else {
            tracing::debug!(to = envelope.to, "no mailbox for recipient, dropping");
            return;
        };
        if tx.send(envelope).is_err() {
            // The recipient already terminated.
            tracing::trace!("mailbox closed, dropping");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Received {
    Message(Envelope),
    TimedOut,
    Closed,
}

/// Receiving half of a node's channel.
#[derive(Debug)]
pub struct Mailbox {
    id: NodeId,
    rx: UnboundedReceiver<Envelope>,
}

impl Mailbox {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Envelope> {
        self.rx.recv().await
    }

    /// Next queued envelope, without waiting.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.rx.try_recv().ok()
    }

    /// Waits at most `wait` for the next envelope.
    pub async fn recv_timeout(&mut self, wait: Duration) -> Received {
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(envelope)) => Received::Message(envelope),
            Ok(None) => Received::Closed,
            Err(_) => Received::TimedOut,
        }
    }
}
