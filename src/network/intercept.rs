use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::MessageBus;
use crate::agreement::{Envelope, NodeId};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Delivery {
    Deliver,
    Drop,
    /// Hand the envelope over after the given delay. Later envelopes on the
    /// same link may overtake it.
    Delay(Duration),
}

/// Decides the fate of each envelope before it reaches the inner bus.
pub trait Interceptor: Send {
    fn intercept(&mut self, envelope: &Envelope) -> Delivery;
}

impl<F> Interceptor for F
where
    F: FnMut(&Envelope) -> Delivery + Send,
{
    fn intercept(&mut self, envelope: &Envelope) -> Delivery {
        self(envelope)
    }
}

/// Scripted per-link faults: dropped links and delayed links.
#[derive(Debug, Clone, Default)]
pub struct LinkFaults {
    dropped: HashSet<(NodeId, NodeId)>,
    delayed: HashMap<(NodeId, NodeId), Duration>,
}

impl LinkFaults {
    pub fn new() -> Self {
        LinkFaults::default()
    }

    pub fn drop_link(mut self, from: NodeId, to: NodeId) -> Self {
        self.dropped.insert((from, to));
        self
    }

    pub fn delay_link(mut self, from: NodeId, to: NodeId, by: Duration) -> Self {
        self.delayed.insert((from, to), by);
        self
    }
}

impl Interceptor for LinkFaults {
    fn intercept(&mut self, envelope: &Envelope) -> Delivery {
        let link = (envelope.from, envelope.to);
        if self.dropped.contains(&link) {
            return Delivery::Drop;
        }
        match self.delayed.get(&link) {
            Some(&by) => Delivery::Delay(by),
            None => Delivery::Deliver,
        }
    }
}

/// Bus wrapper that runs every envelope through an [`Interceptor`].
/// Delayed delivery needs a running tokio runtime.
pub struct InterceptBus<B> {
    inner: Arc<B>,
    interceptor: Mutex<Box<dyn Interceptor>>,
}

impl<B: MessageBus + 'static> InterceptBus<B> {
    pub fn new(inner: B, interceptor: Box<dyn Interceptor>) -> Self {
        InterceptBus {
            inner: Arc::new(inner),
            interceptor: Mutex::new(interceptor),
        }
    }
}

impl<B: MessageBus + 'static> MessageBus for InterceptBus<B> {
    fn send(&self, envelope: Envelope) {
        let delivery = self
            .interceptor
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .intercept(&envelope);

        match delivery {
            Delivery::Deliver => self.inner.send(envelope),
            Delivery::Drop => {
                tracing::trace!(from = envelope.from, to = envelope.to, "intercepted, dropping");
            }
            Delivery::Delay(by) => {
                let inner = Arc::clone(&self.inner);
                tokio::spawn(async move {
                    tokio::time::sleep(by).await;
                    inner.send(envelope);
                });
            }
        }
    }
}
