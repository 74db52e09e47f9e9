use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use super::{message::Value, peers::NodeId};

/// The point in a protocol where a Byzantine node emits a value.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    /// Flooding general's round-0 broadcast.
    Propose,
    /// Flooding relay of a received chain.
    Relay,
    Init,
    Vote,
    Echo,
    Decide,
}

/// Adversary behaviour of a Byzantine node, asked once per outgoing message
/// and recipient. `honest` is what a correct node would send; returning
/// `None` withholds the message from that recipient.
///
/// Strategies can substitute any value but never sign for another node, so
/// a substituted flooding relay is caught by chain validation downstream.
pub trait FaultStrategy: Send {
    fn corrupt(&mut self, phase: Phase, honest: Value, to: NodeId) -> Option<Value>;
}

/// Follows the protocol. Useful as a control in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct Faithful;

impl FaultStrategy for Faithful {
    fn corrupt(&mut self, _phase: Phase, honest: Value, _to: NodeId) -> Option<Value> {
        Some(honest)
    }
}

/// Sends nothing at all, like a crashed node.
#[derive(Debug, Default, Clone, Copy)]
pub struct Silent;

impl FaultStrategy for Silent {
    fn corrupt(&mut self, _phase: Phase, _honest: Value, _to: NodeId) -> Option<Value> {
        None
    }
}

/// Tells each peer a scripted value. Peers missing from the table get
/// `fallback`, or nothing when it is `None`.
#[derive(Debug, Clone, Default)]
pub struct Equivocate {
    assignments: BTreeMap<NodeId, Value>,
    fallback: Option<Value>,
}

impl Equivocate {
    pub fn new() -> Self {
        Equivocate::default()
    }

    /// `x` to every peer in `to_x`, `y` to everyone else.
    pub fn split(x: Value, y: Value, to_x: impl IntoIterator<Item = NodeId>) -> Self {
        Equivocate {
            assignments: to_x.into_iter().map(|id| (id, x)).collect(),
            fallback: Some(y),
        }
    }

    pub fn tell(mut self, to: NodeId, value: Value) -> Self {
        self.assignments.insert(to, value);
        self
    }

    pub fn otherwise(mut self, value: Option<Value>) -> Self {
        self.fallback = value;
        self
    }
}

impl FaultStrategy for Equivocate {
    fn corrupt(&mut self, _phase: Phase, _honest: Value, to: NodeId) -> Option<Value> {
        self.assignments.get(&to).copied().or(self.fallback)
    }
}

/// An independent coin flip per message and recipient, from a seeded
/// generator so a run can be replayed.
#[derive(Debug, Clone)]
pub struct RandomFault {
    rng: ChaCha8Rng,
}

impl RandomFault {
    pub fn seeded(seed: u64) -> Self {
        RandomFault {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl FaultStrategy for RandomFault {
    fn corrupt(&mut self, _phase: Phase, _honest: Value, _to: NodeId) -> Option<Value> {
        Some(Value::from_bit(self.rng.gen()))
    }
}
