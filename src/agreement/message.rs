use std::fmt;

use serde::Deserialize;
use sha2::{Digest as ShaDigest, Sha512};

use super::{chain::SignatureChain, peers::NodeId};
use crate::common::crypto::Digest;

/*
    Mode A carries a value together with the chain of signatures of every
    node that relayed it, starting with the general. Mode B carries bare
    ballots; the sender is known from the authenticated point-to-point link.
*/

pub type Round = u32;

const VALUE_DOMAIN: &[u8] = b"byzantine-agreement/value/v1";

pub trait Hashable {
    fn hash(&self) -> Digest;
}

/// The value under agreement. Ordering is the tie-break order: on a plurality
/// tie the lowest value wins, so `Reject` (bit 0) beats `Accept` (bit 1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Reject,
    Accept,
}

impl Value {
    pub const ALL: [Value; 2] = [Value::Reject, Value::Accept];

    pub fn from_bit(bit: bool) -> Self {
        if bit {
            Value::Accept
        } else {
            Value::Reject
        }
    }

    pub fn as_bit(&self) -> u8 {
        match self {
            Value::Reject => 0,
            Value::Accept => 1,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Reject => write!(f, "REJECT"),
            Value::Accept => write!(f, "ACCEPT"),
        }
    }
}

impl std::str::FromStr for Value {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "accept" | "1" => Ok(Value::Accept),
            "reject" | "0" => Ok(Value::Reject),
            other => Err(format!("unknown value '{other}', expected accept or reject")),
        }
    }
}

impl Hashable for Value {
    /// Binds a signature to the serialized value alone, never to the round
    /// or the sender.
    fn hash(&self) -> Digest {
        let mut hasher = Sha512::new();
        hasher.update(VALUE_DOMAIN);
        hasher.update([self.as_bit()]);
        let result = hasher.finalize();
        let mut digest = [0u8; 64];
        digest.copy_from_slice(&result[..]);
        digest
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum MessageKind {
    Init,
    Vote,
    Echo,
    Decide,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Init => "INIT",
            MessageKind::Vote => "VOTE",
            MessageKind::Echo => "ECHO",
            MessageKind::Decide => "DECIDE",
        };
        f.write_str(name)
    }
}

/// A value travelling through the flooding protocol at a given pulse.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Relay {
    pub value: Value,
    pub round: Round,
    pub chain: SignatureChain,
}

/// An echo names the node whose vote it repeats.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Echo {
    pub origin: NodeId,
    pub value: Value,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Message {
    /// Mode A: the general's initial broadcast (round 0) and every relay.
    Relay(Relay),
    /// Mode B: a node announces its initial vote.
    Init(Value),
    Vote(Value),
    Echo(Echo),
    Decide(Value),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Relay(relay) if relay.round == 0 => MessageKind::Init,
            Message::Relay(_) => MessageKind::Echo,
            Message::Init(_) => MessageKind::Init,
            Message::Vote(_) => MessageKind::Vote,
            Message::Echo(_) => MessageKind::Echo,
            Message::Decide(_) => MessageKind::Decide,
        }
    }

    pub fn value(&self) -> Value {
        match self {
            Message::Relay(relay) => relay.value,
            Message::Init(value) | Message::Vote(value) | Message::Decide(value) => *value,
            Message::Echo(echo) => echo.value,
        }
    }

    pub fn round(&self) -> Round {
        match self {
            Message::Relay(relay) => relay.round,
            _ => 0,
        }
    }

    pub fn chain(&self) -> Option<&SignatureChain> {
        match self {
            Message::Relay(relay) => Some(&relay.chain),
            _ => None,
        }
    }
}

/// A message in flight from one node's mailbox to another.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Envelope {
    pub from: NodeId,
    pub to: NodeId,
    pub message: Message,
}

impl Envelope {
    pub fn new(from: NodeId, to: NodeId, message: Message) -> Self {
        Envelope { from, to, message }
    }
}
