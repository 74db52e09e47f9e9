use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;

use super::{
    fault::{FaultStrategy, Phase},
    flooding::FloodingState,
    message::{Envelope, Message, Round, Value},
    peers::{NodeId, NodeIdentity, Role, Roster},
    threshold::{Tally, Thresholds},
    vote_echo::VoteEchoState,
};
use crate::{
    common::{
        config::{ProtocolMode, RunConfig},
        crypto::Keypair,
        error::ConfigResult,
    },
    network::{AuditRecord, AuditSink, Mailbox, MessageBus, Node, Received},
};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DecisionState {
    Undecided,
    Decided,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Termination {
    /// Left the loop with a decision.
    Decided,
    /// Gave up waiting while still undecided: a liveness failure.
    TimedOut,
    /// The bus went away under the node.
    Closed,
}

/// Private to one node, touched only by its own handlers.
#[derive(Debug)]
pub struct NodeState {
    pub decision_state: DecisionState,
    pub decided_value: Option<Value>,
    pub own_vote: Value,
    /// Flooding: values accepted per round, at most one per relayer and value.
    pub round_log: BTreeMap<Round, Vec<Value>>,
    /// Vote-echo: origins whose vote is confirmed, per value.
    pub echo_counts: Tally,
    /// Vote-echo: Decide messages per value, one per sender.
    pub decide_counts: Tally,
    pub observed_consensus: Option<Value>,
    pub flooding: FloodingState,
    pub vote_echo: VoteEchoState,
}

impl NodeState {
    fn new(own_vote: Value) -> Self {
        NodeState {
            decision_state: DecisionState::Undecided,
            decided_value: None,
            own_vote,
            round_log: BTreeMap::new(),
            echo_counts: Tally::new(),
            decide_counts: Tally::new(),
            observed_consensus: None,
            flooding: FloodingState::default(),
            vote_echo: VoteEchoState::default(),
        }
    }
}

/// What the harness reads back once a node has stopped.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct NodeOutcome {
    pub id: NodeId,
    pub is_byzantine: bool,
    pub role: Role,
    /// Initial vote, or the general's proposal in flooding mode.
    pub own_vote: Value,
    pub decision_state: DecisionState,
    pub decided_value: Option<Value>,
    pub termination: Termination,
    pub observed_consensus: Option<Value>,
}

pub struct AgreementNode {
    pub(super) identity: NodeIdentity,
    pub(super) keypair: Keypair,
    pub(super) roster: Arc<Roster>,
    pub(super) config: Arc<RunConfig>,
    pub(super) thresholds: Thresholds,
    pub(super) bus: Arc<dyn MessageBus>,
    pub(super) mailbox: Mailbox,
    pub(super) fault: Option<Box<dyn FaultStrategy>>,
    pub(super) audit: Option<Arc<dyn AuditSink>>,
    pub(super) epoch: Instant,
    pub(super) state: NodeState,
}

impl AgreementNode {
    pub fn new(
        node: Node,
        roster: Arc<Roster>,
        config: Arc<RunConfig>,
        bus: Arc<dyn MessageBus>,
        mailbox: Mailbox,
        own_vote: Value,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let thresholds = Thresholds::new(config.nodes, config.faulty)?;

        Ok(AgreementNode {
            identity: node.identity,
            keypair: node.keypair,
            roster,
            config,
            thresholds,
            bus,
            mailbox,
            fault: None,
            audit: None,
            epoch: Instant::now(),
            state: NodeState::new(own_vote),
        })
    }

    /// Installs the adversary behaviour consulted on every outgoing value.
    pub fn with_fault(mut self, fault: Box<dyn FaultStrategy>) -> Self {
        self.fault = Some(fault);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Common start instant that flooding pulses are measured from.
    pub fn with_epoch(mut self, epoch: Instant) -> Self {
        self.epoch = epoch;
        self
    }

    pub fn id(&self) -> NodeId {
        self.identity.id
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub async fn run(mut self) -> NodeOutcome {
        tracing::debug!(
            node = self.id(),
            byzantine = self.identity.is_byzantine,
            mode = ?self.config.mode,
            "starting agreement node"
        );

        let termination = match self.config.mode {
            ProtocolMode::Flooding => self.run_flooding().await,
            ProtocolMode::VoteEcho => self.run_vote_echo().await,
        };

        if termination == Termination::TimedOut {
            tracing::warn!(node = self.id(), "liveness failure: timed out while undecided");
        }

        self.outcome(termination)
    }

    pub fn outcome(&self, termination: Termination) -> NodeOutcome {
        NodeOutcome {
            id: self.identity.id,
            is_byzantine: self.identity.is_byzantine,
            role: self.identity.role,
            own_vote: self.state.own_vote,
            decision_state: self.state.decision_state,
            decided_value: self.state.decided_value,
            termination,
            observed_consensus: self.state.observed_consensus,
        }
    }

    /// Handles one envelope to completion.
    pub(super) fn handle(&mut self, envelope: Envelope) {
        if let Some(audit) = &self.audit {
            audit.record(AuditRecord::from(&envelope));
        }

        let from = envelope.from;
        match (self.config.mode, envelope.message) {
            (ProtocolMode::Flooding, Message::Relay(relay)) => self.on_relay(from, relay),
            (ProtocolMode::VoteEcho, Message::Init(value)) => self.on_init(from, value),
            (ProtocolMode::VoteEcho, Message::Vote(value)) => self.on_vote(from, value),
            (ProtocolMode::VoteEcho, Message::Echo(echo)) => self.on_echo(from, echo),
            (ProtocolMode::VoteEcho, Message::Decide(value)) => self.on_decide(from, value),
            (mode, message) => {
                tracing::debug!(
                    node = self.id(),
                    from,
                    ?mode,
                    kind = %message.kind(),
                    "message does not belong to this protocol, dropping"
                );
            }
        }
    }

    /// Keeps handling messages until the mailbox stays quiet for the receive
    /// timeout.
    pub(super) async fn drain_until_quiet(&mut self) -> Termination {
        let wait = self.config.receive_timeout();
        loop {
            match self.mailbox.recv_timeout(wait).await {
                Received::Message(envelope) => self.handle(envelope),
                Received::TimedOut => return self.settled(),
                Received::Closed => return Termination::Closed,
            }
        }
    }

    pub(super) fn settled(&self) -> Termination {
        match self.state.decision_state {
            DecisionState::Decided => Termination::Decided,
            DecisionState::Undecided => Termination::TimedOut,
        }
    }

    /// Moves to Decided. Returns false, and changes nothing, if the node had
    /// already decided.
    pub(super) fn commit(&mut self, value: Value) -> bool {
        if self.state.decision_state == DecisionState::Decided {
            return false;
        }
        self.state.decision_state = DecisionState::Decided;
        self.state.decided_value = Some(value);
        tracing::info!(
            node = self.id(),
            byzantine = self.identity.is_byzantine,
            %value,
            "decided"
        );
        true
    }

    /// The value actually sent to `to` where an honest node would send
    /// `honest`. Only nodes with a fault strategy deviate.
    pub(super) fn outgoing(&mut self, phase: Phase, honest: Value, to: NodeId) -> Option<Value> {
        match self.fault.as_mut() {
            Some(fault) => fault.corrupt(phase, honest, to),
            None => Some(honest),
        }
    }

    /// Every node id, the sender included.
    pub(super) fn recipients(&self) -> Vec<NodeId> {
        self.roster.ids().collect()
    }

    /// The same message to every node, the sender included.
    pub(super) fn broadcast(&self, message: &Message) {
        self.bus.broadcast(self.identity.id, &self.recipients(), message);
    }

    /// Broadcasts `honest`. With a fault strategy installed each recipient's
    /// copy goes through [`Self::outgoing`] instead.
    pub(super) fn broadcast_value(
        &mut self,
        phase: Phase,
        honest: Value,
        make: impl Fn(Value) -> Message,
    ) {
        if self.fault.is_none() {
            self.broadcast(&make(honest));
            return;
        }
        for to in self.recipients() {
            if let Some(value) = self.outgoing(phase, honest, to) {
                self.send(to, make(value));
            }
        }
    }

    pub(super) fn send(&self, to: NodeId, message: Message) {
        self.bus.send(Envelope::new(self.identity.id, to, message));
    }
}
