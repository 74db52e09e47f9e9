use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::time::Instant;

use super::{AuditSink, ChannelBus, InterceptBus, Interceptor, MessageBus, Node};
use crate::{
    agreement::{
        AgreementNode, DecisionState, FaultStrategy, NodeId, NodeOutcome, RandomFault, Role,
        Roster, Termination, Value,
    },
    common::{
        config::{ProtocolMode, RunConfig},
        error::{ConfigResult, SimulationError},
    },
};

/// Builds one run from a [`RunConfig`]: keys, roster, bus and one tokio task
/// per node. Byzantine nodes without an explicit strategy get a
/// [`RandomFault`] seeded from the run seed and their id.
pub struct Simulation {
    config: Arc<RunConfig>,
    faults: HashMap<NodeId, Box<dyn FaultStrategy>>,
    interceptor: Option<Box<dyn Interceptor>>,
    audit: Option<Arc<dyn AuditSink>>,
}

impl Simulation {
    pub fn new(config: RunConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Simulation {
            config: Arc::new(config),
            faults: HashMap::new(),
            interceptor: None,
            audit: None,
        })
    }

    /// Replaces the default adversary of Byzantine node `id`. Honest nodes
    /// never consult a strategy, so one given to them is ignored.
    pub fn with_fault(mut self, id: NodeId, fault: Box<dyn FaultStrategy>) -> Self {
        if !self.config.byzantine.contains(&id) {
            tracing::warn!(node = id, "fault strategy given to an honest node, ignoring");
            return self;
        }
        self.faults.insert(id, fault);
        self
    }

    pub fn with_interceptor(mut self, interceptor: Box<dyn Interceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Initial value of every node, in id order.
    fn initial_values(&self, rng: &mut ChaCha8Rng) -> Vec<Value> {
        let n = self.config.nodes;
        match (self.config.mode, &self.config.votes) {
            (ProtocolMode::VoteEcho, Some(votes)) => votes.clone(),
            (ProtocolMode::VoteEcho, None) => (0..n).map(|_| Value::from_bit(rng.gen())).collect(),
            (ProtocolMode::Flooding, _) => vec![self.config.proposal; n],
        }
    }

    pub async fn run(mut self) -> Result<RunReport, SimulationError> {
        let config = Arc::clone(&self.config);
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut nodes: Vec<Node> = (0..config.nodes)
            .map(|id| Node::generate(id, &mut rng))
            .collect();
        for node in nodes.iter_mut() {
            let id = node.identity.id;
            node.identity.is_byzantine = config.byzantine.contains(&id);
            if config.mode == ProtocolMode::Flooding && config.general == Some(id) {
                node.identity.role = Role::General;
            }
        }
        let roster = Arc::new(Roster::new(
            nodes.iter().map(|node| node.identity.clone()).collect(),
        ));
        let values = self.initial_values(&mut rng);

        let (bus, mailboxes) = ChannelBus::new(roster.ids());
        let bus: Arc<dyn MessageBus> = match self.interceptor.take() {
            Some(interceptor) => Arc::new(InterceptBus::new(bus, interceptor)),
            None => Arc::new(bus),
        };

        tracing::info!(
            mode = ?config.mode,
            n = config.nodes,
            f = config.faulty,
            byzantine = ?config.byzantine,
            seed = config.seed,
            "starting run"
        );

        let epoch = Instant::now();
        let mut handles = Vec::with_capacity(config.nodes);
        for ((node, mailbox), value) in nodes.into_iter().zip(mailboxes).zip(values) {
            let id = node.identity.id;
            let is_byzantine = node.identity.is_byzantine;

            let mut agreement_node = AgreementNode::new(
                node,
                Arc::clone(&roster),
                Arc::clone(&config),
                Arc::clone(&bus),
                mailbox,
                value,
            )?
            .with_epoch(epoch);

            if is_byzantine {
                let fault = self
                    .faults
                    .remove(&id)
                    .unwrap_or_else(|| Box::new(RandomFault::seeded(config.seed ^ id as u64)));
                agreement_node = agreement_node.with_fault(fault);
            }
            if let Some(audit) = &self.audit {
                agreement_node = agreement_node.with_audit(Arc::clone(audit));
            }

            handles.push((id, tokio::spawn(agreement_node.run())));
        }
        // Nodes hold the only bus handles from here on.
        drop(bus);

        let mut outcomes = Vec::with_capacity(handles.len());
        for (id, handle) in handles {
            let outcome = handle
                .await
                .map_err(|source| SimulationError::Worker { id, source })?;
            outcomes.push(outcome);
        }

        let report = RunReport {
            mode: config.mode,
            outcomes,
        };
        if !report.honest_agreement() {
            tracing::error!(decided = ?report.decided_values(), "honest nodes disagree");
        }
        Ok(report)
    }
}

/// Final outcomes of a run, in id order.
#[derive(Clone, Debug)]
pub struct RunReport {
    pub mode: ProtocolMode,
    pub outcomes: Vec<NodeOutcome>,
}

impl RunReport {
    pub fn honest(&self) -> impl Iterator<Item = &NodeOutcome> {
        self.outcomes.iter().filter(|outcome| !outcome.is_byzantine)
    }

    /// Distinct values decided by honest nodes.
    pub fn decided_values(&self) -> BTreeSet<Value> {
        self.honest()
            .filter_map(|outcome| outcome.decided_value)
            .collect()
    }

    /// No two honest nodes decided differently. Undecided nodes do not
    /// break agreement.
    pub fn honest_agreement(&self) -> bool {
        self.decided_values().len() <= 1
    }

    /// Every honest node decided, and decided `value`.
    pub fn honest_decided_on(&self, value: Value) -> bool {
        self.honest()
            .all(|outcome| outcome.decided_value == Some(value))
    }

    pub fn all_honest_decided(&self) -> bool {
        self.honest()
            .all(|outcome| outcome.decision_state == DecisionState::Decided)
    }

    /// Honest nodes that gave up undecided.
    pub fn timed_out(&self) -> Vec<NodeId> {
        self.honest()
            .filter(|outcome| outcome.termination == Termination::TimedOut)
            .map(|outcome| outcome.id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::Silent;
    use crate::common::error::ConfigError;

    #[test]
    fn test_rejects_invalid_config() {
        let config = RunConfig::vote_echo(4, 1).with_votes(vec![Value::Accept; 2]);
        assert!(matches!(
            Simulation::new(config),
            Err(ConfigError::InvalidVoteCount { expected: 4, got: 2 })
        ));
    }

    #[test]
    fn test_fault_for_honest_node_is_ignored() {
        let sim = Simulation::new(RunConfig::flooding(4, 1, 2).with_byzantine([3]))
            .unwrap()
            .with_fault(1, Box::new(Silent))
            .with_fault(3, Box::new(Silent));
        assert_eq!(sim.faults.len(), 1);
        assert!(sim.faults.contains_key(&3));
    }

    #[test]
    fn test_random_votes_follow_seed() {
        let sim = Simulation::new(RunConfig::vote_echo(13, 4).with_seed(9)).unwrap();
        let a = sim.initial_values(&mut ChaCha8Rng::seed_from_u64(1));
        let b = sim.initial_values(&mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(a.len(), 13);
        assert_eq!(a, b);

        let sim = Simulation::new(RunConfig::flooding(4, 1, 2).with_proposal(Value::Reject)).unwrap();
        let values = sim.initial_values(&mut ChaCha8Rng::seed_from_u64(1));
        assert_eq!(values, vec![Value::Reject; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_identifies_honest_nodes() {
        let config = RunConfig::flooding(4, 1, 1).with_byzantine([3]);
        let report = Simulation::new(config)
            .unwrap()
            .with_fault(3, Box::new(Silent))
            .run()
            .await
            .unwrap();

        assert_eq!(report.outcomes.len(), 4);
        assert_eq!(report.honest().count(), 3);
        assert_eq!(report.outcomes[0].role, Role::General);
        assert!(report.outcomes[3].is_byzantine);
        assert!(report.honest_decided_on(Value::Accept));
        assert!(report.timed_out().is_empty());
    }
}
