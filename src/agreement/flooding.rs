use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::{
    chain::SignatureChain,
    fault::Phase,
    message::{Message, Relay, Round, Value},
    peers::NodeId,
    processor::{AgreementNode, Termination},
};
use crate::common::crypto::Keypair;

/*
    Authenticated flooding, one general, k relay pulses.

    Round 0 is the general's signed broadcast. A value is extracted when a
    valid chain of r + 1 distinct signers, rooted at the general, arrives no
    later than pulse r. The first time a value is extracted the node appends
    its signature and floods it at r + 1; round k is the last pulse and
    nothing extracted there is relayed.

    With k >= f + 1 every honest node ends with the same extracted set: a
    value first seen at round r < k is relayed to everyone in time, and a
    round-k chain carries at least one honest signer that already relayed
    it. A single extracted value is decided; anything else means the general
    equivocated or stayed silent, and every node falls back to the same
    default.
*/

/// Decided when the extracted set is not a single value. Same as the
/// plurality tie-break: the lowest value ordinal.
pub const FALLBACK_VALUE: Value = Value::Reject;

#[derive(Debug, Default)]
pub struct FloodingState {
    /// Values carried by a valid chain rooted at the general.
    extracted: BTreeSet<Value>,
    /// (round, value, relayer) triples already entered in the round log.
    witnesses: HashSet<(Round, Value, NodeId)>,
}

impl FloodingState {
    pub fn extracted(&self) -> &BTreeSet<Value> {
        &self.extracted
    }
}

impl AgreementNode {
    pub(super) async fn run_flooding(&mut self) -> Termination {
        if self.identity.is_general() {
            self.propose();
        }

        let pulses = self.config.pulses + 1;
        let deadline = self.epoch + self.config.pulse_duration() * pulses;
        let final_pulse = tokio::time::sleep_until(deadline);
        tokio::pin!(final_pulse);

        loop {
            tokio::select! {
                biased;
                received = self.mailbox.recv() => match received {
                    Some(envelope) => self.handle(envelope),
                    None => return Termination::Closed,
                },
                () = &mut final_pulse => break,
            }
        }

        if self.decide_flooding() {
            return Termination::Decided;
        }
        self.drain_until_quiet().await
    }

    /// The general signs its value and sends it to everyone, itself included.
    pub(super) fn propose(&mut self) {
        let id = self.identity.id;
        let honest = self.state.own_vote;
        self.flood(Phase::Propose, honest, 0, |keypair, value| {
            SignatureChain::originate(id, keypair, value)
        });

        tracing::debug!(node = id, value = %honest, "general proposed");
    }

    /// Pulse the run is in now, counted from the shared epoch.
    fn current_pulse(&self) -> Round {
        let pulse = self.config.pulse_duration().as_millis().max(1);
        let elapsed = self.epoch.elapsed().as_millis();
        Round::try_from(elapsed / pulse).unwrap_or(Round::MAX)
    }

    pub(super) fn on_relay(&mut self, from: NodeId, relay: Relay) {
        let k = self.config.pulses;
        if relay.round > k {
            tracing::debug!(
                node = self.id(),
                from,
                round = relay.round,
                "relay beyond the last pulse, dropping"
            );
            return;
        }
        let pulse = self.current_pulse();
        if relay.round < pulse {
            tracing::debug!(
                node = self.id(),
                from,
                round = relay.round,
                pulse,
                "relay arrived after its pulse, dropping"
            );
            return;
        }

        let Some(general) = self.roster.general() else {
            return;
        };
        if let Err(error) = relay
            .chain
            .verify_for_round(relay.value, relay.round, general, &self.roster)
        {
            tracing::warn!(node = self.id(), from, round = relay.round, %error, "dropping relay");
            return;
        }
        if relay.chain.last_signer() != Some(from) {
            tracing::debug!(node = self.id(), from, "relay not signed by its sender, dropping");
            return;
        }

        if self
            .state
            .flooding
            .witnesses
            .insert((relay.round, relay.value, from))
        {
            self.state
                .round_log
                .entry(relay.round)
                .or_default()
                .push(relay.value);
        }

        if !self.state.flooding.extracted.insert(relay.value) {
            return;
        }
        tracing::debug!(
            node = self.id(),
            from,
            round = relay.round,
            value = %relay.value,
            chain = ?relay.chain.signer_ids(),
            "extracted value"
        );

        if relay.round < k && !relay.chain.contains(self.identity.id) {
            self.relay(relay);
        }
    }

    /// Floods `relay` one round later with this node's signature appended.
    fn relay(&mut self, relay: Relay) {
        let id = self.identity.id;
        let chain = relay.chain;
        self.flood(Phase::Relay, relay.value, relay.round + 1, |keypair, value| {
            chain.extend(id, keypair, value)
        });
    }

    /// Sends a round-`round` relay of `honest` to every node. Honest nodes
    /// sign once and broadcast; a node with a fault strategy signs whatever
    /// value the strategy picks for each recipient.
    fn flood(
        &mut self,
        phase: Phase,
        honest: Value,
        round: Round,
        sign: impl Fn(&Keypair, Value) -> SignatureChain,
    ) {
        if self.fault.is_none() {
            let chain = sign(&self.keypair, honest);
            self.broadcast(&Message::Relay(Relay { value: honest, round, chain }));
            return;
        }

        let mut signed: BTreeMap<Value, SignatureChain> = BTreeMap::new();
        for to in self.recipients() {
            let Some(value) = self.outgoing(phase, honest, to) else {
                continue;
            };
            let chain = signed
                .entry(value)
                .or_insert_with(|| sign(&self.keypair, value))
                .clone();
            self.send(to, Message::Relay(Relay { value, round, chain }));
        }
    }

    /// Runs once, when the last pulse ends. Commits the extracted value if
    /// there is exactly one. Otherwise falls back to [`FALLBACK_VALUE`], but
    /// only with at least f + 1 pulses, where every honest node is known to
    /// hold the same extracted set.
    pub(super) fn decide_flooding(&mut self) -> bool {
        let extracted: Vec<Value> = self.state.flooding.extracted.iter().copied().collect();
        let enough_pulses = self.config.pulses as usize > self.thresholds.f();

        match extracted.as_slice() {
            [value] => self.commit(*value),
            _ if enough_pulses => {
                tracing::info!(
                    node = self.id(),
                    extracted = ?extracted,
                    fallback = %FALLBACK_VALUE,
                    "general did not commit to a single value"
                );
                self.commit(FALLBACK_VALUE)
            }
            _ => {
                tracing::info!(
                    node = self.id(),
                    extracted = ?extracted,
                    pulses = self.config.pulses,
                    "no single value and too few pulses to fall back safely"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agreement::{
        fault::Equivocate,
        processor::{
            tests::{build_nodes, pending},
            DecisionState,
        },
    };
    use crate::common::RunConfig;
    use std::time::Duration;
    use tokio::time::Instant;

    fn chain_for(nodes: &[AgreementNode], signers: &[NodeId], value: Value) -> SignatureChain {
        let mut chain = SignatureChain::originate(signers[0], &nodes[signers[0]].keypair, value);
        for &signer in &signers[1..] {
            chain = chain.extend(signer, &nodes[signer].keypair, value);
        }
        chain
    }

    fn relay(nodes: &[AgreementNode], signers: &[NodeId], value: Value) -> Relay {
        Relay {
            value,
            round: signers.len() as Round - 1,
            chain: chain_for(nodes, signers, value),
        }
    }

    #[test]
    fn test_general_broadcasts_to_all_including_itself() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 1));
        nodes[0].propose();

        for node in nodes.iter_mut() {
            let queued = pending(node);
            assert_eq!(queued.len(), 1);
            let Message::Relay(relay) = &queued[0].message else {
                panic!("Wrong Message Type");
            };
            assert_eq!(relay.round, 0);
            assert_eq!(relay.value, Value::Accept);
            assert_eq!(relay.chain.signer_ids(), vec![0]);
        }
    }

    #[test]
    fn test_valid_relay_is_logged_and_extended() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));
        let round0 = relay(&nodes, &[0], Value::Accept);
        nodes[1].on_relay(0, round0);

        assert_eq!(nodes[1].state().round_log.get(&0), Some(&vec![Value::Accept]));
        for node in nodes.iter_mut() {
            let queued = pending(node);
            assert_eq!(queued.len(), 1);
            assert_eq!(queued[0].from, 1);
            let Message::Relay(relay) = &queued[0].message else {
                panic!("Wrong Message Type");
            };
            assert_eq!(relay.round, 1);
            assert_eq!(relay.chain.signer_ids(), vec![0, 1]);
        }
    }

    #[test]
    fn test_final_round_is_not_relayed() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 1));
        let round1 = relay(&nodes, &[0, 2], Value::Accept);
        nodes[1].on_relay(2, round1);

        assert_eq!(nodes[1].state().round_log.get(&1), Some(&vec![Value::Accept]));
        assert!(nodes.iter_mut().all(|node| pending(node).is_empty()));
    }

    #[test]
    fn test_own_chain_is_not_relayed_again() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));
        let round1 = relay(&nodes, &[0, 1], Value::Accept);
        nodes[1].on_relay(1, round1);

        assert_eq!(nodes[1].state().round_log.get(&1), Some(&vec![Value::Accept]));
        assert!(nodes.iter_mut().all(|node| pending(node).is_empty()));
    }

    #[test]
    fn test_invalid_relays_are_dropped() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));

        // Duplicate signer.
        let padded = Relay {
            value: Value::Accept,
            round: 1,
            chain: chain_for(&nodes, &[0], Value::Accept).extend(0, &nodes[0].keypair, Value::Accept),
        };
        nodes[1].on_relay(0, padded);

        // Value swapped under the general's signature.
        let mut swapped = relay(&nodes, &[0, 2], Value::Accept);
        swapped.value = Value::Reject;
        nodes[1].on_relay(2, swapped);

        // Not rooted at the general.
        let rootless = relay(&nodes, &[3], Value::Reject);
        nodes[1].on_relay(3, rootless);

        // Round does not match the chain length.
        let mut stretched = relay(&nodes, &[0], Value::Accept);
        stretched.round = 1;
        nodes[1].on_relay(0, stretched);

        // Beyond the last pulse.
        let late = relay(&nodes, &[0, 2, 3, 1], Value::Accept);
        nodes[1].on_relay(1, late);

        // Forwarded by someone other than the last signer.
        let replayed = relay(&nodes, &[0, 2], Value::Accept);
        nodes[1].on_relay(3, replayed);

        assert!(nodes[1].state().round_log.is_empty());
        assert!(nodes[1].state().flooding.extracted().is_empty());
        assert!(nodes.iter_mut().all(|node| pending(node).is_empty()));
    }

    #[test]
    fn test_relayer_counts_once_per_value() {
        let mut nodes = build_nodes(RunConfig::flooding(7, 2, 2));
        // Node 3 relays Accept at round 2 along two different paths.
        let path_a = relay(&nodes, &[0, 1, 3], Value::Accept);
        let path_b = relay(&nodes, &[0, 2, 3], Value::Accept);
        nodes[4].on_relay(3, path_a.clone());
        nodes[4].on_relay(3, path_b);
        // Exact duplicate delivery.
        nodes[4].on_relay(3, path_a);

        assert_eq!(nodes[4].state().round_log.get(&2), Some(&vec![Value::Accept]));
    }

    #[test]
    fn test_relays_each_value_once() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));
        let via_2 = relay(&nodes, &[0, 2], Value::Accept);
        nodes[1].on_relay(2, via_2);
        let via_3 = relay(&nodes, &[0, 3], Value::Accept);
        nodes[1].on_relay(3, via_3);

        // Both relayers are logged, but only the first chain is passed on.
        assert_eq!(
            nodes[1].state().round_log.get(&1),
            Some(&vec![Value::Accept, Value::Accept])
        );
        for node in nodes.iter_mut() {
            let queued = pending(node);
            assert_eq!(queued.len(), 1);
            let Message::Relay(relay) = &queued[0].message else {
                panic!("Wrong Message Type");
            };
            assert_eq!(relay.chain.signer_ids(), vec![0, 2, 1]);
        }
    }

    #[test]
    fn test_late_relay_is_dropped() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));
        // Two and a half pulses into the run.
        nodes[1].epoch = Instant::now() - Duration::from_millis(250);

        let round0 = relay(&nodes, &[0], Value::Accept);
        nodes[1].on_relay(0, round0);
        let round1 = relay(&nodes, &[0, 2], Value::Accept);
        nodes[1].on_relay(2, round1);
        assert!(nodes[1].state().flooding.extracted().is_empty());

        let round2 = relay(&nodes, &[0, 2, 3], Value::Accept);
        nodes[1].on_relay(3, round2);
        assert_eq!(
            nodes[1].state().flooding.extracted(),
            &BTreeSet::from([Value::Accept])
        );
        assert_eq!(nodes[1].state().round_log.keys().collect::<Vec<_>>(), vec![&2]);
    }

    #[test]
    fn test_decides_single_extracted_value() {
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 1));
        let r = relay(&nodes, &[0, 1], Value::Accept);
        nodes[2].on_relay(1, r);

        assert!(nodes[2].decide_flooding());
        assert_eq!(nodes[2].state().decision_state, DecisionState::Decided);
        assert_eq!(nodes[2].state().decided_value, Some(Value::Accept));
    }

    #[test]
    fn test_nothing_extracted() {
        // One pulse with f = 1 is not enough to fall back.
        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 1));
        assert!(!nodes[2].decide_flooding());
        assert_eq!(nodes[2].state().decision_state, DecisionState::Undecided);

        let mut nodes = build_nodes(RunConfig::flooding(4, 1, 2));
        assert!(nodes[2].decide_flooding());
        assert_eq!(nodes[2].state().decided_value, Some(FALLBACK_VALUE));
    }

    #[test]
    fn test_equivocation_falls_back_with_enough_pulses() {
        for (pulses, expected) in [(1, None), (2, Some(Value::Reject))] {
            let config = RunConfig::flooding(4, 1, pulses).with_byzantine([0]);
            let mut nodes = build_nodes(config);
            // The general signed both values.
            let r = relay(&nodes, &[0, 1], Value::Accept);
            nodes[2].on_relay(1, r);
            let r = relay(&nodes, &[0, 3], Value::Reject);
            nodes[2].on_relay(3, r);

            assert_eq!(nodes[2].state().flooding.extracted().len(), 2);
            assert_eq!(nodes[2].decide_flooding(), expected.is_some());
            assert_eq!(nodes[2].state().decided_value, expected);
        }
    }

    #[test]
    fn test_byzantine_general_equivocates_per_peer() {
        let config = RunConfig::flooding(4, 1, 1).with_byzantine([0]);
        let mut nodes = build_nodes(config);
        let mut general = nodes.remove(0).with_fault(Box::new(
            Equivocate::new().tell(1, Value::Accept).tell(2, Value::Reject),
        ));
        general.propose();

        let to_1 = pending(&mut nodes[0]);
        let to_2 = pending(&mut nodes[1]);
        assert_eq!(to_1[0].message.value(), Value::Accept);
        assert_eq!(to_2[0].message.value(), Value::Reject);
        assert!(pending(&mut nodes[2]).is_empty());

        // Both halves carry a valid general signature.
        for envelope in to_1.into_iter().chain(to_2) {
            let Message::Relay(relay) = envelope.message else {
                panic!("Wrong Message Type");
            };
            assert!(relay.chain.verify(relay.value, &general.roster).is_ok());
        }
    }
}
