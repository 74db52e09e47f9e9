use std::collections::{BTreeMap, HashMap, HashSet};

use super::{
    fault::Phase,
    message::{Echo, Message, Value},
    peers::NodeId,
    processor::{AgreementNode, Termination},
    threshold::Tally,
};

/*
    Leaderless binary agreement in three steps.

    Every node announces itself with Init and, on the first Init it sees,
    votes once. Every vote received is echoed to everyone, tagged with the
    node that cast it. A vote counts as confirmed once an echo quorum of
    distinct echoers repeated the same value for it; a node decides a value
    once an echo quorum of origins is confirmed for it, then tells everyone.

    Two echo quorums overlap in more than f nodes, so honest nodes never
    confirm different values for the same origin, and since the quorum is
    above n / 2 at most one value can ever gather one.
*/

#[derive(Debug, Default)]
pub struct VoteEchoState {
    voted: bool,
    /// Origins whose vote this node has already echoed.
    echoed: HashSet<NodeId>,
    /// (origin, echoer) pairs already counted.
    echoers: HashSet<(NodeId, NodeId)>,
    per_origin: HashMap<NodeId, Tally>,
    confirmed: BTreeMap<NodeId, Value>,
    decide_senders: HashSet<NodeId>,
}

impl AgreementNode {
    pub(super) async fn run_vote_echo(&mut self) -> Termination {
        self.start_vote_echo();
        self.drain_until_quiet().await
    }

    pub(super) fn start_vote_echo(&mut self) {
        let vote = self.state.own_vote;
        self.broadcast_value(Phase::Init, vote, Message::Init);
    }

    /// Casts this node's vote on the first Init only.
    pub(super) fn on_init(&mut self, from: NodeId, value: Value) {
        tracing::debug!(node = self.id(), from, %value, "init");
        if self.state.vote_echo.voted {
            return;
        }
        self.state.vote_echo.voted = true;

        let vote = self.state.own_vote;
        self.broadcast_value(Phase::Vote, vote, Message::Vote);
    }

    pub(super) fn on_vote(&mut self, from: NodeId, value: Value) {
        if self.state.decided_value.is_some() {
            return;
        }
        if !self.state.vote_echo.echoed.insert(from) {
            tracing::debug!(node = self.id(), from, "second vote from the same origin, ignoring");
            return;
        }

        self.broadcast_value(Phase::Echo, value, |value| {
            Message::Echo(Echo {
                origin: from,
                value,
            })
        });
    }

    pub(super) fn on_echo(&mut self, from: NodeId, echo: Echo) {
        let vote_echo = &mut self.state.vote_echo;
        if !vote_echo.echoers.insert((echo.origin, from)) {
            return;
        }

        let count = vote_echo
            .per_origin
            .entry(echo.origin)
            .or_default()
            .add(echo.value);
        if !self.thresholds.echo_reached(count) || vote_echo.confirmed.contains_key(&echo.origin) {
            return;
        }
        vote_echo.confirmed.insert(echo.origin, echo.value);

        let confirmed = self.state.echo_counts.add(echo.value);
        tracing::debug!(
            node = self.id(),
            origin = echo.origin,
            value = %echo.value,
            confirmed,
            "vote confirmed by echo quorum"
        );

        if self.thresholds.echo_reached(confirmed) {
            self.decide_vote_echo(echo.value);
        }
    }

    /// Commits and announces the decision. A no-op once decided.
    pub(super) fn decide_vote_echo(&mut self, value: Value) {
        if !self.commit(value) {
            return;
        }
        self.broadcast_value(Phase::Decide, value, Message::Decide);
    }

    pub(super) fn on_decide(&mut self, from: NodeId, value: Value) {
        if !self.state.vote_echo.decide_senders.insert(from) {
            return;
        }
        self.state.decide_counts.add(value);

        let senders = self.state.vote_echo.decide_senders.len();
        if self.state.observed_consensus.is_some() || !self.thresholds.decide_reached(senders) {
            return;
        }

        if let Some((value, count)) = self.state.decide_counts.plurality() {
            self.state.observed_consensus = Some(value);
            tracing::info!(
                node = self.id(),
                %value,
                count,
                senders,
                "observed consensus"
            );
        }
    }
}
