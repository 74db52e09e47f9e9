use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;

use super::error::{ConfigError, ConfigResult};
use crate::agreement::{NodeId, Value};

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProtocolMode {
    /// Authenticated multi-round flooding from a single general.
    Flooding,
    /// Leaderless vote, echo, decide.
    VoteEcho,
}

/// Immutable parameters of one agreement run. Every node receives its own
/// copy at construction.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub mode: ProtocolMode,
    /// Total participants, `n`.
    pub nodes: usize,
    /// Declared upper bound on Byzantine participants, `f`.
    pub faulty: usize,
    /// Relay pulses after the general's broadcast, `k`.
    pub pulses: u32,
    pub byzantine: BTreeSet<NodeId>,
    pub general: Option<NodeId>,
    pub proposal: Value,
    pub votes: Option<Vec<Value>>,
    pub seed: u64,
    pub pulse_ms: u64,
    pub receive_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        RunConfig {
            mode: ProtocolMode::Flooding,
            nodes: 4,
            faulty: 1,
            pulses: 2,
            byzantine: BTreeSet::new(),
            general: Some(0),
            proposal: Value::Accept,
            votes: None,
            seed: 0,
            pulse_ms: 100,
            receive_timeout_ms: 1_000,
        }
    }
}

impl RunConfig {
    pub fn flooding(nodes: usize, faulty: usize, pulses: u32) -> Self {
        RunConfig {
            mode: ProtocolMode::Flooding,
            nodes,
            faulty,
            pulses,
            ..Default::default()
        }
    }

    pub fn vote_echo(nodes: usize, faulty: usize) -> Self {
        RunConfig {
            mode: ProtocolMode::VoteEcho,
            nodes,
            faulty,
            general: None,
            ..Default::default()
        }
    }

    pub fn with_byzantine(mut self, ids: impl IntoIterator<Item = NodeId>) -> Self {
        self.byzantine = ids.into_iter().collect();
        self
    }

    pub fn with_general(mut self, id: NodeId) -> Self {
        self.general = Some(id);
        self
    }

    pub fn with_proposal(mut self, value: Value) -> Self {
        self.proposal = value;
        self
    }

    pub fn with_votes(mut self, votes: Vec<Value>) -> Self {
        self.votes = Some(votes);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn from_toml_str(raw: &str) -> ConfigResult<Self> {
        let config: RunConfig =
            toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn pulse_duration(&self) -> Duration {
        Duration::from_millis(self.pulse_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    /// Refuses configurations the protocol cannot run safely.
    pub fn validate(&self) -> ConfigResult<()> {
        let n = self.nodes;
        if n == 0 {
            return Err(ConfigError::TooFewNodes);
        }
        if 3 * self.faulty >= n {
            return Err(ConfigError::UnsafeFaultBound { n, f: self.faulty });
        }
        if let Some(&id) = self.byzantine.iter().find(|&&id| id >= n) {
            return Err(ConfigError::UnknownNode { id, n });
        }

        match self.mode {
            ProtocolMode::Flooding => {
                let general = self.general.ok_or(ConfigError::MissingGeneral)?;
                if general >= n {
                    return Err(ConfigError::UnknownNode { id: general, n });
                }
                if self.pulses == 0 {
                    return Err(ConfigError::NoPulses);
                }
                if (self.pulses as usize) < self.faulty + 1 {
                    tracing::warn!(
                        pulses = self.pulses,
                        faulty = self.faulty,
                        "fewer than f + 1 pulses, agreement is not guaranteed"
                    );
                }
            }
            ProtocolMode::VoteEcho => {
                if let Some(votes) = &self.votes {
                    if votes.len() != n {
                        return Err(ConfigError::InvalidVoteCount {
                            expected: n,
                            got: votes.len(),
                        });
                    }
                }
            }
        }

        if self.byzantine.len() > self.faulty {
            tracing::warn!(
                byzantine = self.byzantine.len(),
                faulty = self.faulty,
                "more Byzantine nodes than the declared bound"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsafe_fault_bound() {
        let config = RunConfig::flooding(3, 1, 2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsafeFaultBound { n: 3, f: 1 })
        );

        let config = RunConfig::vote_echo(12, 4);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnsafeFaultBound { n: 12, f: 4 })
        );

        assert!(RunConfig::vote_echo(13, 4).validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_ids() {
        let config = RunConfig::flooding(4, 1, 2).with_byzantine([4]);
        assert_eq!(config.validate(), Err(ConfigError::UnknownNode { id: 4, n: 4 }));

        let config = RunConfig::flooding(4, 1, 2).with_general(7);
        assert_eq!(config.validate(), Err(ConfigError::UnknownNode { id: 7, n: 4 }));
    }

    #[test]
    fn test_flooding_needs_general_and_pulses() {
        let mut config = RunConfig::flooding(4, 1, 2);
        config.general = None;
        assert_eq!(config.validate(), Err(ConfigError::MissingGeneral));

        let config = RunConfig::flooding(4, 1, 0);
        assert_eq!(config.validate(), Err(ConfigError::NoPulses));
    }

    #[test]
    fn test_vote_echo_checks_vote_count() {
        let config = RunConfig::vote_echo(4, 1).with_votes(vec![Value::Accept; 3]);
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidVoteCount { expected: 4, got: 3 })
        );
    }

    #[test]
    fn test_from_toml() {
        let raw = r#"
            mode = "vote-echo"
            nodes = 13
            faulty = 3
            byzantine = [0, 1, 2]
            seed = 42
        "#;
        let config = RunConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.mode, ProtocolMode::VoteEcho);
        assert_eq!(config.nodes, 13);
        assert_eq!(config.byzantine.len(), 3);
        assert_eq!(config.seed, 42);
        assert_eq!(config.receive_timeout(), Duration::from_millis(1_000));
    }

    #[test]
    fn test_from_toml_rejects_unsafe() {
        let raw = r#"
            mode = "flooding"
            nodes = 6
            faulty = 2
        "#;
        assert_eq!(
            RunConfig::from_toml_str(raw).unwrap_err(),
            ConfigError::UnsafeFaultBound { n: 6, f: 2 }
        );
    }
}
