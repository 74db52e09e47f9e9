use thiserror::Error;

use crate::agreement::NodeId;

/// Rejected run parameters. A node is never started with any of these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("at least one node is required")]
    TooFewNodes,

    /// `f` must stay strictly below `n / 3`.
    #[error("unsafe fault bound: {n} nodes cannot tolerate {f} faulty (need n >= 3f + 1)")]
    UnsafeFaultBound { n: usize, f: usize },

    #[error("flooding mode requires a general")]
    MissingGeneral,

    #[error("unknown node {id}, roster size is {n}")]
    UnknownNode { id: NodeId, n: usize },

    #[error("flooding mode requires at least one pulse")]
    NoPulses,

    #[error("expected {expected} initial votes, got {got}")]
    InvalidVoteCount { expected: usize, got: usize },

    #[error("invalid config file: {0}")]
    Parse(String),
}

/// Reasons a signature chain is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("signature chain is empty")]
    Empty,

    #[error("signer {signer} appears more than once in the chain")]
    DuplicateSigner { signer: NodeId },

    #[error("signer {signer} is not in the roster")]
    UnknownSigner { signer: NodeId },

    #[error("signature from {signer} does not verify")]
    InvalidSignature { signer: NodeId },

    #[error("chain starts at {signer}, expected general {general}")]
    WrongOrigin { signer: NodeId, general: NodeId },

    #[error("round {round} expects {expected} links, chain has {got}")]
    LengthMismatch {
        round: u32,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("node worker {id} failed: {source}")]
    Worker {
        id: NodeId,
        #[source]
        source: tokio::task::JoinError,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;
pub type ChainResult<T> = Result<T, ChainError>;
