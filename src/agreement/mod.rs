pub mod chain;
pub mod fault;
pub mod flooding;
pub mod message;
pub mod peers;
pub mod processor;
pub mod threshold;
pub mod vote_echo;

pub use chain::*;
pub use fault::*;
pub use flooding::{FloodingState, FALLBACK_VALUE};
pub use message::*;
pub use peers::*;
pub use processor::*;
pub use threshold::*;
pub use vote_echo::VoteEchoState;
