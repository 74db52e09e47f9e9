//! Runs one agreement simulation and prints every node's outcome.
//!
//! ```bash
//! # Flooding with an honest general, one faulty relayer
//! byzantine-sim flooding -n 4 -f 1 -k 2 --byzantine 3
//!
//! # Vote-echo from a file
//! byzantine-sim --config run.toml
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use byzantine_agreement::{
    agreement::{NodeId, Role, Value},
    common::{logging, RunConfig},
    network::{RunReport, Simulation, TracingAudit},
};
use clap::{Args, Parser, Subcommand};

/// Byzantine agreement simulator
#[derive(Parser, Debug)]
#[command(name = "byzantine-sim")]
#[command(version, about, long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Read the whole run from a TOML file instead of flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Trace every delivered message (set RUST_LOG=trace to see them)
    #[arg(long)]
    audit: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Authenticated flooding from a single general
    Flooding(FloodingArgs),
    /// Leaderless vote, echo, decide
    VoteEcho(VoteEchoArgs),
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// Number of nodes
    #[arg(short = 'n', long, default_value_t = 4)]
    nodes: usize,

    /// Declared bound on faulty nodes, must satisfy 3f < n
    #[arg(short = 'f', long, default_value_t = 1)]
    faulty: usize,

    /// Ids of the Byzantine nodes, comma separated
    #[arg(short = 'b', long, value_delimiter = ',')]
    byzantine: Vec<NodeId>,

    /// Random seed for keys, votes and Byzantine behaviour
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Quiet period after which an undecided node gives up
    #[arg(long, default_value_t = 1_000)]
    receive_timeout_ms: u64,
}

#[derive(Args, Debug)]
struct FloodingArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Relay pulses after the general's broadcast
    #[arg(short = 'k', long, default_value_t = 2)]
    pulses: u32,

    /// Id of the general
    #[arg(short = 'g', long, default_value_t = 0)]
    general: NodeId,

    /// Value an honest general proposes
    #[arg(long, default_value = "accept")]
    proposal: Value,

    /// Length of one pulse
    #[arg(long, default_value_t = 100)]
    pulse_ms: u64,
}

#[derive(Args, Debug)]
struct VoteEchoArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Initial vote of every node in id order, comma separated. Drawn from
    /// the seed when omitted.
    #[arg(long, value_delimiter = ',')]
    votes: Vec<Value>,
}

impl CommonArgs {
    fn apply(self, config: RunConfig) -> RunConfig {
        RunConfig {
            seed: self.seed,
            receive_timeout_ms: self.receive_timeout_ms,
            ..config
        }
        .with_byzantine(self.byzantine)
    }
}

impl Cli {
    fn run_config(self) -> anyhow::Result<RunConfig> {
        if let Some(path) = self.config {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            return RunConfig::from_toml_str(&raw)
                .with_context(|| format!("loading {}", path.display()));
        }

        let config = match self.command {
            Some(Command::Flooding(args)) => {
                let config = RunConfig {
                    pulse_ms: args.pulse_ms,
                    ..RunConfig::flooding(args.common.nodes, args.common.faulty, args.pulses)
                }
                .with_general(args.general)
                .with_proposal(args.proposal);
                args.common.apply(config)
            }
            Some(Command::VoteEcho(args)) => {
                let mut config = RunConfig::vote_echo(args.common.nodes, args.common.faulty);
                if !args.votes.is_empty() {
                    config = config.with_votes(args.votes);
                }
                args.common.apply(config)
            }
            None => bail!("either a subcommand or --config is required"),
        };
        Ok(config)
    }
}

fn print_report(report: &RunReport) {
    println!("\n=== {:?} run complete ===", report.mode);
    for outcome in &report.outcomes {
        let decided = outcome
            .decided_value
            .map_or_else(|| "-".to_string(), |value| value.to_string());
        let observed = outcome
            .observed_consensus
            .map_or_else(|| "-".to_string(), |value| value.to_string());
        let role = match (outcome.role, outcome.is_byzantine) {
            (Role::General, true) => "byzantine general",
            (Role::General, false) => "general",
            (Role::Regular, true) => "byzantine",
            (Role::Regular, false) => "honest",
        };
        println!(
            "node {:>3}  {:<17}  input={}  {:?}/{:?}  decided={}  observed={}",
            outcome.id,
            role,
            outcome.own_vote,
            outcome.decision_state,
            outcome.termination,
            decided,
            observed
        );
    }

    let decided = report.decided_values();
    if !report.honest_agreement() {
        println!("Agreement: VIOLATED {decided:?}");
    } else if let Some(value) = decided.first() {
        println!("Agreement: {value}");
    } else {
        println!("Agreement: no honest node decided");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init("info");

    let cli = Cli::parse();
    let audit = cli.audit;
    let config = cli.run_config()?;

    let mut simulation = Simulation::new(config).context("invalid run configuration")?;
    if audit {
        simulation = simulation.with_audit(Arc::new(TracingAudit));
    }
    let report = simulation.run().await?;
    print_report(&report);

    if report.honest_agreement() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
