//! Hierarchical agent replay
//!
//! Loads a run configuration, builds the agent tree rooted at the named agent
//! and drives it through every episode of a JSON-lines observation recording,
//! printing one episode summary per line.
//!
//! Usage: `hrl-replay <config.json> <root-agent> <observations.jsonl>`

mod replay;

use anyhow::{Context, Result, bail};
use hrl_core::RunConfig;
use hrl_engine::{AgentKind, AgentTree, DecisionMakerPool, StepDriver, agent_names, run_episode};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::replay::ReplayEnvironment;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let [config_path, root, recording] = args.as_slice() else {
        bail!(
            "usage: hrl-replay <config.json> <root-agent> <observations.jsonl> (agents: {})",
            agent_names().join(", ")
        );
    };

    let config = RunConfig::from_json_file(config_path, &agent_names())
        .with_context(|| format!("loading run configuration {}", config_path))?;
    let root = AgentKind::from_name(root).with_context(|| format!("root agent {}", root))?;
    let mut pool = DecisionMakerPool::builtin();
    let tree = AgentTree::build(root, &config, &mut pool).context("building agent tree")?;
    let mut driver = StepDriver::new(tree);

    let mut env = ReplayEnvironment::from_file(recording)
        .with_context(|| format!("reading recording {}", recording))?;

    let mut episodes = 0;
    while env.has_episode() {
        let summary = run_episode(&mut driver, &mut env)
            .await
            .with_context(|| format!("replaying episode {}", episodes + 1))?;
        println!("{}", serde_json::to_string(&summary)?);
        episodes += 1;
    }

    info!(
        "replayed {} episodes, {} primitive actions issued",
        episodes,
        env.issued()
    );
    Ok(())
}
