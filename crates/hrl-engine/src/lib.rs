//! # hrl-engine
//!
//! Hierarchical agent control for a real-time strategy game.
//!
//! This crate provides:
//! - The `Agent` contract and the per-agent core (state, selection, learning)
//! - Multi-tick action execution for leaf agents
//! - The attack, battle-manager, grid-attack and army-training agents
//! - A registry that assembles agent trees from a run configuration
//! - The step driver and the async environment boundary

pub mod agent;
pub mod agents;
pub mod driver;
pub mod features;
pub mod machine;
pub mod select;
pub mod tree;

pub use agent::{Agent, AgentCore, AgentParts, Children, find_agent};
pub use driver::{DriverEvent, Environment, EpisodeSummary, StepDriver, run_episode};
pub use tree::{
    AgentKind, AgentTree, BuiltinDecisionMakers, DecisionMakerPool, DecisionMakerProvider,
    DecisionMakerRequest, agent_names,
};
