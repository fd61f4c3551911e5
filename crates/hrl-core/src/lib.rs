//! # hrl-core
//!
//! Core types and traits for hierarchical agent control.
//!
//! This crate provides the foundational types shared by the agent engine:
//! - State vectors and their fixed layouts
//! - Agent actions and environment primitives
//! - The observation boundary
//! - The per-episode shared context
//! - Transitions, reward normalization and the decision-maker contract
//! - Run configuration

pub mod action;
pub mod config;
pub mod context;
pub mod decision;
pub mod error;
pub mod observation;
pub mod reward;
pub mod state;

pub use action::{ActionId, DO_NOTHING, Function, PrimitiveAction, ScreenPoint};
pub use config::{ActionSelection, DecisionMakerSpec, INHERIT, RunConfig, RunFlags};
pub use context::{ProducedSlot, SharedContext};
pub use decision::{
    BackgroundLearner, DecisionMaker, NullDecisionMaker, SharedDecisionMaker, Transition,
    lock_decision_maker, share,
};
pub use error::{HrlError, Result};
pub use observation::{Grid, Observation, PlayerResources, layers};
pub use reward::{Outcome, RewardNormalization};
pub use state::{Region, StateLayout, StateVector};
