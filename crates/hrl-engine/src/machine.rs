//! Multi-tick execution of a leaf agent's chosen action
//!
//! A chosen action may need a setup primitive (select the producing building)
//! before its effect primitive (queue the unit) on a later tick. Each action is
//! described by a [`MovePlan`] and advanced by the pure [`advance`] function;
//! every plan reaches [`Stage::Done`] within [`LEAF_MOVE_BOUND`] ticks whether
//! or not its preconditions hold.

use tracing::debug;

use hrl_core::{HrlError, Observation, PrimitiveAction, Result};

/// Most ticks a leaf action can take
pub const LEAF_MOVE_BOUND: u32 = 2;

/// Execution stage of one logical decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Setup,
    Commit,
    Done,
}

/// Primitives realizing one chosen action
pub trait MovePlan {
    /// Whether the action starts with a setup primitive
    fn has_setup(&self) -> bool {
        true
    }

    /// Setup primitive, or `None` if its precondition does not hold this tick
    fn setup(&self, _obs: &Observation) -> Option<PrimitiveAction> {
        None
    }

    /// Effect primitive, or `None` if its precondition does not hold this tick
    fn commit(&self, obs: &Observation) -> Option<PrimitiveAction>;
}

/// Stage a plan is in at `move_number`
pub fn stage_for(move_number: u32, has_setup: bool) -> Stage {
    match (move_number, has_setup) {
        (0, true) => Stage::Setup,
        _ => Stage::Commit,
    }
}

/// Pure transition: primitive to emit now and the next stage
///
/// Unmet preconditions degrade to the no-op primitive but still advance, so a
/// decision is abandoned rather than retried forever.
pub fn advance(stage: Stage, plan: &dyn MovePlan, obs: &Observation) -> (PrimitiveAction, Stage) {
    match stage {
        Stage::Setup => (
            plan.setup(obs).unwrap_or_else(PrimitiveAction::no_op),
            Stage::Commit,
        ),
        Stage::Commit => (
            plan.commit(obs).unwrap_or_else(PrimitiveAction::no_op),
            Stage::Done,
        ),
        Stage::Done => (PrimitiveAction::no_op(), Stage::Done),
    }
}

/// Ticks the plan takes from first primitive to terminal
pub fn plan_length(plan: &dyn MovePlan) -> u32 {
    if plan.has_setup() { 2 } else { 1 }
}

/// Run `plan` at `move_number`, returning the primitive and whether the decision is terminal
pub fn run_move(
    agent: &str,
    plan: &dyn MovePlan,
    obs: &Observation,
    move_number: u32,
) -> Result<(PrimitiveAction, bool)> {
    if move_number >= plan_length(plan) {
        return Err(HrlError::invariant(
            agent,
            format!(
                "move {} past the end of a {}-tick action",
                move_number,
                plan_length(plan)
            ),
        ));
    }

    let stage = stage_for(move_number, plan.has_setup());
    let (primitive, next) = advance(stage, plan, obs);
    if primitive.is_no_op() {
        debug!("{}: precondition unmet at {:?}, issuing no-op", agent, stage);
    }
    Ok((primitive, next == Stage::Done))
}
