//! Legal-action selection against a decision maker

use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use tracing::debug;

use hrl_core::{
    ActionId, ActionSelection, HrlError, Result, SharedDecisionMaker, StateVector,
    lock_decision_maker,
};

/// Everything one selection needs from the calling agent
pub struct Selection<'a> {
    pub agent: &'a str,
    pub decision_maker: &'a SharedDecisionMaker,
    /// Scaled state fed to the decision maker
    pub state: &'a StateVector,
    /// Legal actions computed from the raw state
    pub legal: Vec<ActionId>,
    pub num_actions: usize,
    pub mode: ActionSelection,
    /// Training agents explore and query the online policy
    pub training: bool,
}

/// Pick an action for one decision
///
/// In masked mode the legal list is shuffled with a generator seeded from the
/// state, so value ties break without positional bias while identical states
/// still map to identical choices. With probability equal to the decision
/// maker's exploration rate a uniformly random legal action is taken instead.
pub fn select_action(sel: Selection<'_>, rng: &mut StdRng) -> Result<ActionId> {
    match sel.mode {
        ActionSelection::Masked => select_masked(sel, rng),
        ActionSelection::Unmasked => select_unmasked(sel),
    }
}

fn select_masked(sel: Selection<'_>, rng: &mut StdRng) -> Result<ActionId> {
    let Selection {
        agent,
        decision_maker,
        state,
        mut legal,
        num_actions,
        training,
        ..
    } = sel;

    if legal.is_empty() {
        return Err(HrlError::invariant(agent, "legal action set is empty"));
    }
    if let Some(&bad) = legal.iter().find(|&&a| a >= num_actions) {
        return Err(HrlError::unknown_action(agent, bad));
    }

    let dm = lock_decision_maker(decision_maker)?;
    let explore = if training {
        dm.exploration_probability()?.clamp(0.0, 1.0)
    } else {
        0.0
    };

    if explore > 0.0 && rng.random::<f64>() < explore {
        let action = *legal
            .choose(rng)
            .ok_or_else(|| HrlError::invariant(agent, "legal action set is empty"))?;
        debug!("{} explores action {}", agent, action);
        return Ok(action);
    }

    let values = dm.action_values(state, !training)?;
    if values.len() < num_actions {
        return Err(HrlError::DecisionMaker(format!(
            "{} returned {} values for {} actions",
            dm.name(),
            values.len(),
            num_actions
        )));
    }

    legal.shuffle(&mut StdRng::seed_from_u64(state.seed()));
    let mut best = legal[0];
    for &a in &legal[1..] {
        if values[a] > values[best] {
            best = a;
        }
    }
    Ok(best)
}

fn select_unmasked(sel: Selection<'_>) -> Result<ActionId> {
    let all: Vec<ActionId> = (0..sel.num_actions).collect();
    let action = lock_decision_maker(sel.decision_maker)?.choose_action(
        sel.state,
        &all,
        !sel.training,
    )?;
    if action >= sel.num_actions {
        return Err(HrlError::unknown_action(sel.agent, action));
    }
    Ok(action)
}
