//! Agent lifecycle contract
//!
//! Every node of the hierarchy implements [`Agent`]. Leaves emit primitive
//! actions; interior agents own their children and delegate each decision to
//! exactly one of them. The per-node bookkeeping every agent needs (run flags,
//! decision maker, raw and scaled state buffers, the committed action) lives in
//! [`AgentCore`] so the concrete agents only describe what differs.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::debug;

use hrl_core::{
    ActionId, ActionSelection, DO_NOTHING, HrlError, Observation, PrimitiveAction, Result,
    RunFlags, SharedContext, SharedDecisionMaker, StateLayout, StateVector, Transition,
    lock_decision_maker,
};

use crate::select::{Selection, select_action};

/// Children of an interior agent keyed by the action that activates them
pub type Children = BTreeMap<ActionId, Box<dyn Agent>>;

/// One node of the control hierarchy
pub trait Agent: Send {
    /// Name used in configuration lists and logs
    fn name(&self) -> &'static str;

    fn core(&self) -> &AgentCore;

    fn core_mut(&mut self) -> &mut AgentCore;

    /// Size of the action space; action 0 is always do-nothing
    fn num_actions(&self) -> usize;

    /// Most driver ticks one decision of this agent can take
    fn max_moves(&self) -> u32;

    /// Reset episode-scoped state, recursing into every child
    fn first_step(&mut self, obs: &Observation) -> Result<()>;

    /// Recompute the raw and scaled state from the observation and the context
    fn create_state(&mut self, obs: &Observation, ctx: &mut SharedContext) -> Result<()>;

    /// Pick the action for the decision that starts now
    fn choose_action(&mut self) -> Result<ActionId>;

    /// Primitive to emit for `action` at `move_number`, and whether the decision is terminal
    fn action_to_primitive(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
        action: ActionId,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)>;

    /// Submit the finished decision's transition, deepest agents first
    fn learn(&mut self, reward: f64, terminal: bool) -> Result<()>;

    /// Episode-end reporting, recursing into the active children
    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()>;

    fn is_do_nothing(&self, action: ActionId) -> Result<bool> {
        Ok(action == DO_NOTHING)
    }

    fn action_to_str(&self, action: ActionId) -> Result<String>;

    /// Owned children keyed by the action that activates them
    fn children(&self) -> Vec<(ActionId, &dyn Agent)> {
        Vec::new()
    }

    /// Reward credited to the decision that just finished
    fn step_reward(&mut self, obs: &Observation, _ctx: &mut SharedContext) -> Result<f64> {
        Ok(obs.reward)
    }

    fn decision_maker(&self) -> SharedDecisionMaker {
        self.core().decision_maker().clone()
    }

    /// Whether this agent or any descendant makes autonomous decisions
    fn is_acting(&self) -> bool {
        self.core().flags().play || self.children().iter().any(|(_, c)| c.is_acting())
    }

    /// Drive one tick of the decision rooted at this agent
    fn step(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)> {
        run_step(self, obs, ctx, move_number)
    }
}

/// Default tick: a decision boundary at move 0, then action execution
///
/// At move 0 the state is rebuilt, the previous decision is learned from and a
/// new action is chosen. Later moves only continue executing that action.
pub fn run_step<A: Agent + ?Sized>(
    agent: &mut A,
    obs: &Observation,
    ctx: &mut SharedContext,
    move_number: u32,
) -> Result<(PrimitiveAction, bool)> {
    if move_number == 0 {
        agent.create_state(obs, ctx)?;
        let reward = agent.step_reward(obs, ctx)?;
        agent.learn(reward, false)?;
        let action = agent.choose_action()?;
        let idle = agent.is_do_nothing(action)?;
        debug!(
            "{} decides {}{} at step {} from state {}",
            agent.name(),
            agent.action_to_str(action)?,
            if idle { " (idle)" } else { "" },
            ctx.num_step,
            agent.core().scaled.fingerprint()
        );
    }
    let action = agent.core().current_action();
    agent.action_to_primitive(obs, ctx, action, move_number)
}

/// Depth-first lookup of an agent by name
pub fn find_agent<'a>(agent: &'a dyn Agent, name: &str) -> Option<&'a dyn Agent> {
    if agent.name() == name {
        return Some(agent);
    }
    agent
        .children()
        .into_iter()
        .find_map(|(_, child)| find_agent(child, name))
}

/// Construction inputs shared by every agent
pub struct AgentParts {
    pub name: &'static str,
    pub flags: RunFlags,
    pub selection: ActionSelection,
    pub decision_maker: SharedDecisionMaker,
    /// Fixed child action for a non-playing interior agent
    pub acting_child: Option<ActionId>,
    /// Exploration seed; entropy-seeded when absent
    pub seed: Option<u64>,
}

/// Bookkeeping common to every agent
pub struct AgentCore {
    name: &'static str,
    flags: RunFlags,
    selection: ActionSelection,
    decision_maker: SharedDecisionMaker,
    acting_child: Option<ActionId>,
    layout: StateLayout,
    /// Direct sensor readout
    pub raw: StateVector,
    /// Bucketed and clamped state fed to the decision maker
    pub scaled: StateVector,
    prev_scaled: StateVector,
    current_action: ActionId,
    committed: Option<ActionId>,
    rng: StdRng,
}

impl AgentCore {
    pub fn new(parts: AgentParts, layout: StateLayout) -> Self {
        let rng = match parts.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            name: parts.name,
            flags: parts.flags,
            selection: parts.selection,
            decision_maker: parts.decision_maker,
            acting_child: parts.acting_child,
            raw: layout.zeros(),
            scaled: layout.zeros(),
            prev_scaled: layout.zeros(),
            layout,
            current_action: DO_NOTHING,
            committed: None,
            rng,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn flags(&self) -> RunFlags {
        self.flags
    }

    pub fn layout(&self) -> &StateLayout {
        &self.layout
    }

    pub fn decision_maker(&self) -> &SharedDecisionMaker {
        &self.decision_maker
    }

    pub fn acting_child(&self) -> Option<ActionId> {
        self.acting_child
    }

    pub fn current_action(&self) -> ActionId {
        self.current_action
    }

    pub fn previous_state(&self) -> &StateVector {
        &self.prev_scaled
    }

    pub fn is_committed(&self) -> bool {
        self.committed.is_some()
    }

    /// Zero the state buffers and forget the last decision
    pub fn reset_episode(&mut self) {
        self.raw.clear();
        self.scaled.clear();
        self.prev_scaled.clear();
        self.current_action = DO_NOTHING;
        self.committed = None;
    }

    /// Clear the raw state before a rebuild
    pub fn begin_state(&mut self) {
        self.raw.clear();
    }

    /// Derive the scaled state from the raw state
    pub fn scale_with(&mut self, scale: impl Fn(&str, f64) -> f64) -> Result<()> {
        self.scaled.copy_from(&self.raw)?;
        for region in self.layout.regions() {
            for idx in region.range.clone() {
                self.scaled.set(idx, scale(region.name, self.raw.get(idx)));
            }
        }
        if self.scaled.len() != self.layout.size() {
            return Err(HrlError::invariant(self.name, "state length changed"));
        }
        Ok(())
    }

    pub fn set_action(&mut self, action: ActionId) {
        self.current_action = action;
    }

    /// Record that this agent acted on `action` in the current decision
    pub fn commit(&mut self, action: ActionId) {
        self.committed = Some(action);
    }

    /// Submit the transition for the committed action, then roll the state
    pub fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
        if let Some(action) = self.committed.take() {
            if self.flags.train {
                let transition = Transition {
                    prev_state: self.prev_scaled.clone(),
                    action,
                    reward,
                    next_state: self.scaled.clone(),
                    terminal,
                };
                lock_decision_maker(&self.decision_maker)?.learn(transition)?;
            }
        }
        self.prev_scaled.copy_from(&self.scaled)
    }

    /// Pick among `legal` with the configured selection mode
    pub fn select(&mut self, legal: Vec<ActionId>, num_actions: usize) -> Result<ActionId> {
        let action = select_action(
            Selection {
                agent: self.name,
                decision_maker: &self.decision_maker,
                state: &self.scaled,
                legal,
                num_actions,
                mode: self.selection,
                training: self.flags.train,
            },
            &mut self.rng,
        )?;
        self.current_action = action;
        Ok(action)
    }

    /// Episode-end reporting to the decision maker of training or testing agents
    pub fn end_run(&self, reward: f64, score: f64, steps: u64) -> Result<()> {
        if self.flags.train || self.flags.test {
            lock_decision_maker(&self.decision_maker)?.end_run(reward, score, steps)?;
        }
        Ok(())
    }

    /// Fail fast on an action outside the declared space
    pub fn check_action(&self, action: ActionId, num_actions: usize) -> Result<()> {
        if action >= num_actions {
            return Err(HrlError::unknown_action(self.name, action));
        }
        Ok(())
    }
}
