//! Battle manager: chooses between fighting the enemy army and its buildings

use hrl_core::{
    ActionId, DO_NOTHING, DecisionMaker, HrlError, Observation, PrimitiveAction, Result,
    SharedContext, StateLayout, StateVector, Transition, layers,
};
use hrl_core::observation::layers::relative;

use crate::agent::{Agent, AgentCore, AgentParts, Children};
use crate::agents::grid_attack::{GRID_CELLS, GRID_SIZE, TIME_LINE_BUCKETING};
use crate::features::{self, ARMY_SPEC, SCREEN_SIZE};

pub const NAME: &str = "battle_mngr";

pub const ACTION_ARMY_BATTLE: ActionId = 1;
pub const ACTION_BASE_BATTLE: ActionId = 2;
pub const NUM_ACTIONS: usize = 3;

pub mod region {
    pub const SELF_MAT: &str = "self_mat";
    pub const ENEMY_ARMY_MAT: &str = "enemy_army_mat";
    pub const ENEMY_BUILDING_MAT: &str = "enemy_building_mat";
    pub const TIME_LINE: &str = "time_line";
}

pub fn layout() -> StateLayout {
    StateLayout::new()
        .region(region::SELF_MAT, GRID_CELLS)
        .region(region::ENEMY_ARMY_MAT, GRID_CELLS)
        .region(region::ENEMY_BUILDING_MAT, GRID_CELLS)
        .scalar(region::TIME_LINE)
}

fn action_label(action: ActionId) -> &'static str {
    match action {
        ACTION_ARMY_BATTLE => "ArmyBattle",
        ACTION_BASE_BATTLE => "BaseBattle",
        _ => "DoNothing",
    }
}

/// Do-nothing, plus each battle whose enemy grid has a detected unit
pub fn legal_actions(state: &StateVector) -> Vec<ActionId> {
    let layout = layout();
    let mut legal = vec![DO_NOTHING];
    if state.any_positive(layout.range(region::ENEMY_ARMY_MAT)) {
        legal.push(ACTION_ARMY_BATTLE);
    }
    if state.any_positive(layout.range(region::ENEMY_BUILDING_MAT)) {
        legal.push(ACTION_BASE_BATTLE);
    }
    legal
}

/// Interior agent delegating to the army-attack or base-attack leaf
pub struct BattleManager {
    core: AgentCore,
    children: Children,
}

impl BattleManager {
    pub fn new(parts: AgentParts, children: Children) -> Result<Self> {
        for key in [ACTION_ARMY_BATTLE, ACTION_BASE_BATTLE] {
            if !children.contains_key(&key) {
                return Err(HrlError::Config(format!(
                    "{} requires a child for action {}",
                    NAME, key
                )));
            }
        }
        Ok(Self {
            core: AgentCore::new(parts, layout()),
            children,
        })
    }

    fn child(&self, action: ActionId) -> Result<&dyn Agent> {
        self.children
            .get(&action)
            .map(|c| c.as_ref())
            .ok_or_else(|| HrlError::unknown_action(NAME, action))
    }

    fn child_mut(&mut self, action: ActionId) -> Result<&mut Box<dyn Agent>> {
        self.children
            .get_mut(&action)
            .ok_or_else(|| HrlError::unknown_action(NAME, action))
    }

    /// Children taking part in decisions: every playing child, or the fixed acting one
    fn active_keys(&self) -> Vec<ActionId> {
        if self.core.flags().play {
            self.children
                .iter()
                .filter(|(_, c)| c.core().flags().play)
                .map(|(k, _)| *k)
                .collect()
        } else {
            self.core.acting_child().into_iter().collect()
        }
    }

    fn encode_self(&mut self, obs: &Observation) -> Result<()> {
        let unit_types = obs.screen_layer(layers::UNIT_TYPE)?;
        let owners = obs.screen_layer(layers::PLAYER_RELATIVE)?;
        let offset = self.core.layout().range(region::SELF_MAT).start;
        for spec in ARMY_SPEC {
            let pixels = features::unit_pixels(unit_types, owners, spec.unit_type, relative::SELF);
            for cluster in features::clusters(&pixels) {
                let cell = features::grid_cell(cluster.center, SCREEN_SIZE, GRID_SIZE);
                self.core.raw.add(offset + cell, cluster.power(spec.screen_pixels));
            }
        }
        Ok(())
    }

    fn copy_enemy_grid(&mut self, region: &str, grid: &[f64]) -> Result<()> {
        let range = self.core.layout().range(region);
        if grid.len() != range.len() {
            return Err(HrlError::invariant(
                NAME,
                format!("{} has {} cells, expected {}", region, grid.len(), range.len()),
            ));
        }
        for (idx, value) in range.zip(grid) {
            self.core.raw.set(idx, *value);
        }
        Ok(())
    }
}

impl Agent for BattleManager {
    fn name(&self) -> &'static str {
        NAME
    }

    fn core(&self) -> &AgentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore {
        &mut self.core
    }

    fn num_actions(&self) -> usize {
        NUM_ACTIONS
    }

    fn max_moves(&self) -> u32 {
        self.children.values().map(|c| c.max_moves()).max().unwrap_or(1)
    }

    fn first_step(&mut self, obs: &Observation) -> Result<()> {
        self.core.reset_episode();
        for child in self.children.values_mut() {
            child.first_step(obs)?;
        }
        Ok(())
    }

    fn create_state(&mut self, obs: &Observation, ctx: &mut SharedContext) -> Result<()> {
        for child in self.children.values_mut() {
            child.create_state(obs, ctx)?;
        }

        self.core.begin_state();
        self.encode_self(obs)?;
        let army = ctx.enemy_army_mat.read(NAME)?.clone();
        let buildings = ctx.enemy_building_mat.read(NAME)?.clone();
        self.copy_enemy_grid(region::ENEMY_ARMY_MAT, &army)?;
        self.copy_enemy_grid(region::ENEMY_BUILDING_MAT, &buildings)?;

        let time_line = self.core.layout().index(region::TIME_LINE);
        self.core.raw.set(time_line, ctx.num_step as f64);
        self.core.scale_with(|name, v| {
            if name == region::TIME_LINE {
                (v / TIME_LINE_BUCKETING).floor()
            } else {
                v
            }
        })
    }

    fn choose_action(&mut self) -> Result<ActionId> {
        for key in self.active_keys() {
            self.child_mut(key)?.choose_action()?;
        }

        if self.core.flags().play {
            let legal = legal_actions(&self.core.raw);
            self.core.select(legal, NUM_ACTIONS)
        } else {
            let action = self.core.acting_child().unwrap_or(DO_NOTHING);
            self.core.set_action(action);
            Ok(action)
        }
    }

    fn action_to_primitive(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
        action: ActionId,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)> {
        self.core.check_action(action, NUM_ACTIONS)?;
        self.core.commit(action);
        if action == DO_NOTHING {
            return Ok((PrimitiveAction::no_op(), true));
        }
        let child = self.child_mut(action)?;
        let child_action = child.core().current_action();
        child.action_to_primitive(obs, ctx, child_action, move_number)
    }

    fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
        for key in self.active_keys() {
            self.child_mut(key)?.learn(reward, terminal)?;
        }
        self.core.learn(reward, terminal)
    }

    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
        self.core.end_run(reward, score, steps)?;
        for key in self.active_keys() {
            self.child_mut(key)?.end_run(reward, score, steps)?;
        }
        Ok(())
    }

    fn is_do_nothing(&self, action: ActionId) -> Result<bool> {
        if action == DO_NOTHING {
            return Ok(true);
        }
        let child = self.child(action)?;
        child.is_do_nothing(child.core().current_action())
    }

    fn action_to_str(&self, action: ActionId) -> Result<String> {
        self.core.check_action(action, NUM_ACTIONS)?;
        if action == DO_NOTHING {
            return Ok(action_label(action).to_string());
        }
        let child = self.child(action)?;
        Ok(format!(
            "{}-->{}",
            action_label(action),
            child.action_to_str(child.core().current_action())?
        ))
    }

    fn children(&self) -> Vec<(ActionId, &dyn Agent)> {
        self.children.iter().map(|(k, c)| (*k, c.as_ref())).collect()
    }
}

/// Registry constructor
pub fn build(parts: AgentParts, children: Children) -> Result<Box<dyn Agent>> {
    Ok(Box::new(BattleManager::new(parts, children)?))
}

/// Scripted battle policy: fight the army first, then the buildings
pub struct NaiveBattleManager {
    name: String,
    layout: StateLayout,
}

impl NaiveBattleManager {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layout: layout(),
        }
    }
}

impl DecisionMaker for NaiveBattleManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn choose_action(
        &mut self,
        state: &StateVector,
        legal: &[ActionId],
        use_target: bool,
    ) -> Result<ActionId> {
        let values = self.action_values(state, use_target)?;
        legal
            .iter()
            .copied()
            .filter(|&a| a < values.len())
            .max_by(|a, b| values[*a].total_cmp(&values[*b]))
            .ok_or_else(|| HrlError::invariant(self.name.clone(), "legal action set is empty"))
    }

    fn action_values(&self, state: &StateVector, _use_target: bool) -> Result<Vec<f64>> {
        if state.len() != self.layout.size() {
            return Err(HrlError::DecisionMaker(format!(
                "{} expects {} state cells, got {}",
                self.name,
                self.layout.size(),
                state.len()
            )));
        }
        let mut values = vec![0.0; NUM_ACTIONS];
        if state.any_positive(self.layout.range(region::ENEMY_ARMY_MAT)) {
            values[ACTION_ARMY_BATTLE] = 2.0;
        }
        if state.any_positive(self.layout.range(region::ENEMY_BUILDING_MAT)) {
            values[ACTION_BASE_BATTLE] = 1.0;
        }
        Ok(values)
    }

    fn learn(&mut self, _transition: Transition) -> Result<()> {
        Ok(())
    }

    fn exploration_probability(&self) -> Result<f64> {
        Ok(0.0)
    }

    fn end_run(&mut self, _reward: f64, _score: f64, _steps: u64) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use hrl_core::{ActionSelection, Function, RunFlags, SharedDecisionMaker, share};

    use crate::agent::testing::{Log, Recording, empty_obs, paint_screen};
    use crate::agents::grid_attack::{ATTACK_START, GridAttack};
    use crate::features::unit;

    fn parts(name: &'static str, play: bool, dm: SharedDecisionMaker, acting: Option<ActionId>) -> AgentParts {
        AgentParts {
            name,
            flags: RunFlags {
                play,
                train: true,
                test: false,
            },
            selection: ActionSelection::Masked,
            decision_maker: dm,
            acting_child: acting,
            seed: Some(3),
        }
    }

    struct Fixture {
        manager: BattleManager,
        own: Arc<Mutex<Log>>,
        army: Arc<Mutex<Log>>,
        base: Arc<Mutex<Log>>,
    }

    fn fixture(manager_plays: bool) -> Fixture {
        let (own, own_log) = Recording::by_index(NAME, NUM_ACTIONS);
        let (army, army_log) = Recording::by_index("army", ATTACK_START + GRID_CELLS);
        let (base, base_log) = Recording::by_index("base", ATTACK_START + GRID_CELLS);
        let mut children: Children = Children::new();
        children.insert(
            ACTION_ARMY_BATTLE,
            Box::new(GridAttack::army(parts("army_attack", true, share(army), None))),
        );
        children.insert(
            ACTION_BASE_BATTLE,
            Box::new(GridAttack::base(parts("base_attack", manager_plays, share(base), None))),
        );
        let acting = (!manager_plays).then_some(ACTION_ARMY_BATTLE);
        let manager =
            BattleManager::new(parts(NAME, manager_plays, share(own), acting), children).unwrap();
        Fixture {
            manager,
            own: own_log,
            army: army_log,
            base: base_log,
        }
    }

    fn battle_obs() -> Observation {
        let mut obs = empty_obs();
        paint_screen(&mut obs, (14, 26), 3, unit::MARINE, relative::HOSTILE);
        paint_screen(&mut obs, (50, 50), 12, unit::BARRACKS, relative::HOSTILE);
        obs
    }

    #[test]
    fn test_children_publish_before_parent_reads() {
        let mut f = fixture(true);
        let mut ctx = SharedContext::new();
        let obs = battle_obs();
        f.manager.first_step(&obs).unwrap();
        f.manager.create_state(&obs, &mut ctx).unwrap();

        assert_eq!(
            legal_actions(&f.manager.core().raw),
            vec![DO_NOTHING, ACTION_ARMY_BATTLE, ACTION_BASE_BATTLE]
        );
        assert_eq!(f.manager.core().raw.len(), layout().size());
    }

    #[test]
    fn test_delegates_to_chosen_child() {
        let mut f = fixture(true);
        let mut ctx = SharedContext::new();
        let obs = battle_obs();
        f.manager.first_step(&obs).unwrap();

        let (primitive, terminal) = f.manager.step(&obs, &mut ctx, 0).unwrap();
        assert_eq!(f.manager.core().current_action(), ACTION_BASE_BATTLE);
        assert_eq!(primitive.function, Function::AttackScreen);
        assert!(terminal);
        assert!(f.manager.action_to_str(ACTION_BASE_BATTLE).unwrap().starts_with("BaseBattle-->AttackBuilding_"));
    }

    #[test]
    fn test_only_committed_agents_learn() {
        let mut f = fixture(true);
        let mut ctx = SharedContext::new();
        let obs = battle_obs();
        f.manager.first_step(&obs).unwrap();

        f.manager.step(&obs, &mut ctx, 0).unwrap();
        f.manager.step(&obs, &mut ctx, 0).unwrap();

        assert_eq!(f.own.lock().unwrap().transitions.len(), 1);
        assert_eq!(f.base.lock().unwrap().transitions.len(), 1);
        assert!(f.army.lock().unwrap().transitions.is_empty());
    }

    #[test]
    fn test_structural_parent_follows_acting_child() {
        let mut f = fixture(false);
        let mut ctx = SharedContext::new();
        let obs = battle_obs();
        f.manager.first_step(&obs).unwrap();

        let (primitive, _) = f.manager.step(&obs, &mut ctx, 0).unwrap();
        assert_eq!(f.manager.core().current_action(), ACTION_ARMY_BATTLE);
        assert_eq!(primitive.point(), Some(hrl_core::ScreenPoint::new(15, 27)));

        f.manager.learn(1.0, true).unwrap();
        f.manager.end_run(1.0, 5.0, 2).unwrap();
        assert_eq!(f.army.lock().unwrap().end_runs.len(), 1);
        assert!(f.base.lock().unwrap().end_runs.is_empty());
    }

    #[test]
    fn test_is_do_nothing_follows_child() {
        let f = fixture(true);
        assert!(f.manager.is_do_nothing(DO_NOTHING).unwrap());
        // children start on do-nothing
        assert!(f.manager.is_do_nothing(ACTION_ARMY_BATTLE).unwrap());

        let err = f.manager.is_do_nothing(NUM_ACTIONS).unwrap_err();
        assert!(matches!(err, HrlError::UnknownAction { .. }));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_decision_logged_with_state_fingerprint() {
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let mut f = fixture(true);
            let mut ctx = SharedContext::new();
            let obs = battle_obs();
            f.manager.first_step(&obs).unwrap();
            f.manager.step(&obs, &mut ctx, 0).unwrap();
            assert_eq!(f.manager.core().scaled.fingerprint().len(), 64);
        });
    }

    #[test]
    fn test_missing_enemy_grid_is_fatal() {
        let (own, _) = Recording::by_index(NAME, NUM_ACTIONS);
        let mut manager = BattleManager {
            core: AgentCore::new(parts(NAME, true, share(own), None), layout()),
            children: Children::new(),
        };
        let err = manager.create_state(&empty_obs(), &mut SharedContext::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_naive_prefers_army_battle() {
        let mut naive = NaiveBattleManager::new("naive");
        let mut state = layout().zeros();
        assert_eq!(naive.choose_action(&state, &[DO_NOTHING], true).unwrap(), DO_NOTHING);

        state.set(layout().range(region::ENEMY_BUILDING_MAT).start, 1.0);
        assert_eq!(naive.choose_action(&state, &legal_actions(&state), true).unwrap(), ACTION_BASE_BATTLE);

        state.set(layout().range(region::ENEMY_ARMY_MAT).start + 3, 2.0);
        assert_eq!(naive.choose_action(&state, &legal_actions(&state), true).unwrap(), ACTION_ARMY_BATTLE);
    }
}
