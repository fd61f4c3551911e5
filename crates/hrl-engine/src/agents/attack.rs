//! Attack agent: root of the battle hierarchy
//!
//! A playing attack agent picks a minimap quadrant and runs a multi-tick
//! sequence: select the army, then either send it to the quadrant or, when the
//! selection is already within engagement range of an enemy, move the camera
//! onto the fight and let the battle manager run its own nested decisions
//! before returning the camera to the base. A structural (non-playing) attack
//! agent forwards every tick to the battle manager.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use hrl_core::action::Arg;
use hrl_core::observation::layers::relative;
use hrl_core::{
    ActionId, DO_NOTHING, Function, HrlError, Observation, PrimitiveAction, Result, ScreenPoint,
    SharedContext, StateLayout, layers,
};

use crate::agent::{Agent, AgentCore, AgentParts, Children};
use crate::agents::grid_attack::TIME_LINE_BUCKETING;
use crate::features::{self, MINIMAP_SIZE};

pub const NAME: &str = "attack_agent";

/// Child key of the battle manager
pub const BATTLE_KEY: ActionId = 0;

/// Minimap quadrants per side
pub const GRID_SIZE: usize = 2;
/// First quadrant action; action `QUADRANT_START + q` attacks quadrant `q`
pub const QUADRANT_START: ActionId = 1;
pub const NUM_ACTIONS: usize = QUADRANT_START + GRID_SIZE * GRID_SIZE;

/// Minimap distance at which the selected army counts as engaged
pub const ENGAGE_RANGE: i64 = 10;

/// Ticks of the attack sequence around the nested battle
const FRAME_MOVES: u32 = 3;

pub mod region {
    pub const ENEMY: &str = "enemy";
    pub const ARMY: &str = "army";
    pub const ARMY_SIZE: &str = "army_size";
    pub const TIME_LINE: &str = "time_line";
}

pub fn layout() -> StateLayout {
    StateLayout::new()
        .region(region::ENEMY, GRID_SIZE * GRID_SIZE)
        .region(region::ARMY, GRID_SIZE * GRID_SIZE)
        .scalar(region::ARMY_SIZE)
        .scalar(region::TIME_LINE)
}

pub struct AttackAgent {
    core: AgentCore,
    battle: Box<dyn Agent>,
    /// Nested battle decision in progress
    battle_running: bool,
    /// Move number of the nested battle decision
    battle_move: u32,
}

impl AttackAgent {
    pub fn new(parts: AgentParts, battle: Box<dyn Agent>) -> Self {
        Self {
            core: AgentCore::new(parts, layout()),
            battle,
            battle_running: false,
            battle_move: 0,
        }
    }

    fn plays(&self) -> bool {
        self.core.flags().play
    }

    /// Do-nothing plus every quadrant with enemy presence
    pub fn legal_actions(&self) -> Vec<ActionId> {
        let offset = self.core.layout().range(region::ENEMY).start;
        let mut legal = vec![DO_NOTHING];
        for quadrant in 0..GRID_SIZE * GRID_SIZE {
            if self.core.raw.get(offset + quadrant) > 0.0 {
                legal.push(QUADRANT_START + quadrant);
            }
        }
        legal
    }

    /// Minimap point to attack in `quadrant`: the enemy pixel nearest its
    /// top-left corner, or the quadrant center when none is visible
    fn attack_coord(quadrant: usize, enemy: &[bool]) -> ScreenPoint {
        let (start, end) = features::cell_bounds(quadrant, MINIMAP_SIZE, GRID_SIZE);
        let mut best = ScreenPoint::new((start.y + end.y) / 2, (start.x + end.x) / 2);
        let mut best_dist = i64::MAX;
        for y in start.y..end.y {
            for x in start.x..end.x {
                let idx = y as usize * MINIMAP_SIZE + x as usize;
                if !enemy.get(idx).copied().unwrap_or(false) {
                    continue;
                }
                let p = ScreenPoint::new(y, x);
                let d = p.dist_sq(&start);
                if d < best_dist {
                    best_dist = d;
                    best = p;
                }
            }
        }
        best
    }

    /// Selected minimap pixel within engagement range of an enemy, if any
    fn engagement_point(obs: &Observation) -> Result<Option<ScreenPoint>> {
        let selected = obs.minimap_layer(layers::SELECTED)?.points_where(|v| v != 0);
        let enemy = obs
            .minimap_layer(layers::PLAYER_RELATIVE)?
            .points_where(|v| v == relative::HOSTILE);

        let closest = selected
            .iter()
            .flat_map(|s| enemy.iter().map(move |e| (s.dist_sq(e), *s)))
            .min_by_key(|(d, _)| *d);
        Ok(closest
            .filter(|(d, _)| *d < ENGAGE_RANGE * ENGAGE_RANGE)
            .map(|(_, s)| s))
    }

    fn select_army(obs: &Observation) -> Option<PrimitiveAction> {
        obs.is_available(Function::SelectArmy)
            .then(|| PrimitiveAction::new(Function::SelectArmy, vec![Arg::NotQueued]))
    }

    fn move_camera(target: ScreenPoint) -> PrimitiveAction {
        PrimitiveAction::new(Function::MoveCamera, vec![target.into()])
    }

    /// Second tick: send the selection to the quadrant or open a nested battle
    fn dispatch(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
        action: ActionId,
    ) -> Result<(PrimitiveAction, bool)> {
        let mut army: BTreeMap<u32, u32> = BTreeMap::new();
        for unit_type in &obs.selected_units {
            *army.entry(*unit_type).or_default() += 1;
        }
        let has_army = !army.is_empty();
        ctx.army_in_attack.publish(NAME, army)?;

        if !has_army {
            warn!("{}: no army selected, abandoning attack", NAME);
            return Ok((PrimitiveAction::no_op(), true));
        }

        if let Some(point) = Self::engagement_point(obs)? {
            self.battle_running = true;
            self.battle_move = 0;
            return Ok((Self::move_camera(point), false));
        }

        if !obs.is_available(Function::AttackMinimap) {
            debug!("{}: attack on minimap unavailable", NAME);
            return Ok((PrimitiveAction::no_op(), true));
        }
        let coord = Self::attack_coord(action - QUADRANT_START, ctx.enemy_minimap.read(NAME)?);
        Ok((
            PrimitiveAction::new(Function::AttackMinimap, vec![Arg::NotQueued, coord.into()]),
            true,
        ))
    }

    /// Later ticks: run the nested battle, then bring the camera home
    fn continue_battle(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
    ) -> Result<(PrimitiveAction, bool)> {
        if !self.battle_running {
            let base = *ctx.base_location.read(NAME)?;
            return Ok((Self::move_camera(base), true));
        }
        if self.battle_move >= self.battle.max_moves() {
            return Err(HrlError::invariant(
                NAME,
                format!("nested battle exceeded {} moves", self.battle.max_moves()),
            ));
        }
        let (primitive, terminal) = self.battle.step(obs, ctx, self.battle_move)?;
        self.battle_move += 1;
        self.battle_running = !terminal;
        Ok((primitive, false))
    }
}

impl Agent for AttackAgent {
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
        if self.plays() {
            FRAME_MOVES + self.battle.max_moves()
        } else {
            self.battle.max_moves()
        }
    }

    fn first_step(&mut self, obs: &Observation) -> Result<()> {
        self.core.reset_episode();
        self.battle_running = false;
        self.battle_move = 0;
        self.battle.first_step(obs)
    }

    fn create_state(&mut self, obs: &Observation, ctx: &mut SharedContext) -> Result<()> {
        self.battle.create_state(obs, ctx)?;

        let owners = obs.minimap_layer(layers::PLAYER_RELATIVE)?;
        let enemy: Vec<bool> = owners.data.iter().map(|v| *v == relative::HOSTILE).collect();
        if !ctx.base_location.is_written() {
            let own = owners.points_where(|v| v == relative::SELF);
            let half = (MINIMAP_SIZE / 2) as i32;
            let base = features::centroid(&own).unwrap_or(ScreenPoint::new(half, half));
            ctx.base_location.publish(NAME, base)?;
        }

        self.core.begin_state();
        let enemy_offset = self.core.layout().range(region::ENEMY).start;
        for p in owners.points_where(|v| v == relative::HOSTILE) {
            let quadrant = features::grid_cell(p, MINIMAP_SIZE, GRID_SIZE);
            self.core.raw.add(enemy_offset + quadrant, 1.0);
        }
        let army_offset = self.core.layout().range(region::ARMY).start;
        for p in obs.minimap_layer(layers::SELECTED)?.points_where(|v| v != 0) {
            let quadrant = features::grid_cell(p, MINIMAP_SIZE, GRID_SIZE);
            self.core.raw.add(army_offset + quadrant, 1.0);
        }
        if ctx.army_in_attack.is_written() {
            let size: u32 = ctx.army_in_attack.read(NAME)?.values().sum();
            let idx = self.core.layout().index(region::ARMY_SIZE);
            self.core.raw.set(idx, f64::from(size));
        }
        let time_line = self.core.layout().index(region::TIME_LINE);
        self.core.raw.set(time_line, ctx.num_step as f64);

        self.core.scale_with(|name, v| match name {
            region::ENEMY | region::ARMY => v.min(1.0),
            region::TIME_LINE => (v / TIME_LINE_BUCKETING).floor(),
            _ => v,
        })?;

        ctx.enemy_minimap.publish(NAME, enemy)
    }

    fn choose_action(&mut self) -> Result<ActionId> {
        if !self.plays() {
            self.core.set_action(DO_NOTHING);
            return Ok(DO_NOTHING);
        }
        let legal = self.legal_actions();
        self.core.select(legal, NUM_ACTIONS)
    }

    fn action_to_primitive(
        &mut self,
        obs: &Observation,
        ctx: &mut SharedContext,
        action: ActionId,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)> {
        self.core.check_action(action, NUM_ACTIONS)?;
        if !self.plays() {
            return self.battle.step(obs, ctx, move_number);
        }

        self.core.commit(action);
        if action == DO_NOTHING {
            return Ok((PrimitiveAction::no_op(), true));
        }
        match move_number {
            0 => {
                self.battle_running = false;
                match Self::select_army(obs) {
                    Some(select) => Ok((select, false)),
                    None => {
                        debug!("{}: army selection unavailable", NAME);
                        Ok((PrimitiveAction::no_op(), false))
                    }
                }
            }
            1 => self.dispatch(obs, ctx, action),
            _ => self.continue_battle(obs, ctx),
        }
    }

    fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
        // the nested battle learns at its own decision boundaries
        if terminal {
            self.battle.learn(reward, terminal)?;
        }
        self.core.learn(reward, terminal)
    }

    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
        self.core.end_run(reward, score, steps)?;
        self.battle.end_run(reward, score, steps)
    }

    fn is_do_nothing(&self, action: ActionId) -> Result<bool> {
        if self.plays() {
            Ok(action == DO_NOTHING)
        } else {
            self.battle.is_do_nothing(self.battle.core().current_action())
        }
    }

    fn action_to_str(&self, action: ActionId) -> Result<String> {
        self.core.check_action(action, NUM_ACTIONS)?;
        if !self.plays() {
            return self.battle.action_to_str(self.battle.core().current_action());
        }
        if action == DO_NOTHING {
            return Ok("DoNothing".to_string());
        }
        Ok(format!("GoTo_{}", action - QUADRANT_START))
    }

    fn children(&self) -> Vec<(ActionId, &dyn Agent)> {
        vec![(BATTLE_KEY, self.battle.as_ref())]
    }
}

/// Registry constructor
pub fn build(parts: AgentParts, mut children: Children) -> Result<Box<dyn Agent>> {
    let battle = children
        .remove(&BATTLE_KEY)
        .ok_or_else(|| HrlError::Config(format!("{} requires a battle manager", NAME)))?;
    if !children.is_empty() {
        return Err(HrlError::Config(format!("{} has unexpected children", NAME)));
    }
    Ok(Box::new(AttackAgent::new(parts, battle)))
}
