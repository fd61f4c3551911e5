//! Screen-grid attack leaves: army attack and base attack
//!
//! Both leaves split the screen into a 5×5 grid, encode own army power and
//! enemy power per cell plus a bucketed time line, and attack one occupied
//! cell per decision. They differ only in which enemy units they target and
//! which shared-context field receives their enemy grid.

use std::collections::BTreeMap;

use hrl_core::{
    ActionId, DO_NOTHING, Function, Observation, PrimitiveAction, ProducedSlot, Result,
    ScreenPoint, SharedContext, StateLayout, layers,
};
use hrl_core::action::Arg;
use hrl_core::observation::layers::relative;

use crate::agent::{Agent, AgentCore, AgentParts, Children};
use crate::agents::leaf_only;
use crate::features::{self, ARMY_SPEC, BUILDING_SPEC, SCREEN_SIZE, UnitSpec};
use crate::machine::{MovePlan, run_move};

/// Cells per side of the battle grid
pub const GRID_SIZE: usize = 5;
/// Cells of the battle grid
pub const GRID_CELLS: usize = GRID_SIZE * GRID_SIZE;
/// First attack action; action `ATTACK_START + k` attacks cell `k`
pub const ATTACK_START: ActionId = 1;
pub const NUM_ACTIONS: usize = ATTACK_START + GRID_CELLS;
/// Driver steps per time-line bucket
pub const TIME_LINE_BUCKETING: f64 = 25.0;

pub const ARMY_ATTACK: &str = "army_attack";
pub const BASE_ATTACK: &str = "base_attack";

pub mod region {
    pub const SELF_MAT: &str = "self_mat";
    pub const ENEMY_MAT: &str = "enemy_mat";
    pub const TIME_LINE: &str = "time_line";
}

/// Which enemy units a grid-attack leaf targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetClass {
    Army,
    Buildings,
}

impl TargetClass {
    fn agent_name(self) -> &'static str {
        match self {
            TargetClass::Army => ARMY_ATTACK,
            TargetClass::Buildings => BASE_ATTACK,
        }
    }

    fn specs(self) -> &'static [UnitSpec] {
        match self {
            TargetClass::Army => ARMY_SPEC,
            TargetClass::Buildings => BUILDING_SPEC,
        }
    }

    fn slot(self, ctx: &mut SharedContext) -> &mut ProducedSlot<Vec<f64>> {
        match self {
            TargetClass::Army => &mut ctx.enemy_army_mat,
            TargetClass::Buildings => &mut ctx.enemy_building_mat,
        }
    }

    fn label(self) -> &'static str {
        match self {
            TargetClass::Army => "AttackArmy",
            TargetClass::Buildings => "AttackBuilding",
        }
    }
}

pub fn layout() -> StateLayout {
    StateLayout::new()
        .region(region::SELF_MAT, GRID_CELLS)
        .region(region::ENEMY_MAT, GRID_CELLS)
        .scalar(region::TIME_LINE)
}

/// Leaf attacking one cell of the screen grid
pub struct GridAttack {
    core: AgentCore,
    target: TargetClass,
    /// Screen coordinate to attack per occupied cell, closest to own army
    targets: BTreeMap<usize, ScreenPoint>,
}

impl GridAttack {
    pub fn new(parts: AgentParts, target: TargetClass) -> Self {
        Self {
            core: AgentCore::new(parts, layout()),
            target,
            targets: BTreeMap::new(),
        }
    }

    pub fn army(parts: AgentParts) -> Self {
        Self::new(parts, TargetClass::Army)
    }

    pub fn base(parts: AgentParts) -> Self {
        Self::new(parts, TargetClass::Buildings)
    }

    /// Remembered attack coordinate of `cell`
    pub fn target_of(&self, cell: usize) -> Option<ScreenPoint> {
        self.targets.get(&cell).copied()
    }

    /// Do-nothing plus one attack per cell holding a detected enemy
    pub fn legal_actions(&self) -> Vec<ActionId> {
        let mut legal = vec![DO_NOTHING];
        legal.extend(self.targets.keys().map(|cell| ATTACK_START + cell));
        legal
    }

    /// Own army power per cell; returns the centroid of every own army pixel
    fn encode_self(&mut self, unit_types: &hrl_core::Grid, owners: &hrl_core::Grid) -> Option<ScreenPoint> {
        let offset = self.core.layout().range(region::SELF_MAT).start;
        let mut all = Vec::new();
        for spec in ARMY_SPEC {
            let pixels = features::unit_pixels(unit_types, owners, spec.unit_type, relative::SELF);
            for cluster in features::clusters(&pixels) {
                let cell = features::grid_cell(cluster.center, SCREEN_SIZE, GRID_SIZE);
                self.core.raw.add(offset + cell, cluster.power(spec.screen_pixels));
            }
            all.extend(pixels);
        }
        features::centroid(&all)
    }

    fn encode_enemy(
        &mut self,
        unit_types: &hrl_core::Grid,
        owners: &hrl_core::Grid,
        own_center: Option<ScreenPoint>,
    ) {
        let offset = self.core.layout().range(region::ENEMY_MAT).start;
        self.targets.clear();
        for spec in self.target.specs() {
            let pixels = features::unit_pixels(unit_types, owners, spec.unit_type, relative::HOSTILE);
            for cluster in features::clusters(&pixels) {
                let cell = features::grid_cell(cluster.center, SCREEN_SIZE, GRID_SIZE);
                self.core.raw.add(offset + cell, cluster.power(spec.screen_pixels));
                let point = cluster.center;
                self.targets
                    .entry(cell)
                    .and_modify(|best| {
                        if let Some(own) = own_center {
                            if point.dist_sq(&own) < best.dist_sq(&own) {
                                *best = point;
                            }
                        }
                    })
                    .or_insert(point);
            }
        }
    }
}

/// Single-tick attack command
enum AttackPlan {
    /// Halt the current attack
    Hold,
    Strike(Option<ScreenPoint>),
}

impl MovePlan for AttackPlan {
    fn has_setup(&self) -> bool {
        false
    }

    fn commit(&self, obs: &Observation) -> Option<PrimitiveAction> {
        match self {
            AttackPlan::Hold => obs
                .is_available(Function::Stop)
                .then(|| PrimitiveAction::new(Function::Stop, vec![Arg::NotQueued])),
            AttackPlan::Strike(target) => {
                let target = (*target)?;
                obs.is_available(Function::AttackScreen).then(|| {
                    PrimitiveAction::new(Function::AttackScreen, vec![Arg::NotQueued, target.into()])
                })
            }
        }
    }
}

impl Agent for GridAttack {
    fn name(&self) -> &'static str {
        self.core.name()
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
        1
    }

    fn first_step(&mut self, _obs: &Observation) -> Result<()> {
        self.core.reset_episode();
        self.targets.clear();
        Ok(())
    }

    fn create_state(&mut self, obs: &Observation, ctx: &mut SharedContext) -> Result<()> {
        let unit_types = obs.screen_layer(layers::UNIT_TYPE)?;
        let owners = obs.screen_layer(layers::PLAYER_RELATIVE)?;

        self.core.begin_state();
        let own_center = self.encode_self(unit_types, owners);
        self.encode_enemy(unit_types, owners, own_center);

        let time_line = self.core.layout().index(region::TIME_LINE);
        self.core.raw.set(time_line, ctx.num_step as f64);
        self.core.scale_with(|name, v| {
            if name == region::TIME_LINE {
                (v / TIME_LINE_BUCKETING).floor()
            } else {
                v
            }
        })?;

        let enemy = self.core.raw.slice(self.core.layout().range(region::ENEMY_MAT)).to_vec();
        let name = self.target.agent_name();
        self.target.slot(ctx).publish(name, enemy)
    }

    fn choose_action(&mut self) -> Result<ActionId> {
        if !self.core.flags().play {
            self.core.set_action(DO_NOTHING);
            return Ok(DO_NOTHING);
        }
        let legal = self.legal_actions();
        self.core.select(legal, NUM_ACTIONS)
    }

    fn action_to_primitive(
        &mut self,
        obs: &Observation,
        _ctx: &mut SharedContext,
        action: ActionId,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)> {
        self.core.check_action(action, NUM_ACTIONS)?;
        self.core.commit(action);

        let plan = if action == DO_NOTHING {
            AttackPlan::Hold
        } else {
            AttackPlan::Strike(self.target_of(action - ATTACK_START))
        };
        run_move(self.name(), &plan, obs, move_number)
    }

    fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
        self.core.learn(reward, terminal)
    }

    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
        self.core.end_run(reward, score, steps)
    }

    fn action_to_str(&self, action: ActionId) -> Result<String> {
        self.core.check_action(action, NUM_ACTIONS)?;
        if action == DO_NOTHING {
            return Ok("DoNothing".to_string());
        }
        let cell = action - ATTACK_START;
        Ok(format!(
            "{}_{}_{}",
            self.target.label(),
            cell / GRID_SIZE,
            cell % GRID_SIZE
        ))
    }
}

/// Registry constructor for the army-attack leaf
pub fn build_army(parts: AgentParts, children: Children) -> Result<Box<dyn Agent>> {
    leaf_only(ARMY_ATTACK, &children)?;
    Ok(Box::new(GridAttack::army(parts)))
}

/// Registry constructor for the base-attack leaf
pub fn build_base(parts: AgentParts, children: Children) -> Result<Box<dyn Agent>> {
    leaf_only(BASE_ATTACK, &children)?;
    Ok(Box::new(GridAttack::base(parts)))
}
