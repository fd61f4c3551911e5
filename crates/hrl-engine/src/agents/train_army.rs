//! Army trainer: queues units in the production buildings

use hrl_core::action::Arg;
use hrl_core::context::QueuedUnit;
use hrl_core::{
    ActionId, DO_NOTHING, Function, Observation, PrimitiveAction, Result, SharedContext,
    StateLayout, layers,
};
use tracing::debug;

use crate::agent::{Agent, AgentCore, AgentParts, Children};
use crate::agents::leaf_only;
use crate::features::{self, unit};
use crate::machine::{LEAF_MOVE_BOUND, MovePlan, run_move};

pub const NAME: &str = "trainer";

pub const ACTION_TRAIN_MARINE: ActionId = 1;
pub const ACTION_TRAIN_REAPER: ActionId = 2;
pub const ACTION_TRAIN_HELLION: ActionId = 3;
pub const ACTION_TRAIN_SIEGE_TANK: ActionId = 4;
pub const NUM_ACTIONS: usize = 5;

pub const MINERALS_BUCKETING: f64 = 50.0;
pub const MINERALS_MAX: f64 = 500.0;
pub const GAS_BUCKETING: f64 = 50.0;
pub const GAS_MAX: f64 = 300.0;

pub mod region {
    pub const MINERALS: &str = "minerals";
    pub const GAS: &str = "gas";
    pub const SUPPLY_DEPOTS: &str = "supply_depots";
    pub const BARRACKS: &str = "barracks";
    pub const FACTORIES: &str = "factories";
    pub const REACTORS: &str = "reactors";
    pub const TECHLABS: &str = "techlabs";
    pub const POWER: &str = "power";
    pub const BARRACKS_QUEUE: &str = "barracks_queue";
    pub const FACTORY_QUEUE: &str = "factory_queue";
    pub const TECHLAB_QUEUE: &str = "techlab_queue";
}

pub fn layout() -> StateLayout {
    StateLayout::new()
        .scalar(region::MINERALS)
        .scalar(region::GAS)
        .scalar(region::SUPPLY_DEPOTS)
        .scalar(region::BARRACKS)
        .scalar(region::FACTORIES)
        .scalar(region::REACTORS)
        .scalar(region::TECHLABS)
        .scalar(region::POWER)
        .scalar(region::BARRACKS_QUEUE)
        .scalar(region::FACTORY_QUEUE)
        .scalar(region::TECHLAB_QUEUE)
}

/// State cell counting each building type
const BUILDING_REGIONS: &[(u32, &str)] = &[
    (unit::SUPPLY_DEPOT, region::SUPPLY_DEPOTS),
    (unit::BARRACKS, region::BARRACKS),
    (unit::FACTORY, region::FACTORIES),
    (unit::REACTOR, region::REACTORS),
    (unit::TECHLAB, region::TECHLABS),
];

/// State cell holding each production queue's length
const QUEUE_REGIONS: &[(u32, &str)] = &[
    (unit::BARRACKS, region::BARRACKS_QUEUE),
    (unit::FACTORY, region::FACTORY_QUEUE),
    (unit::TECHLAB, region::TECHLAB_QUEUE),
];

/// Price, prerequisites and production details of one trainable unit
#[derive(Debug, Clone, Copy)]
pub struct Recipe {
    pub action: ActionId,
    pub label: &'static str,
    pub unit_type: u32,
    pub function: Function,
    pub minerals: f64,
    pub gas: f64,
    /// Building that must exist, and whose queue the unit joins
    pub requires: u32,
    /// Building clicked to issue the train command
    pub select: u32,
    /// Driver steps from queueing to completion
    pub build_steps: u32,
    /// Contribution to army power
    pub value: f64,
}

pub const RECIPES: &[Recipe] = &[
    Recipe {
        action: ACTION_TRAIN_MARINE,
        label: "TrainMarine",
        unit_type: unit::MARINE,
        function: Function::TrainMarine,
        minerals: 50.0,
        gas: 0.0,
        requires: unit::BARRACKS,
        select: unit::BARRACKS,
        build_steps: 18,
        value: 1.0,
    },
    Recipe {
        action: ACTION_TRAIN_REAPER,
        label: "TrainReaper",
        unit_type: unit::REAPER,
        function: Function::TrainReaper,
        minerals: 50.0,
        gas: 50.0,
        requires: unit::BARRACKS,
        select: unit::BARRACKS,
        build_steps: 32,
        value: 1.0,
    },
    Recipe {
        action: ACTION_TRAIN_HELLION,
        label: "TrainHellion",
        unit_type: unit::HELLION,
        function: Function::TrainHellion,
        minerals: 100.0,
        gas: 0.0,
        requires: unit::FACTORY,
        select: unit::FACTORY,
        build_steps: 21,
        value: 2.0,
    },
    Recipe {
        action: ACTION_TRAIN_SIEGE_TANK,
        label: "TrainSiegeTank",
        unit_type: unit::SIEGE_TANK,
        function: Function::TrainSiegeTank,
        minerals: 150.0,
        gas: 125.0,
        requires: unit::TECHLAB,
        select: unit::FACTORY,
        build_steps: 32,
        value: 4.0,
    },
];

pub fn recipe(action: ActionId) -> Option<&'static Recipe> {
    RECIPES.iter().find(|r| r.action == action)
}

fn recipe_for_unit(unit_type: u32) -> Option<&'static Recipe> {
    RECIPES.iter().find(|r| r.unit_type == unit_type)
}

/// Select the producing building, then queue the unit
struct TrainPlan {
    select: u32,
    function: Function,
}

impl MovePlan for TrainPlan {
    fn setup(&self, obs: &Observation) -> Option<PrimitiveAction> {
        let unit_types = obs.screen_layer(layers::UNIT_TYPE).ok()?;
        let target = features::building_point(unit_types, self.select)?;
        obs.is_available(Function::SelectPoint)
            .then(|| PrimitiveAction::new(Function::SelectPoint, vec![Arg::SelectAll, target.into()]))
    }

    fn commit(&self, obs: &Observation) -> Option<PrimitiveAction> {
        obs.is_available(self.function)
            .then(|| PrimitiveAction::new(self.function, vec![Arg::Queued]))
    }
}

/// Leaf choosing which unit to train
pub struct TrainArmy {
    core: AgentCore,
    /// Driver step at which the training queues were last advanced
    last_tick: u64,
}

impl TrainArmy {
    pub fn new(parts: AgentParts) -> Self {
        Self {
            core: AgentCore::new(parts, layout()),
            last_tick: 0,
        }
    }

    /// Do-nothing plus every unit whose price and building requirement are met
    pub fn legal_actions(&self) -> Vec<ActionId> {
        let layout = self.core.layout();
        let raw = &self.core.raw;
        let minerals = raw.get(layout.index(region::MINERALS));
        let gas = raw.get(layout.index(region::GAS));

        let mut legal = vec![DO_NOTHING];
        for recipe in RECIPES {
            let has_building = BUILDING_REGIONS
                .iter()
                .find(|(building, _)| *building == recipe.requires)
                .is_some_and(|(_, name)| raw.get(layout.index(name)) > 0.0);
            if has_building && minerals >= recipe.minerals && gas >= recipe.gas {
                legal.push(recipe.action);
            }
        }
        legal
    }

    /// Age the head of every queue by the steps since the last update and
    /// move finished units into the army
    fn advance_queues(&mut self, ctx: &mut SharedContext) -> Result<()> {
        let elapsed = ctx.num_step.saturating_sub(self.last_tick);
        self.last_tick = ctx.num_step;
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);

        let mut completed = Vec::new();
        for pending in ctx.training_queue.produce_mut(NAME)?.values_mut() {
            let mut budget = elapsed;
            while let Some(head) = pending.first_mut() {
                let build_steps = recipe_for_unit(head.unit_type).map_or(0, |r| r.build_steps);
                let remaining = build_steps.saturating_sub(head.steps_in_queue);
                if budget < remaining {
                    head.steps_in_queue += budget;
                    break;
                }
                budget -= remaining;
                completed.push(head.unit_type);
                pending.remove(0);
            }
        }

        let army = ctx.army_size.produce_mut(NAME)?;
        for unit_type in completed {
            debug!("{}: unit {} completed", NAME, unit_type);
            *army.entry(unit_type).or_default() += 1;
        }
        Ok(())
    }
}

impl Agent for TrainArmy {
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
        LEAF_MOVE_BOUND
    }

    fn first_step(&mut self, _obs: &Observation) -> Result<()> {
        self.core.reset_episode();
        self.last_tick = 0;
        Ok(())
    }

    fn create_state(&mut self, obs: &Observation, ctx: &mut SharedContext) -> Result<()> {
        self.advance_queues(ctx)?;

        self.core.begin_state();
        let layout = self.core.layout().clone();
        let raw = &mut self.core.raw;
        raw.set(layout.index(region::MINERALS), obs.player.minerals as f64);
        raw.set(layout.index(region::GAS), obs.player.vespene as f64);
        for (building, name) in BUILDING_REGIONS {
            let count = obs.own_buildings.get(building).copied().unwrap_or(0);
            raw.set(layout.index(name), f64::from(count));
        }

        let queues = ctx.training_queue.read(NAME)?;
        for (building, name) in QUEUE_REGIONS {
            let len = queues.get(building).map_or(0, Vec::len);
            raw.set(layout.index(name), len as f64);
        }

        let power: f64 = ctx
            .army_size
            .read(NAME)?
            .iter()
            .map(|(unit_type, count)| {
                f64::from(*count) * recipe_for_unit(*unit_type).map_or(0.0, |r| r.value)
            })
            .sum();
        raw.set(layout.index(region::POWER), power.round());

        self.core.scale_with(|name, v| match name {
            region::MINERALS => ((v / MINERALS_BUCKETING).floor() * MINERALS_BUCKETING).min(MINERALS_MAX),
            region::GAS => ((v / GAS_BUCKETING).floor() * GAS_BUCKETING).min(GAS_MAX),
            _ => v,
        })
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
        ctx: &mut SharedContext,
        action: ActionId,
        move_number: u32,
    ) -> Result<(PrimitiveAction, bool)> {
        self.core.check_action(action, NUM_ACTIONS)?;
        self.core.commit(action);
        let Some(recipe) = recipe(action) else {
            return Ok((PrimitiveAction::no_op(), true));
        };

        let plan = TrainPlan {
            select: recipe.select,
            function: recipe.function,
        };
        let (primitive, terminal) = run_move(NAME, &plan, obs, move_number)?;
        if primitive.function == recipe.function {
            ctx.training_queue
                .produce_mut(NAME)?
                .entry(recipe.requires)
                .or_default()
                .push(QueuedUnit {
                    unit_type: recipe.unit_type,
                    steps_in_queue: 0,
                });
            ctx.prev_action_reward.publish(NAME, recipe.value)?;
        }
        Ok((primitive, terminal))
    }

    fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
        self.core.learn(reward, terminal)
    }

    fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
        self.core.end_run(reward, score, steps)
    }

    fn action_to_str(&self, action: ActionId) -> Result<String> {
        self.core.check_action(action, NUM_ACTIONS)?;
        Ok(recipe(action).map_or("DoNothing", |r| r.label).to_string())
    }

    /// Value of the unit queued by the previous decision
    fn step_reward(&mut self, _obs: &Observation, ctx: &mut SharedContext) -> Result<f64> {
        Ok(std::mem::take(ctx.prev_action_reward.produce_mut(NAME)?))
    }
}

/// Registry constructor
pub fn build(parts: AgentParts, children: Children) -> Result<Box<dyn Agent>> {
    leaf_only(NAME, &children)?;
    Ok(Box::new(TrainArmy::new(parts)))
}
