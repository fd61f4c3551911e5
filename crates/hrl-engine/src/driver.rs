//! Step driver and environment boundary
//!
//! The driver feeds one observation at a time to the root agent, keeps the
//! move number of the decision in progress and closes the episode on the last
//! observation by propagating the normalized terminal reward down the tree.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use hrl_core::{HrlError, Observation, Outcome, PrimitiveAction, Result, SharedContext};

use crate::tree::AgentTree;

/// Result of one finished episode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct EpisodeSummary {
    /// Environment ticks driven through the tree
    pub steps: u64,
    /// Logical decisions started by the root
    pub decisions: u64,
    pub raw_reward: f64,
    /// Terminal reward after normalization
    pub reward: f64,
    pub score: f64,
    pub outcome: Outcome,
}

/// What the caller should do after an observation
#[derive(Debug, Clone, PartialEq)]
pub enum DriverEvent {
    /// Issue this primitive to the environment
    Act(PrimitiveAction),
    /// The episode is over
    EpisodeEnd(EpisodeSummary),
}

/// Drives an agent tree one observation at a time
pub struct StepDriver {
    tree: AgentTree,
    ctx: SharedContext,
    move_number: u32,
    steps: u64,
    decisions: u64,
    in_episode: bool,
    halted: Option<String>,
}

impl StepDriver {
    pub fn new(tree: AgentTree) -> Self {
        Self {
            tree,
            ctx: SharedContext::new(),
            move_number: 0,
            steps: 0,
            decisions: 0,
            in_episode: false,
            halted: None,
        }
    }

    pub fn tree(&self) -> &AgentTree {
        &self.tree
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    /// Move number the next observation will be driven with
    pub fn move_number(&self) -> u32 {
        self.move_number
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Drive the tree with one observation
    ///
    /// A fatal error halts the driver for good; any other error ends the
    /// current episode and waits for the next first observation.
    pub fn observe(&mut self, obs: &Observation) -> Result<DriverEvent> {
        if let Some(reason) = &self.halted {
            return Err(HrlError::invariant(
                "driver",
                format!("halted after fatal error: {}", reason),
            ));
        }

        let result = self.advance(obs);
        if let Err(e) = &result {
            if e.is_fatal() {
                error!("halting run: {}", e);
                self.halted = Some(e.to_string());
            } else {
                error!("episode stopped: {}", e);
            }
            self.in_episode = false;
        }
        result
    }

    fn advance(&mut self, obs: &Observation) -> Result<DriverEvent> {
        obs.validate()?;
        if obs.is_first() {
            self.begin_episode(obs)?;
        } else if !self.in_episode {
            return Err(HrlError::Environment(
                "observation received outside an episode".to_string(),
            ));
        }

        if obs.is_last() {
            return self.finish_episode(obs).map(DriverEvent::EpisodeEnd);
        }

        let bound = self.tree.max_moves();
        if self.move_number >= bound {
            return Err(HrlError::invariant(
                self.tree.root().name(),
                format!(
                    "decision did not terminate within {} moves",
                    bound
                ),
            ));
        }

        self.ctx.num_step = self.steps;
        self.steps += 1;
        if self.move_number == 0 {
            self.decisions += 1;
        }

        let (primitive, terminal) =
            self.tree
                .root_mut()
                .step(obs, &mut self.ctx, self.move_number)?;
        debug!(
            "step {} move {} -> {}{}",
            self.ctx.num_step,
            self.move_number,
            primitive,
            if terminal { " (terminal)" } else { "" }
        );
        self.move_number = if terminal { 0 } else { self.move_number + 1 };
        Ok(DriverEvent::Act(primitive))
    }

    fn begin_episode(&mut self, obs: &Observation) -> Result<()> {
        self.ctx = SharedContext::new();
        self.move_number = 0;
        self.steps = 0;
        self.decisions = 0;
        self.tree.root_mut().first_step(obs)?;
        self.in_episode = true;
        info!("episode started for {}", self.tree.root().name());
        Ok(())
    }

    fn finish_episode(&mut self, obs: &Observation) -> Result<EpisodeSummary> {
        let normalization = self.tree.normalization();
        let reward = normalization.normalize(obs.reward);
        let steps = self.steps;

        let root = self.tree.root_mut();
        root.learn(reward, true)?;
        root.end_run(reward, obs.score, steps)?;

        self.in_episode = false;
        self.move_number = 0;
        let summary = EpisodeSummary {
            steps,
            decisions: self.decisions,
            raw_reward: obs.reward,
            reward,
            score: obs.score,
            outcome: normalization.outcome(obs.reward),
        };
        info!(
            "episode finished: {:?} after {} steps, {} decisions, score {}",
            summary.outcome, summary.steps, summary.decisions, summary.score
        );
        Ok(summary)
    }
}

/// Source of observations and sink of primitive actions
#[async_trait]
pub trait Environment: Send {
    /// Start an episode; the returned observation must be marked first
    async fn reset(&mut self) -> Result<Observation>;

    /// Apply one primitive and return the next observation
    async fn step(&mut self, action: PrimitiveAction) -> Result<Observation>;
}

/// Run one full episode of `driver` against `env`
pub async fn run_episode<E: Environment + ?Sized>(
    driver: &mut StepDriver,
    env: &mut E,
) -> Result<EpisodeSummary> {
    let mut obs = env.reset().await?;
    loop {
        match driver.observe(&obs)? {
            DriverEvent::Act(action) => obs = env.step(action).await?,
            DriverEvent::EpisodeEnd(summary) => return Ok(summary),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use hrl_core::observation::layers::relative;
    use hrl_core::{
        ActionId, DecisionMakerSpec, Function, Grid, RewardNormalization, RunConfig, RunFlags,
        SharedDecisionMaker, StateLayout, layers, share,
    };

    use crate::agent::testing::{Log, Recording, empty_obs, paint_screen};
    use crate::agent::{Agent, AgentCore, AgentParts};
    use crate::features::unit;
    use crate::tree::{
        AgentKind, DecisionMakerPool, DecisionMakerProvider, DecisionMakerRequest,
    };

    /// Hands out recording decision makers and keeps their logs by agent
    #[derive(Clone, Default)]
    struct RecordingProvider {
        logs: Arc<Mutex<BTreeMap<String, Arc<Mutex<Log>>>>>,
    }

    impl RecordingProvider {
        fn log(&self, agent: &str) -> Arc<Mutex<Log>> {
            self.logs.lock().unwrap()[agent].clone()
        }
    }

    impl DecisionMakerProvider for RecordingProvider {
        fn create(&self, request: &DecisionMakerRequest<'_>) -> Result<SharedDecisionMaker> {
            let (dm, log) = Recording::by_index(request.name, request.num_actions);
            self.logs
                .lock()
                .unwrap()
                .insert(request.agent.to_string(), log);
            Ok(share(dm))
        }
    }

    fn driver(root: AgentKind, config: RunConfig) -> (StepDriver, RecordingProvider) {
        let provider = RecordingProvider::default();
        let mut pool = DecisionMakerPool::new(Box::new(provider.clone()));
        let tree = AgentTree::build(root, &config.with_seed(21), &mut pool).unwrap();
        (StepDriver::new(tree), provider)
    }

    fn with_recording(mut config: RunConfig, agents: &[&str]) -> RunConfig {
        for agent in agents {
            config = config.with_decision_maker(agent, DecisionMakerSpec::of_kind("rec"));
        }
        config
    }

    fn training_obs() -> Observation {
        let mut obs = empty_obs();
        obs.player.minerals = 100;
        obs.own_buildings.insert(unit::BARRACKS, 1);
        paint_screen(&mut obs, (30, 30), 12, unit::BARRACKS, relative::SELF);
        obs.available_actions.insert(Function::TrainMarine);
        obs
    }

    fn first(mut obs: Observation) -> Observation {
        obs.first = true;
        obs
    }

    fn last(mut obs: Observation, reward: f64) -> Observation {
        obs.last = true;
        obs.reward = reward;
        obs.score = 42.0;
        obs
    }

    #[test]
    fn test_learn_waits_for_decision_boundary() {
        let cfg = with_recording(RunConfig::default().playing("trainer").training("trainer"), &["trainer"]);
        let (mut driver, provider) = driver(AgentKind::TrainArmy, cfg);
        let log = provider.log("trainer");
        let obs = training_obs();

        let event = driver.observe(&first(obs.clone())).unwrap();
        assert!(matches!(event, DriverEvent::Act(ref a) if a.function == Function::SelectPoint));
        assert_eq!(driver.move_number(), 1);
        assert!(log.lock().unwrap().transitions.is_empty());

        let event = driver.observe(&obs).unwrap();
        assert!(matches!(event, DriverEvent::Act(ref a) if a.function == Function::TrainMarine));
        assert_eq!(driver.move_number(), 0);
        assert!(log.lock().unwrap().transitions.is_empty());

        driver.observe(&obs).unwrap();
        assert_eq!(log.lock().unwrap().transitions.len(), 1);
        assert_eq!(driver.move_number(), 1);
    }

    #[test]
    fn test_terminal_reward_reaches_active_path_once() {
        let agents = ["attack_agent", "battle_mngr", "army_attack", "base_attack"];
        let mut cfg = with_recording(RunConfig::default().playing("army_attack"), &agents);
        for agent in agents {
            cfg = cfg.training(agent);
        }
        let (mut driver, provider) = driver(AgentKind::Attack, cfg);
        let mut obs = empty_obs();
        paint_screen(&mut obs, (14, 26), 3, unit::MARINE, relative::HOSTILE);

        driver.observe(&first(obs.clone())).unwrap();
        driver.observe(&obs).unwrap();
        let event = driver.observe(&last(obs, 0.0)).unwrap();

        let DriverEvent::EpisodeEnd(summary) = event else {
            panic!("expected episode end");
        };
        assert_eq!(summary.reward, -1.0);
        assert_eq!(summary.outcome, Outcome::Loss);
        assert_eq!(summary.steps, 2);
        assert_eq!(summary.decisions, 2);

        for agent in ["attack_agent", "battle_mngr", "army_attack"] {
            let log = provider.log(agent);
            assert_eq!(log.lock().unwrap().end_runs, vec![(-1.0, 42.0, 2)], "{}", agent);
        }
        assert!(provider.log("base_attack").lock().unwrap().end_runs.is_empty());

        let army = provider.log("army_attack");
        let army = army.lock().unwrap();
        assert_eq!(army.transitions.len(), 2);
        assert!(army.transitions[1].terminal);
        assert_eq!(army.transitions[1].reward, -1.0);
    }

    #[test]
    fn test_positive_reward_normalizes_to_win() {
        let cfg = with_recording(RunConfig::default().playing("trainer").training("trainer"), &["trainer"]);
        let (mut driver, provider) = driver(AgentKind::TrainArmy, cfg);
        let obs = training_obs();

        driver.observe(&first(obs.clone())).unwrap();
        let DriverEvent::EpisodeEnd(summary) = driver.observe(&last(obs, 7.5)).unwrap() else {
            panic!("expected episode end");
        };
        assert_eq!(summary.reward, 1.0);
        assert_eq!(summary.outcome, Outcome::Win);
        let log = provider.log("trainer");
        let log = log.lock().unwrap();
        assert_eq!(log.end_runs, vec![(1.0, 42.0, 1)]);
        assert_eq!(log.transitions.len(), 1);
        assert!(log.transitions[0].terminal);
    }

    #[test]
    fn test_neutral_reward_with_three_way_policy() {
        let mut config = with_recording(RunConfig::default().playing("trainer"), &["trainer"]);
        config.test.insert("trainer".to_string());
        config.reward_normalization = RewardNormalization::WinLossNeutral;
        let (mut driver, provider) = driver(AgentKind::TrainArmy, config);

        driver.observe(&first(training_obs())).unwrap();
        let DriverEvent::EpisodeEnd(summary) = driver.observe(&last(training_obs(), 0.0)).unwrap() else {
            panic!("expected episode end");
        };
        assert_eq!(summary.outcome, Outcome::Neutral);
        assert_eq!(provider.log("trainer").lock().unwrap().end_runs, vec![(0.0, 42.0, 1)]);
        assert!(provider.log("trainer").lock().unwrap().transitions.is_empty());
    }

    #[test]
    fn test_empty_battlefield_does_nothing() {
        let cfg = with_recording(RunConfig::default().playing("battle_mngr"), &["battle_mngr"]);
        let (mut driver, _) = driver(AgentKind::BattleManager, cfg);

        let event = driver.observe(&first(empty_obs())).unwrap();
        assert_eq!(event, DriverEvent::Act(PrimitiveAction::no_op()));
        assert_eq!(driver.tree().root().core().current_action(), 0);
        assert_eq!(driver.move_number(), 0);
    }

    #[test]
    fn test_context_is_fresh_each_episode() {
        let cfg = RunConfig::default().playing("trainer");
        let (mut driver, _) = driver(AgentKind::TrainArmy, cfg);
        let obs = training_obs();

        driver.observe(&first(obs.clone())).unwrap();
        driver.observe(&obs).unwrap();
        assert_eq!(driver.context().training_queue.read("test").unwrap().len(), 1);
        driver.observe(&last(obs.clone(), 1.0)).unwrap();

        driver.observe(&first(obs)).unwrap();
        assert!(driver.context().training_queue.read("test").unwrap().is_empty());
        assert!(driver.observe(&empty_obs()).is_ok());
    }

    #[test]
    fn test_observation_outside_episode_rejected() {
        let (mut driver, _) = driver(AgentKind::TrainArmy, RunConfig::default());
        let err = driver.observe(&training_obs()).unwrap_err();
        assert!(!err.is_fatal());
        assert!(!driver.is_halted());
    }

    #[test]
    fn test_mismatched_layers_end_episode() {
        let (mut driver, _) = driver(AgentKind::TrainArmy, RunConfig::default().playing("trainer"));
        let mut obs = first(training_obs());
        obs.screen
            .insert(layers::PLAYER_RELATIVE.to_string(), Grid::new(32, 32));

        let err = driver.observe(&obs).unwrap_err();
        assert!(matches!(err, HrlError::Environment(_)));
        assert!(!driver.is_halted());
        assert!(driver.observe(&first(training_obs())).is_ok());
    }

    #[test]
    fn test_multi_threaded_training_episode() {
        let mut cfg = with_recording(RunConfig::default().playing("trainer").training("trainer"), &["trainer"]);
        cfg.multi_threaded = true;
        let (mut driver, provider) = driver(AgentKind::TrainArmy, cfg);
        let log = provider.log("trainer");
        let obs = training_obs();

        driver.observe(&first(obs.clone())).unwrap();
        driver.observe(&obs).unwrap();
        driver.observe(&last(obs, 1.0)).unwrap();
        // dropping the tree drains and joins the learner thread
        drop(driver);

        let log = log.lock().unwrap();
        assert_eq!(log.transitions.len(), 1);
        assert!(log.transitions[0].terminal);
        assert_eq!(log.transitions[0].reward, 1.0);
        assert_eq!(log.end_runs, vec![(1.0, 42.0, 2)]);
    }

    /// Agent whose decisions never terminate
    struct Stuck {
        core: AgentCore,
    }

    impl Agent for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }
        fn core(&self) -> &AgentCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut AgentCore {
            &mut self.core
        }
        fn num_actions(&self) -> usize {
            1
        }
        fn max_moves(&self) -> u32 {
            2
        }
        fn first_step(&mut self, _obs: &Observation) -> Result<()> {
            self.core.reset_episode();
            Ok(())
        }
        fn create_state(&mut self, _obs: &Observation, _ctx: &mut SharedContext) -> Result<()> {
            Ok(())
        }
        fn choose_action(&mut self) -> Result<ActionId> {
            self.core.select(vec![0], 1)
        }
        fn action_to_primitive(
            &mut self,
            _obs: &Observation,
            _ctx: &mut SharedContext,
            action: ActionId,
            _move_number: u32,
        ) -> Result<(PrimitiveAction, bool)> {
            self.core.commit(action);
            Ok((PrimitiveAction::no_op(), false))
        }
        fn learn(&mut self, reward: f64, terminal: bool) -> Result<()> {
            self.core.learn(reward, terminal)
        }
        fn end_run(&mut self, reward: f64, score: f64, steps: u64) -> Result<()> {
            self.core.end_run(reward, score, steps)
        }
        fn action_to_str(&self, _action: ActionId) -> Result<String> {
            Ok("Wait".to_string())
        }
    }

    #[test]
    fn test_unbounded_decision_halts_run() {
        let (dm, _) = Recording::by_index("stuck", 1);
        let parts = AgentParts {
            name: "stuck",
            flags: RunFlags {
                play: true,
                train: false,
                test: false,
            },
            selection: Default::default(),
            decision_maker: share(dm),
            acting_child: None,
            seed: Some(0),
        };
        let stuck = Stuck {
            core: AgentCore::new(parts, StateLayout::new().scalar("t")),
        };
        let mut driver = StepDriver::new(AgentTree::new(Box::new(stuck), RewardNormalization::Binary));
        let obs = empty_obs();

        driver.observe(&first(obs.clone())).unwrap();
        driver.observe(&obs).unwrap();
        let err = driver.observe(&obs).unwrap_err();
        assert!(err.is_fatal());
        assert!(driver.is_halted());
        assert!(driver.observe(&first(obs)).unwrap_err().is_fatal());
    }

    /// Plays back a fixed observation list and records the actions it receives
    struct ScriptedEnvironment {
        script: VecDeque<Observation>,
        received: Vec<PrimitiveAction>,
    }

    #[async_trait]
    impl Environment for ScriptedEnvironment {
        async fn reset(&mut self) -> Result<Observation> {
            self.script
                .pop_front()
                .ok_or_else(|| HrlError::Environment("empty script".to_string()))
        }

        async fn step(&mut self, action: PrimitiveAction) -> Result<Observation> {
            self.received.push(action);
            self.script
                .pop_front()
                .ok_or_else(|| HrlError::Environment("script exhausted".to_string()))
        }
    }

    #[test]
    fn test_run_episode_against_environment() {
        let cfg = RunConfig::default().playing("trainer");
        let (mut driver, _) = driver(AgentKind::TrainArmy, cfg);
        let obs = training_obs();
        let mut env = ScriptedEnvironment {
            script: VecDeque::from(vec![
                first(obs.clone()),
                obs.clone(),
                obs.clone(),
                last(obs, -3.0),
            ]),
            received: Vec::new(),
        };

        let summary = tokio_test::block_on(run_episode(&mut driver, &mut env)).unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.decisions, 2);
        assert_eq!(summary.outcome, Outcome::Loss);
        let functions: Vec<Function> = env.received.iter().map(|a| a.function).collect();
        assert_eq!(
            functions,
            vec![Function::SelectPoint, Function::TrainMarine, Function::SelectPoint]
        );
    }

    #[tokio::test]
    async fn test_exhausted_environment_is_an_error() {
        let (mut driver, _) = driver(AgentKind::TrainArmy, RunConfig::default().playing("trainer"));
        let mut env = ScriptedEnvironment {
            script: VecDeque::from(vec![first(training_obs())]),
            received: Vec::new(),
        };
        let err = run_episode(&mut driver, &mut env).await.unwrap_err();
        assert!(matches!(err, HrlError::Environment(_)));
        assert_eq!(env.received.len(), 1);
    }
}
