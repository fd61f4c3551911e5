//! Static agent registry and tree builder
//!
//! The hierarchy is declared once in [`REGISTRY`]: every agent kind names its
//! children by the key that activates them and the constructor that builds
//! it. [`AgentTree::build`] walks that declaration with an immutable
//! [`RunConfig`], attaches decision makers through a [`DecisionMakerPool`] and
//! resolves which descendant acts for every structural ancestor.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};

use hrl_core::{
    ActionId, BackgroundLearner, DecisionMakerSpec, HrlError, NullDecisionMaker, Result,
    RewardNormalization, RunConfig, SharedDecisionMaker, lock_decision_maker, share,
};

use crate::agent::{Agent, AgentParts, Children, find_agent};
use crate::agents::battle_manager::{self, NaiveBattleManager};
use crate::agents::{attack, grid_attack, train_army};

/// Every agent type the registry can build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AgentKind {
    Attack,
    BattleManager,
    ArmyAttack,
    BaseAttack,
    TrainArmy,
}

/// Constructor of one agent kind from its parts and already-built children
pub type Factory = fn(AgentParts, Children) -> Result<Box<dyn Agent>>;

/// Static declaration of one agent kind
pub struct Registration {
    pub kind: AgentKind,
    pub name: &'static str,
    pub num_actions: usize,
    /// Child key and kind, in construction order
    pub children: &'static [(ActionId, AgentKind)],
    pub build: Factory,
}

pub static REGISTRY: &[Registration] = &[
    Registration {
        kind: AgentKind::Attack,
        name: attack::NAME,
        num_actions: attack::NUM_ACTIONS,
        children: &[(attack::BATTLE_KEY, AgentKind::BattleManager)],
        build: attack::build,
    },
    Registration {
        kind: AgentKind::BattleManager,
        name: battle_manager::NAME,
        num_actions: battle_manager::NUM_ACTIONS,
        children: &[
            (battle_manager::ACTION_ARMY_BATTLE, AgentKind::ArmyAttack),
            (battle_manager::ACTION_BASE_BATTLE, AgentKind::BaseAttack),
        ],
        build: battle_manager::build,
    },
    Registration {
        kind: AgentKind::ArmyAttack,
        name: grid_attack::ARMY_ATTACK,
        num_actions: grid_attack::NUM_ACTIONS,
        children: &[],
        build: grid_attack::build_army,
    },
    Registration {
        kind: AgentKind::BaseAttack,
        name: grid_attack::BASE_ATTACK,
        num_actions: grid_attack::NUM_ACTIONS,
        children: &[],
        build: grid_attack::build_base,
    },
    Registration {
        kind: AgentKind::TrainArmy,
        name: train_army::NAME,
        num_actions: train_army::NUM_ACTIONS,
        children: &[],
        build: train_army::build,
    },
];

impl AgentKind {
    pub fn registration(self) -> Result<&'static Registration> {
        REGISTRY
            .iter()
            .find(|r| r.kind == self)
            .ok_or_else(|| HrlError::UnknownAgent(format!("{:?}", self)))
    }

    pub fn from_name(name: &str) -> Result<Self> {
        REGISTRY
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.kind)
            .ok_or_else(|| HrlError::UnknownAgent(name.to_string()))
    }

    pub fn name(self) -> Result<&'static str> {
        Ok(self.registration()?.name)
    }
}

/// Names of every registered agent
pub fn agent_names() -> Vec<&'static str> {
    REGISTRY.iter().map(|r| r.name).collect()
}

/// What a provider needs to construct or attach a decision maker
pub struct DecisionMakerRequest<'a> {
    pub agent: &'a str,
    pub spec: &'a DecisionMakerSpec,
    /// Persistent name, unique per decision maker
    pub name: &'a str,
    pub directory: &'a Path,
    pub num_actions: usize,
}

/// Source of decision makers for kinds the engine does not implement itself
pub trait DecisionMakerProvider: Send {
    fn create(&self, request: &DecisionMakerRequest<'_>) -> Result<SharedDecisionMaker>;
}

/// The `none` and `naive` kinds
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDecisionMakers;

impl DecisionMakerProvider for BuiltinDecisionMakers {
    fn create(&self, request: &DecisionMakerRequest<'_>) -> Result<SharedDecisionMaker> {
        match request.spec.kind.as_str() {
            "none" => Ok(share(NullDecisionMaker::new(request.name, request.num_actions))),
            "naive" if request.agent == battle_manager::NAME => {
                Ok(share(NaiveBattleManager::new(request.name)))
            }
            kind => Err(HrlError::Config(format!(
                "no decision maker of kind {} for {}",
                kind, request.agent
            ))),
        }
    }
}

/// Decision makers by persistent name
///
/// Attaching by a name already in the pool returns the existing decision
/// maker, so trees built one after another share their models.
pub struct DecisionMakerPool {
    provider: Box<dyn DecisionMakerProvider>,
    attached: HashMap<String, SharedDecisionMaker>,
}

impl DecisionMakerPool {
    pub fn new(provider: Box<dyn DecisionMakerProvider>) -> Self {
        Self {
            provider,
            attached: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        Self::new(Box::new(BuiltinDecisionMakers))
    }

    pub fn attach(&mut self, request: &DecisionMakerRequest<'_>) -> Result<SharedDecisionMaker> {
        if let Some(dm) = self.attached.get(request.name) {
            debug!("{} attaches to existing decision maker {}", request.agent, request.name);
            return Ok(dm.clone());
        }
        let dm = self.provider.create(request)?;
        self.attached.insert(request.name.to_string(), dm.clone());
        Ok(dm)
    }

    pub fn get(&self, name: &str) -> Option<SharedDecisionMaker> {
        self.attached.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }
}

struct TreeBuilder<'a> {
    config: &'a RunConfig,
    pool: &'a mut DecisionMakerPool,
    built: u64,
}

impl TreeBuilder<'_> {
    fn next_seed(&mut self) -> Option<u64> {
        let seed = self.config.seed.map(|s| s.wrapping_add(self.built));
        self.built += 1;
        seed
    }

    /// Build `kind` and its subtree; returns the agent and its unwrapped decision maker
    fn build_node(
        &mut self,
        kind: AgentKind,
        inherited_play: bool,
        inherited_dm: Option<SharedDecisionMaker>,
    ) -> Result<(Box<dyn Agent>, SharedDecisionMaker)> {
        let reg = kind.registration()?;
        let flags = self.config.flags_for(reg.name, inherited_play);

        let dm = match inherited_dm {
            Some(dm) => dm,
            None => {
                let spec = self.config.decision_maker_for(reg.name);
                let name = self.config.decision_maker_name(reg.name, &spec);
                let directory = self.config.decision_maker_dir(reg.name, &spec);
                self.pool.attach(&DecisionMakerRequest {
                    agent: reg.name,
                    spec: &spec,
                    name: &name,
                    directory: &directory,
                    num_actions: reg.num_actions,
                })?
            }
        };

        let mut children = Children::new();
        for &(key, child_kind) in reg.children {
            let sub = lock_decision_maker(&dm)?.sub_decision_maker(key);
            let (child, child_dm) = self.build_node(child_kind, flags.play, sub)?;
            lock_decision_maker(&dm)?.set_sub_decision_maker(key, child_dm);
            children.insert(key, child);
        }

        let acting_child = if flags.play {
            None
        } else {
            children
                .iter()
                .find(|(_, child)| child.is_acting())
                .map(|(key, _)| *key)
        };

        let decision_maker = if self.config.multi_threaded && flags.train {
            share(BackgroundLearner::spawn(dm.clone())?)
        } else {
            dm.clone()
        };

        debug!(
            "built {} (play={}, train={}, test={})",
            reg.name, flags.play, flags.train, flags.test
        );
        let parts = AgentParts {
            name: reg.name,
            flags,
            selection: self.config.selection_for(reg.name),
            decision_maker,
            acting_child,
            seed: self.next_seed(),
        };
        Ok(((reg.build)(parts, children)?, dm))
    }
}

/// A built hierarchy plus the run-wide settings the driver needs
pub struct AgentTree {
    root: Box<dyn Agent>,
    normalization: RewardNormalization,
}

impl AgentTree {
    /// Build the hierarchy rooted at `root` as configured
    pub fn build(root: AgentKind, config: &RunConfig, pool: &mut DecisionMakerPool) -> Result<Self> {
        config.validate(&agent_names())?;
        let mut builder = TreeBuilder {
            config,
            pool,
            built: 0,
        };
        let (agent, _) = builder.build_node(root, false, None)?;
        let tree = Self::new(agent, config.reward_normalization);
        info!(
            "agent tree {} ready, acting path {}",
            tree.root.name(),
            tree.acting_path().join(" -> ")
        );
        Ok(tree)
    }

    /// Wrap an already-built root
    pub fn new(root: Box<dyn Agent>, normalization: RewardNormalization) -> Self {
        Self {
            root,
            normalization,
        }
    }

    pub fn root(&self) -> &dyn Agent {
        self.root.as_ref()
    }

    pub fn root_mut(&mut self) -> &mut dyn Agent {
        self.root.as_mut()
    }

    pub fn normalization(&self) -> RewardNormalization {
        self.normalization
    }

    /// Move bound of one root decision
    pub fn max_moves(&self) -> u32 {
        self.root.max_moves()
    }

    pub fn find(&self, name: &str) -> Option<&dyn Agent> {
        find_agent(self.root.as_ref(), name)
    }

    /// Names from the root down to the first agent making its own decisions
    pub fn acting_path(&self) -> Vec<&'static str> {
        let mut path = Vec::new();
        let mut node: &dyn Agent = self.root.as_ref();
        loop {
            path.push(node.name());
            if node.core().flags().play {
                break;
            }
            let next = node.core().acting_child().and_then(|key| {
                node.children()
                    .into_iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, child)| child)
            });
            match next {
                Some(child) => node = child,
                None => break,
            }
        }
        path
    }

    /// Whether two trees drive the same decision maker for `agent`
    pub fn shares_decision_maker(&self, other: &AgentTree, agent: &str) -> bool {
        match (self.find(agent), other.find(agent)) {
            (Some(a), Some(b)) => Arc::ptr_eq(&a.decision_maker(), &b.decision_maker()),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hrl_core::INHERIT;

    fn config() -> RunConfig {
        RunConfig::default().with_seed(9)
    }

    #[test]
    fn test_registry_names_are_unique() {
        let mut names = agent_names();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), REGISTRY.len());
        assert_eq!(AgentKind::from_name("battle_mngr").unwrap(), AgentKind::BattleManager);
        assert!(AgentKind::from_name("builder").is_err());
    }

    #[test]
    fn test_inherit_plays_from_the_root() {
        let mut pool = DecisionMakerPool::builtin();
        let tree = AgentTree::build(AgentKind::Attack, &config().playing(INHERIT), &mut pool).unwrap();

        assert_eq!(tree.acting_path(), vec!["attack_agent"]);
        assert_eq!(tree.max_moves(), 4);
        for name in ["attack_agent", "battle_mngr", "army_attack", "base_attack"] {
            assert!(tree.find(name).unwrap().core().flags().play, "{}", name);
        }
        assert!(tree.find("trainer").is_none());
    }

    #[test]
    fn test_acting_path_through_structural_ancestors() {
        let mut pool = DecisionMakerPool::builtin();
        let tree = AgentTree::build(AgentKind::Attack, &config().playing("army_attack"), &mut pool).unwrap();

        assert_eq!(tree.acting_path(), vec!["attack_agent", "battle_mngr", "army_attack"]);
        assert_eq!(tree.max_moves(), 1);
        assert!(!tree.find("base_attack").unwrap().core().flags().play);
        assert_eq!(tree.find("battle_mngr").unwrap().core().acting_child(), Some(1));
    }

    #[test]
    fn test_flags_are_independent() {
        let mut pool = DecisionMakerPool::builtin();
        let mut cfg = config().training("battle_mngr");
        cfg.test.insert("army_attack".to_string());
        let tree = AgentTree::build(AgentKind::Attack, &cfg, &mut pool).unwrap();

        let manager = tree.find("battle_mngr").unwrap().core().flags();
        assert!(manager.train && !manager.play && !manager.test);
        let army = tree.find("army_attack").unwrap().core().flags();
        assert!(army.test && !army.play && !army.train);
        assert_eq!(tree.acting_path(), vec!["attack_agent"]);
    }

    #[test]
    fn test_pool_reattaches_by_name() {
        let mut pool = DecisionMakerPool::builtin();
        let cfg = config()
            .playing("battle_mngr")
            .with_decision_maker("battle_mngr", DecisionMakerSpec::of_kind("naive"));
        let first = AgentTree::build(AgentKind::Attack, &cfg, &mut pool).unwrap();
        let attached = pool.len();
        let second = AgentTree::build(AgentKind::Attack, &cfg, &mut pool).unwrap();

        assert_eq!(pool.len(), attached);
        assert!(first.shares_decision_maker(&second, "battle_mngr"));
        assert!(first.shares_decision_maker(&second, "army_attack"));
        assert_eq!(
            lock_decision_maker(&first.find("battle_mngr").unwrap().decision_maker())
                .unwrap()
                .name(),
            "battle_mngr_naive"
        );
    }

    #[test]
    fn test_parent_holds_child_decision_makers() {
        let mut pool = DecisionMakerPool::builtin();
        let tree = AgentTree::build(AgentKind::Attack, &config(), &mut pool).unwrap();
        let root_dm = tree.root().decision_maker();
        let sub = lock_decision_maker(&root_dm)
            .unwrap()
            .sub_decision_maker(attack::BATTLE_KEY)
            .unwrap();
        assert!(Arc::ptr_eq(&sub, &tree.find("battle_mngr").unwrap().decision_maker()));
    }

    #[test]
    fn test_multi_threaded_wraps_learning_agents() {
        let mut pool = DecisionMakerPool::builtin();
        let mut cfg = config().training("trainer").playing("trainer");
        cfg.multi_threaded = true;
        let tree = AgentTree::build(AgentKind::TrainArmy, &cfg, &mut pool).unwrap();

        let cached = pool.get("trainer_none").unwrap();
        assert!(!Arc::ptr_eq(&cached, &tree.root().decision_maker()));
    }

    #[test]
    fn test_bad_configuration_rejected() {
        let mut pool = DecisionMakerPool::builtin();
        let cfg = config().playing("builder");
        assert!(matches!(
            AgentTree::build(AgentKind::Attack, &cfg, &mut pool),
            Err(HrlError::Config(_))
        ));

        let cfg = config().with_decision_maker("trainer", DecisionMakerSpec::of_kind("naive"));
        assert!(matches!(
            AgentTree::build(AgentKind::TrainArmy, &cfg, &mut pool),
            Err(HrlError::Config(_))
        ));
    }
}
