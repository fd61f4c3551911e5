//! Run configuration, built once at startup and threaded through the tree builder

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{HrlError, Result};
use crate::reward::RewardNormalization;

/// Play-list entry that makes every agent a playing agent
pub const INHERIT: &str = "inherit";

/// How an agent turns decision-maker output into an action
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum ActionSelection {
    /// Engine masks illegal actions, then argmax over decision-maker values
    #[default]
    Masked,
    /// Decision maker chooses among the whole action space itself
    Unmasked,
}

/// Independent run-mode flags of one agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunFlags {
    /// Makes autonomous decisions
    pub play: bool,
    /// Submits learning transitions
    pub train: bool,
    /// Reports episode results without training
    pub test: bool,
}

/// Which decision maker an agent attaches to
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct DecisionMakerSpec {
    /// `none`, `naive`, or a kind resolved by an external provider
    pub kind: String,
    /// Persistent name; defaults to `<agent>_<kind>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Storage directory below the run directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl DecisionMakerSpec {
    pub fn none() -> Self {
        Self {
            kind: "none".into(),
            name: None,
            directory: None,
        }
    }

    pub fn of_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::none()
        }
    }
}

/// Immutable run configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct RunConfig {
    #[serde(default)]
    pub play: BTreeSet<String>,

    #[serde(default)]
    pub train: BTreeSet<String>,

    #[serde(default)]
    pub test: BTreeSet<String>,

    /// Decision maker per agent name; agents not listed get `none`
    #[serde(default)]
    pub decision_makers: BTreeMap<String, DecisionMakerSpec>,

    #[serde(default)]
    pub action_selection: ActionSelection,

    /// Per-agent override of `action_selection`
    #[serde(default)]
    pub action_selection_overrides: BTreeMap<String, ActionSelection>,

    #[serde(default)]
    pub reward_normalization: RewardNormalization,

    /// Apply learning updates on background workers
    #[serde(default)]
    pub multi_threaded: bool,

    /// Exploration seed; entropy-seeded when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,

    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Suffix distinguishing parallel copies of the same decision makers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision_maker_copy: Option<String>,
}

fn default_directory() -> PathBuf {
    PathBuf::from("runs")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            play: BTreeSet::new(),
            train: BTreeSet::new(),
            test: BTreeSet::new(),
            decision_makers: BTreeMap::new(),
            action_selection: ActionSelection::Masked,
            action_selection_overrides: BTreeMap::new(),
            reward_normalization: RewardNormalization::Binary,
            multi_threaded: false,
            seed: None,
            directory: default_directory(),
            decision_maker_copy: None,
        }
    }
}

impl RunConfig {
    /// Parse and validate against the `known` agent names
    pub fn from_json_str(json: &str, known: &[&str]) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate(known)?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>, known: &[&str]) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HrlError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text, known)
    }

    /// Builder-style helpers, mostly for tests and embedding
    pub fn playing(mut self, agent: &str) -> Self {
        self.play.insert(agent.to_string());
        self
    }

    pub fn training(mut self, agent: &str) -> Self {
        self.train.insert(agent.to_string());
        self
    }

    pub fn with_decision_maker(mut self, agent: &str, spec: DecisionMakerSpec) -> Self {
        self.decision_makers.insert(agent.to_string(), spec);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject names that no agent in the hierarchy answers to
    pub fn validate(&self, known: &[&str]) -> Result<()> {
        let lists = [
            ("Play", self.play.iter().collect::<Vec<_>>()),
            ("Train", self.train.iter().collect()),
            ("Test", self.test.iter().collect()),
            ("DecisionMakers", self.decision_makers.keys().collect()),
            ("ActionSelectionOverrides", self.action_selection_overrides.keys().collect()),
        ];
        for (list, names) in lists {
            for name in names {
                let allowed = known.contains(&name.as_str()) || (list == "Play" && name == INHERIT);
                if !allowed {
                    return Err(HrlError::Config(format!(
                        "{} lists unknown agent {}",
                        list, name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Flags for `agent`; `inherited_play` is set when an ancestor plays
    pub fn flags_for(&self, agent: &str, inherited_play: bool) -> RunFlags {
        RunFlags {
            play: inherited_play || self.play.contains(agent) || self.play.contains(INHERIT),
            train: self.train.contains(agent),
            test: self.test.contains(agent),
        }
    }

    pub fn selection_for(&self, agent: &str) -> ActionSelection {
        self.action_selection_overrides
            .get(agent)
            .copied()
            .unwrap_or(self.action_selection)
    }

    pub fn decision_maker_for(&self, agent: &str) -> DecisionMakerSpec {
        self.decision_makers
            .get(agent)
            .cloned()
            .unwrap_or_else(DecisionMakerSpec::none)
    }

    /// Persistent decision-maker name for `agent`, including the copy suffix
    pub fn decision_maker_name(&self, agent: &str, spec: &DecisionMakerSpec) -> String {
        let base = spec
            .name
            .clone()
            .unwrap_or_else(|| format!("{}_{}", agent, spec.kind));
        match &self.decision_maker_copy {
            Some(copy) => format!("{}_{}", base, copy),
            None => base,
        }
    }

    /// Storage directory for `agent`'s decision maker
    pub fn decision_maker_dir(&self, agent: &str, spec: &DecisionMakerSpec) -> PathBuf {
        let sub = spec
            .directory
            .clone()
            .unwrap_or_else(|| format!("{}_{}", agent, spec.kind));
        self.directory.join(agent).join(sub)
    }
}
