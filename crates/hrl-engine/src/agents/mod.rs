//! Concrete agents of the battle and training hierarchies

pub mod attack;
pub mod battle_manager;
pub mod grid_attack;
pub mod train_army;

use hrl_core::{HrlError, Result};

use crate::agent::Children;

/// Reject children handed to a leaf agent
pub(crate) fn leaf_only(agent: &str, children: &Children) -> Result<()> {
    if children.is_empty() {
        Ok(())
    } else {
        Err(HrlError::Config(format!("{} is a leaf agent", agent)))
    }
}
