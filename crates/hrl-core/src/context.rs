//! Per-episode shared context passed through the active agent subtree
//!
//! Every agent-produced field lives in a [`ProducedSlot`], which enforces the
//! single-writer discipline: the first agent to publish a field owns it for the
//! rest of the episode, and reading a field nobody has published yet is an
//! invariant violation rather than a silent default.

use std::collections::BTreeMap;

use crate::action::ScreenPoint;
use crate::error::{HrlError, Result};

/// A context field with exactly one producing agent
#[derive(Debug, Clone)]
pub struct ProducedSlot<T> {
    field: &'static str,
    producer: Option<&'static str>,
    value: Option<T>,
}

impl<T> ProducedSlot<T> {
    pub fn new(field: &'static str) -> Self {
        Self {
            field,
            producer: None,
            value: None,
        }
    }

    fn claim(&mut self, producer: &'static str) -> Result<()> {
        match self.producer {
            Some(owner) if owner != producer => Err(HrlError::invariant(
                producer,
                format!(
                    "shared context field {} is already produced by {}",
                    self.field, owner
                ),
            )),
            _ => {
                self.producer = Some(producer);
                Ok(())
            }
        }
    }

    /// Write the field; fails if another agent already produces it
    pub fn publish(&mut self, producer: &'static str, value: T) -> Result<()> {
        self.claim(producer)?;
        self.value = Some(value);
        Ok(())
    }

    /// Mutable access for the producer, initializing with `T::default()`
    pub fn produce_mut(&mut self, producer: &'static str) -> Result<&mut T>
    where
        T: Default,
    {
        self.claim(producer)?;
        Ok(self.value.get_or_insert_with(T::default))
    }

    /// Read the field; fails if it has not been written this episode
    pub fn read(&self, reader: &str) -> Result<&T> {
        self.value.as_ref().ok_or_else(|| {
            HrlError::invariant(
                reader,
                format!("shared context field {} read before write", self.field),
            )
        })
    }

    pub fn is_written(&self) -> bool {
        self.value.is_some()
    }

    pub fn producer(&self) -> Option<&'static str> {
        self.producer
    }
}

/// A unit waiting in a production building's queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedUnit {
    pub unit_type: u32,
    pub steps_in_queue: u32,
}

/// Facts gathered by agents during one episode
#[derive(Debug, Clone)]
pub struct SharedContext {
    /// Driver step counter, advanced once per environment tick
    pub num_step: u64,

    /// Enemy army power per battle-grid cell
    pub enemy_army_mat: ProducedSlot<Vec<f64>>,
    /// Enemy building power per battle-grid cell
    pub enemy_building_mat: ProducedSlot<Vec<f64>>,

    /// Hostile presence on the minimap, row-major
    pub enemy_minimap: ProducedSlot<Vec<bool>>,
    /// Unit counts of the army sent to attack, by unit type
    pub army_in_attack: ProducedSlot<BTreeMap<u32, u32>>,
    /// Where the camera returns after a battle
    pub base_location: ProducedSlot<ScreenPoint>,

    /// Pending production per building type
    pub training_queue: ProducedSlot<BTreeMap<u32, Vec<QueuedUnit>>>,
    /// Completed units by unit type
    pub army_size: ProducedSlot<BTreeMap<u32, u32>>,
    /// Value of the last queued unit, used as the trainer's step reward
    pub prev_action_reward: ProducedSlot<f64>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedContext {
    pub fn new() -> Self {
        Self {
            num_step: 0,
            enemy_army_mat: ProducedSlot::new("enemy_army_mat"),
            enemy_building_mat: ProducedSlot::new("enemy_building_mat"),
            enemy_minimap: ProducedSlot::new("enemy_minimap"),
            army_in_attack: ProducedSlot::new("army_in_attack"),
            base_location: ProducedSlot::new("base_location"),
            training_queue: ProducedSlot::new("training_queue"),
            army_size: ProducedSlot::new("army_size"),
            prev_action_reward: ProducedSlot::new("prev_action_reward"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_before_write() {
        let ctx = SharedContext::new();
        let err = ctx.enemy_army_mat.read("battle_mngr").unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("enemy_army_mat read before write"));
    }

    #[test]
    fn test_single_writer() {
        let mut ctx = SharedContext::new();
        ctx.base_location.publish("attack_agent", ScreenPoint::new(1, 1)).unwrap();
        ctx.base_location.publish("attack_agent", ScreenPoint::new(5, 5)).unwrap();
        assert_eq!(*ctx.base_location.read("battle_mngr").unwrap(), ScreenPoint::new(5, 5));

        let err = ctx.base_location.publish("battle_mngr", ScreenPoint::new(0, 0)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ctx.base_location.producer(), Some("attack_agent"));
    }

    #[test]
    fn test_produce_mut_initializes() {
        let mut ctx = SharedContext::new();
        assert!(!ctx.army_size.is_written());
        *ctx.army_size.produce_mut("trainer").unwrap().entry(48).or_insert(0) += 2;
        assert_eq!(ctx.army_size.read("trainer").unwrap().get(&48), Some(&2));
    }
}
