//! Observation boundary consumed by the agents

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::action::{Function, ScreenPoint};
use crate::error::{HrlError, Result};

/// Well-known feature layer names
pub mod layers {
    pub const UNIT_TYPE: &str = "unit_type";
    pub const PLAYER_RELATIVE: &str = "player_relative";
    pub const SELECTED: &str = "selected";

    /// Values of the `player_relative` layer
    pub mod relative {
        pub const SELF: i32 = 1;
        pub const HOSTILE: i32 = 4;
    }
}

/// A dense row-major feature layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Grid {
    pub height: usize,
    pub width: usize,
    pub data: Vec<i32>,
}

impl Grid {
    /// Zero-filled layer
    pub fn new(height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            data: vec![0; height * width],
        }
    }

    pub fn get(&self, y: usize, x: usize) -> i32 {
        self.data[y * self.width + x]
    }

    /// Bounds-checked read
    pub fn try_get(&self, y: usize, x: usize) -> Option<i32> {
        if y < self.height && x < self.width {
            self.data.get(y * self.width + x).copied()
        } else {
            None
        }
    }

    pub fn set(&mut self, y: usize, x: usize, value: i32) {
        self.data[y * self.width + x] = value;
    }

    /// Fill the inclusive-exclusive rectangle `[y0, y1) x [x0, x1)`
    pub fn fill(&mut self, y0: usize, y1: usize, x0: usize, x1: usize, value: i32) {
        for y in y0..y1.min(self.height) {
            for x in x0..x1.min(self.width) {
                self.set(y, x, value);
            }
        }
    }

    /// All coordinates whose value satisfies `pred`, in row-major order
    pub fn points_where(&self, pred: impl Fn(i32) -> bool) -> Vec<ScreenPoint> {
        let mut points = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                if pred(self.get(y, x)) {
                    points.push(ScreenPoint::new(y as i32, x as i32));
                }
            }
        }
        points
    }

    pub fn any(&self, pred: impl Fn(i32) -> bool) -> bool {
        self.data.iter().any(|&v| pred(v))
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.data.len() != self.height * self.width {
            return Err(HrlError::Environment(format!(
                "layer {} has {} cells, expected {}x{}",
                name,
                self.data.len(),
                self.height,
                self.width
            )));
        }
        Ok(())
    }
}

/// Scalar player resources
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct PlayerResources {
    pub minerals: i64,
    pub vespene: i64,
}

/// One environment tick as seen by the agent tree
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct Observation {
    /// First tick of the episode
    #[serde(default)]
    pub first: bool,

    /// Last tick of the episode
    #[serde(default)]
    pub last: bool,

    /// Reward scalar for this tick
    #[serde(default)]
    pub reward: f64,

    /// Cumulative score
    #[serde(default)]
    pub score: f64,

    #[serde(default)]
    pub player: PlayerResources,

    /// Screen feature layers by name
    #[serde(default)]
    pub screen: HashMap<String, Grid>,

    /// Minimap feature layers by name
    #[serde(default)]
    pub minimap: HashMap<String, Grid>,

    /// Commands the environment currently accepts
    #[serde(default)]
    pub available_actions: BTreeSet<Function>,

    /// Unit type ids of the current selection
    #[serde(default)]
    pub selected_units: Vec<u32>,

    /// Own completed buildings by unit type id
    #[serde(default)]
    pub own_buildings: BTreeMap<u32, u32>,
}

impl Observation {
    pub fn is_first(&self) -> bool {
        self.first
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Screen layer by name
    pub fn screen_layer(&self, name: &str) -> Result<&Grid> {
        self.screen
            .get(name)
            .ok_or_else(|| HrlError::Environment(format!("missing screen layer: {}", name)))
    }

    /// Minimap layer by name
    pub fn minimap_layer(&self, name: &str) -> Result<&Grid> {
        self.minimap
            .get(name)
            .ok_or_else(|| HrlError::Environment(format!("missing minimap layer: {}", name)))
    }

    /// Whether the environment accepts `function` this tick
    pub fn is_available(&self, function: Function) -> bool {
        function == Function::NoOp || self.available_actions.contains(&function)
    }

    /// Check layer shapes after decoding
    ///
    /// Every layer must hold `height * width` cells and all layers of one
    /// surface must share a shape.
    pub fn validate(&self) -> Result<()> {
        validate_surface("screen", &self.screen)?;
        validate_surface("minimap", &self.minimap)
    }
}

fn validate_surface(surface: &str, grids: &HashMap<String, Grid>) -> Result<()> {
    let mut shape: Option<(&str, usize, usize)> = None;
    for (name, grid) in grids {
        grid.validate(name)?;
        match shape {
            None => shape = Some((name.as_str(), grid.height, grid.width)),
            Some((first, height, width)) if (height, width) != (grid.height, grid.width) => {
                return Err(HrlError::Environment(format!(
                    "{} layer {} is {}x{} but {} is {}x{}",
                    surface, name, grid.height, grid.width, first, height, width
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}
