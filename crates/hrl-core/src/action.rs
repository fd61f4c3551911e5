//! Agent actions and environment primitives

use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into one agent's discrete action space
pub type ActionId = usize;

/// Universal "do nothing" action, legal at every level of the hierarchy
pub const DO_NOTHING: ActionId = 0;

/// A (row, column) coordinate on a screen or minimap layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub struct ScreenPoint {
    pub y: i32,
    pub x: i32,
}

impl ScreenPoint {
    pub const fn new(y: i32, x: i32) -> Self {
        Self { y, x }
    }

    /// Squared euclidean distance, only meaningful for comparisons
    pub fn dist_sq(&self, other: &ScreenPoint) -> i64 {
        let dy = i64::from(self.y - other.y);
        let dx = i64::from(self.x - other.x);
        dy * dy + dx * dx
    }
}

impl fmt::Display for ScreenPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.y, self.x)
    }
}

/// Environment command identifiers used by the leaf agents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    /// Reserved no-op; always available
    NoOp,
    Stop,
    SelectArmy,
    SelectPoint,
    AttackScreen,
    AttackMinimap,
    MoveCamera,
    TrainMarine,
    TrainReaper,
    TrainHellion,
    TrainSiegeTank,
}

/// Argument of a primitive command
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "Type", rename_all = "PascalCase")]
pub enum Arg {
    /// Execute immediately
    NotQueued,
    /// Append to the unit's command queue
    Queued,
    /// Select every unit of the clicked type
    SelectAll,
    /// Target coordinate
    Point { y: i32, x: i32 },
}

impl From<ScreenPoint> for Arg {
    fn from(p: ScreenPoint) -> Self {
        Arg::Point { y: p.y, x: p.x }
    }
}

/// Opaque environment command plus its argument list, passed through unmodified
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct PrimitiveAction {
    pub function: Function,
    #[serde(default)]
    pub args: Vec<Arg>,
}

impl PrimitiveAction {
    pub fn new(function: Function, args: Vec<Arg>) -> Self {
        Self { function, args }
    }

    /// The reserved safe no-op
    pub fn no_op() -> Self {
        Self::new(Function::NoOp, Vec::new())
    }

    pub fn is_no_op(&self) -> bool {
        self.function == Function::NoOp
    }

    /// Target point, if the command carries one
    pub fn point(&self) -> Option<ScreenPoint> {
        self.args.iter().find_map(|arg| match arg {
            Arg::Point { y, x } => Some(ScreenPoint::new(*y, *x)),
            _ => None,
        })
    }
}

impl fmt::Display for PrimitiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.function)?;
        if let Some(p) = self.point() {
            write!(f, "@{}", p)?;
        }
        Ok(())
    }
}
