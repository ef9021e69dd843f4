use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod environment;
pub mod grid;
pub mod map;
pub mod mdp;
pub mod q_learning;
pub mod render;
pub mod room;
pub mod tile;

pub use config::Config;
pub use environment::{FireFighterWorld, Observation, ResetOptions, StepInfo, StepResult};
pub use grid::Grid;
pub use mdp::MdpSolver;
pub use q_learning::QLearningAgent;

/// Represents a 2D coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Position { x, y }
    }

    /// Applies a signed unit displacement, returning `None` on underflow.
    /// The upper bound is left to the caller, who knows the grid size.
    pub fn offset(self, dx: isize, dy: isize) -> Option<Position> {
        Some(Position {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// Euclidean distance between two integer coordinates.
    pub fn distance(self, other: Position) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn manhattan_distance(self, other: Position) -> usize {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }
}

impl From<(usize, usize)> for Position {
    fn from((x, y): (usize, usize)) -> Self {
        Position { x, y }
    }
}

/// Actions available to the firefighter. Discriminants match the step contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Right = 0,
    Up = 1,
    Left = 2,
    Down = 3,
    PutOutFire = 4,
}

impl Action {
    /// All actions in discriminant order.
    pub const ALL: [Action; 5] = [
        Action::Right,
        Action::Up,
        Action::Left,
        Action::Down,
        Action::PutOutFire,
    ];

    /// Order in which neighbors are scanned for fire by `PutOutFire`.
    pub const SCAN_ORDER: [Action; 4] = [Action::Up, Action::Down, Action::Left, Action::Right];

    pub const COUNT: usize = Self::ALL.len();

    /// Unit displacement `(dx, dy)`; `PutOutFire` does not move.
    pub fn displacement(self) -> (isize, isize) {
        match self {
            Action::Right => (1, 0),
            Action::Up => (0, -1),
            Action::Left => (-1, 0),
            Action::Down => (0, 1),
            Action::PutOutFire => (0, 0),
        }
    }

    pub fn is_movement(self) -> bool {
        !matches!(self, Action::PutOutFire)
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Action> {
        Self::ALL.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_rejects_underflow() {
        assert_eq!(Position::new(0, 3).offset(-1, 0), None);
        assert_eq!(Position::new(2, 3).offset(0, 1), Some(Position::new(2, 4)));
    }

    #[test]
    fn distance_is_euclidean() {
        let d = Position::new(0, 0).distance(Position::new(3, 4));
        assert!((d - 5.0).abs() < 1e-12);
        assert_eq!(Position::new(0, 0).manhattan_distance(Position::new(3, 4)), 7);
    }

    #[test]
    fn action_indices_round_trip_through_table() {
        for action in Action::ALL {
            assert_eq!(Action::from_index(action.index()), Some(action));
        }
        assert_eq!(Action::from_index(5), None);
    }
}
