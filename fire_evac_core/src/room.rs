use std::collections::HashSet;

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::{
    Position,
    config::FireConfig,
    map::{Matrix, MatrixError},
    tile::{Item, ItemKind, Tile},
};

/// Errors raised while laying out a room.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room layout does not fit the grid: {0}")]
    OutOfBounds(#[from] MatrixError),
    #[error("Cannot place {kind:?} at ({}, {}): tile is not an empty floor", position.x, position.y)]
    NotFloor { kind: ItemKind, position: Position },
}

/// Builds the static layout of a room: walls first, then floors, then furniture.
pub trait RoomFactory: Send + Sync {
    fn wall_positions(&self) -> &[Position];

    fn item_placements(&self) -> &[(Position, ItemKind)];

    /// Items dropped on a random free floor tile once the characters are placed.
    fn random_items(&self) -> &[ItemKind] {
        &[]
    }

    /// Where the cat waits when random target placement is disabled.
    fn fixed_target(&self) -> Position {
        Position::new(0, 0)
    }

    /// Lays out walls, floors and the fixed items on a `size` x `size` grid.
    fn create_tiles(
        &self,
        size: usize,
        fire: &FireConfig,
        rng: &mut dyn RngCore,
    ) -> Result<Matrix<Tile>, RoomError> {
        let walls: HashSet<Position> = self.wall_positions().iter().copied().collect();
        if let Some(p) = walls.iter().find(|p| p.x >= size || p.y >= size) {
            return Err(RoomError::OutOfBounds(MatrixError::OutOfBounds {
                x: p.x,
                y: p.y,
                width: size,
                height: size,
            }));
        }

        let mut tiles = Matrix::from_generator(size, size, |p| {
            if walls.contains(&p) {
                Tile::wall(p)
            } else {
                Tile::floor(p)
            }
        });

        for &position in self.wall_positions() {
            let wall_below = position
                .offset(0, 1)
                .is_some_and(|below| walls.contains(&below));
            if let Tile::Wall(wall) = &mut tiles[position] {
                wall.register_neighbors(wall_below, fire, rng);
            }
        }

        for &(position, kind) in self.item_placements() {
            place_item(&mut tiles, position, kind, fire.durability_power)?;
        }
        Ok(tiles)
    }
}

/// Puts an item on top of the floor at `position`.
pub fn place_item(
    tiles: &mut Matrix<Tile>,
    position: Position,
    kind: ItemKind,
    durability_power: u32,
) -> Result<(), RoomError> {
    let floor = match tiles.get(position) {
        Some(Tile::Floor(floor)) => floor.clone(),
        Some(_) => return Err(RoomError::NotFloor { kind, position }),
        None => {
            return Err(RoomError::OutOfBounds(MatrixError::OutOfBounds {
                x: position.x,
                y: position.y,
                width: tiles.width(),
                height: tiles.height(),
            }));
        }
    };
    tiles.set(position, Tile::Item(Item::new(kind, floor, durability_power)))?;
    Ok(())
}

/// The 6x6 room used for training and for the MDP solver.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrainingRoom;

const TRAINING_WALLS: [Position; 7] = [
    Position::new(0, 2),
    Position::new(1, 2),
    Position::new(1, 3),
    Position::new(2, 3),
    Position::new(3, 3),
    Position::new(3, 0),
    Position::new(3, 1),
];

const TRAINING_ITEMS: [(Position, ItemKind); 3] = [
    (Position::new(0, 3), ItemKind::BookshelfFull),
    (Position::new(1, 0), ItemKind::BedRed),
    (Position::new(2, 0), ItemKind::PotGreen),
];

impl RoomFactory for TrainingRoom {
    fn wall_positions(&self) -> &[Position] {
        &TRAINING_WALLS
    }

    fn item_placements(&self) -> &[(Position, ItemKind)] {
        &TRAINING_ITEMS
    }
}

/// The larger 8x8 room used for interactive play.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlayRoom;

const PLAY_WALLS: [Position; 18] = [
    Position::new(0, 2),
    Position::new(1, 2),
    Position::new(1, 3),
    Position::new(2, 3),
    Position::new(3, 3),
    Position::new(3, 0),
    Position::new(3, 1),
    Position::new(5, 0),
    Position::new(5, 1),
    Position::new(5, 2),
    Position::new(5, 3),
    Position::new(5, 4),
    Position::new(6, 4),
    Position::new(0, 6),
    Position::new(0, 7),
    Position::new(1, 7),
    Position::new(2, 7),
    Position::new(3, 7),
];

const PLAY_ITEMS: [(Position, ItemKind); 5] = [
    (Position::new(0, 3), ItemKind::BookshelfFull),
    (Position::new(1, 0), ItemKind::BedRed),
    (Position::new(2, 0), ItemKind::PotGreen),
    (Position::new(7, 1), ItemKind::ChairRed),
    (Position::new(7, 2), ItemKind::Table),
];

impl RoomFactory for PlayRoom {
    fn wall_positions(&self) -> &[Position] {
        &PLAY_WALLS
    }

    fn item_placements(&self) -> &[(Position, ItemKind)] {
        &PLAY_ITEMS
    }

    fn random_items(&self) -> &[ItemKind] {
        &[ItemKind::Radio]
    }
}

/// A bare room: floor everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyRoom;

impl RoomFactory for EmptyRoom {
    fn wall_positions(&self) -> &[Position] {
        &[]
    }

    fn item_placements(&self) -> &[(Position, ItemKind)] {
        &[]
    }
}

/// Selects one of the built-in layouts from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    #[default]
    Training,
    Play,
    Empty,
}

static TRAINING_ROOM: TrainingRoom = TrainingRoom;
static PLAY_ROOM: PlayRoom = PlayRoom;
static EMPTY_ROOM: EmptyRoom = EmptyRoom;

impl RoomKind {
    pub fn factory(self) -> &'static dyn RoomFactory {
        match self {
            RoomKind::Training => &TRAINING_ROOM,
            RoomKind::Play => &PLAY_ROOM,
            RoomKind::Empty => &EMPTY_ROOM,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{TileKind, WallStyle};
    use rand::{SeedableRng, rngs::StdRng};

    fn build(kind: RoomKind, size: usize, seed: u64) -> Result<Matrix<Tile>, RoomError> {
        let mut rng = StdRng::seed_from_u64(seed);
        kind.factory()
            .create_tiles(size, &FireConfig::default(), &mut rng)
    }

    #[test]
    fn training_room_layout() {
        let tiles = build(RoomKind::Training, 6, 1).unwrap();
        let count = |kind| tiles.iter().filter(|t| t.kind() == kind).count();
        assert_eq!(count(TileKind::Wall), 7);
        assert_eq!(count(TileKind::Item), 3);
        assert_eq!(count(TileKind::Floor), 26);
        assert_eq!(tiles[Position::new(0, 3)].kind(), TileKind::Item);
        assert!(!tiles[Position::new(1, 0)].is_traversable());
    }

    #[test]
    fn wall_above_wall_shows_top_face() {
        let tiles = build(RoomKind::Training, 6, 1).unwrap();
        match &tiles[Position::new(1, 2)] {
            Tile::Wall(wall) => assert_eq!(wall.style, WallStyle::Top),
            other => panic!("expected wall, got {other:?}"),
        }
    }

    #[test]
    fn decoration_is_reproducible_for_a_seed() {
        let a = build(RoomKind::Play, 8, 99).unwrap();
        let b = build(RoomKind::Play, 8, 99).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn play_room_does_not_fit_small_grid() {
        let err = build(RoomKind::Play, 6, 1).unwrap_err();
        assert!(matches!(err, RoomError::OutOfBounds(_)));
    }

    #[test]
    fn empty_room_is_all_floor() {
        let tiles = build(RoomKind::Empty, 4, 1).unwrap();
        assert!(tiles.iter().all(|t| t.kind() == TileKind::Floor));
    }

    #[test]
    fn item_cannot_stand_on_wall() {
        let mut tiles = build(RoomKind::Training, 6, 1).unwrap();
        let err = place_item(&mut tiles, Position::new(3, 3), ItemKind::Chair, 1).unwrap_err();
        assert_eq!(
            err,
            RoomError::NotFloor {
                kind: ItemKind::Chair,
                position: Position::new(3, 3)
            }
        );
    }

    #[test]
    fn room_kind_parses_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            room: RoomKind,
        }
        let parsed: Wrapper = toml::from_str("room = \"play\"").unwrap();
        assert_eq!(parsed.room, RoomKind::Play);
    }
}
