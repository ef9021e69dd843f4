use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Position, config::FireConfig};

/// Variant tag of a tile, used in error messages and renderers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileKind {
    Floor,
    Wall,
    Item,
}

/// Invariant violations on tile operations. These indicate a caller bug.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TileError {
    #[error("Cannot set {kind:?} at ({}, {}) on fire: tile is not inflammable", position.x, position.y)]
    NotInflammable { kind: TileKind, position: Position },
}

/// Burning flag plus the animation frame of the flames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fire {
    pub on_fire: bool,
    pub frame: usize,
}

impl Fire {
    fn ignite(&mut self) {
        self.on_fire = true;
        self.frame = 0;
    }

    fn advance(&mut self, frame_count: usize) {
        if self.on_fire {
            self.frame = (self.frame + 1) % frame_count.max(1);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Floor {
    pub position: Position,
    pub fire: Fire,
}

impl Floor {
    pub fn new(position: Position) -> Self {
        Floor {
            position,
            fire: Fire::default(),
        }
    }
}

/// Cosmetic appearance of a wall.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WallStyle {
    #[default]
    Front,
    Top,
    Window,
    Picture,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wall {
    pub position: Position,
    pub style: WallStyle,
}

impl Wall {
    pub fn new(position: Position) -> Self {
        Wall {
            position,
            style: WallStyle::Front,
        }
    }

    /// Picks the wall's appearance from its neighbourhood.
    ///
    /// A wall sitting on top of another wall shows its top face; otherwise it
    /// shows its front, which may be decorated with a picture or a window.
    pub fn register_neighbors<R: Rng + ?Sized>(
        &mut self,
        wall_below: bool,
        fire: &FireConfig,
        rng: &mut R,
    ) {
        if wall_below {
            self.style = WallStyle::Top;
            return;
        }
        self.style = WallStyle::Front;
        if rng.random_bool(fire.chance_of_wall_being_picture) {
            self.style = WallStyle::Picture;
        } else if rng.random_bool(fire.chance_of_wall_being_window) {
            self.style = WallStyle::Window;
        }
    }
}

/// Furniture placed on top of a floor tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemKind {
    Radio,
    BookshelfEmpty,
    BookshelfFull,
    Table,
    TableSmall,
    Chair,
    ChairRed,
    ChairBlue,
    ChairPurple,
    Oven,
    Toilet,
    Pot,
    PotGreen,
    PotPink,
    PotRed,
    Chest,
    Stool,
    DoorOpen,
    Nightstand,
    TrapdoorOpen,
    Bin,
    ModernBin,
    BedRed,
    BedBlue,
    BedPurple,
}

impl ItemKind {
    /// Largest value returned by [`ItemKind::base_durability`].
    pub const MAX_BASE_DURABILITY: u32 = 20;

    /// Number of burning updates the item withstands before collapsing.
    pub fn base_durability(self) -> u32 {
        match self {
            ItemKind::Radio => 9,
            ItemKind::BookshelfEmpty => 12,
            ItemKind::BookshelfFull => 14,
            ItemKind::Table => 10,
            ItemKind::TableSmall => 8,
            ItemKind::Chair | ItemKind::ChairRed | ItemKind::ChairBlue | ItemKind::ChairPurple => 6,
            ItemKind::Oven => 18,
            ItemKind::Toilet => 15,
            ItemKind::Pot | ItemKind::PotGreen | ItemKind::PotPink | ItemKind::PotRed => 5,
            ItemKind::Chest => 16,
            ItemKind::Stool => 4,
            ItemKind::DoorOpen => 20,
            ItemKind::Nightstand => 8,
            ItemKind::TrapdoorOpen => 12,
            ItemKind::Bin => 7,
            ItemKind::ModernBin => 9,
            ItemKind::BedRed | ItemKind::BedBlue | ItemKind::BedPurple => 13,
        }
    }

    pub fn is_door(self) -> bool {
        matches!(self, ItemKind::DoorOpen | ItemKind::TrapdoorOpen)
    }
}

/// An item standing on a floor tile. Once destroyed it exposes the floor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub kind: ItemKind,
    pub durability: u32,
    pub destroyed: bool,
    pub fire: Fire,
    pub floor: Floor,
}

impl Item {
    pub fn new(kind: ItemKind, floor: Floor, durability_power: u32) -> Self {
        Item {
            kind,
            durability: kind.base_durability().saturating_mul(durability_power),
            destroyed: false,
            fire: Fire::default(),
            floor,
        }
    }

    fn burn(&mut self) {
        if self.destroyed || !self.fire.on_fire {
            return;
        }
        self.durability = self.durability.saturating_sub(1);
        if self.durability == 0 {
            self.destroyed = true;
            self.fire.on_fire = false;
            // the collapsing item sets the floor beneath it alight
            self.floor.fire.ignite();
        }
    }

    fn active_fire(&self) -> &Fire {
        if self.destroyed { &self.floor.fire } else { &self.fire }
    }

    fn active_fire_mut(&mut self) -> &mut Fire {
        if self.destroyed {
            &mut self.floor.fire
        } else {
            &mut self.fire
        }
    }
}

/// One grid cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tile {
    Floor(Floor),
    Wall(Wall),
    Item(Item),
}

impl Tile {
    pub fn floor(position: Position) -> Self {
        Tile::Floor(Floor::new(position))
    }

    pub fn wall(position: Position) -> Self {
        Tile::Wall(Wall::new(position))
    }

    pub fn kind(&self) -> TileKind {
        match self {
            Tile::Floor(_) => TileKind::Floor,
            Tile::Wall(_) => TileKind::Wall,
            Tile::Item(_) => TileKind::Item,
        }
    }

    pub fn position(&self) -> Position {
        match self {
            Tile::Floor(floor) => floor.position,
            Tile::Wall(wall) => wall.position,
            Tile::Item(item) => item.floor.position,
        }
    }

    pub fn is_traversable(&self) -> bool {
        match self {
            Tile::Floor(_) => true,
            Tile::Wall(_) => false,
            Tile::Item(item) => item.destroyed,
        }
    }

    pub fn is_inflammable(&self) -> bool {
        !matches!(self, Tile::Wall(_))
    }

    /// Intact items can be broken; nothing else can.
    pub fn is_breakable(&self) -> bool {
        matches!(self, Tile::Item(item) if !item.destroyed)
    }

    pub fn is_on_fire(&self) -> bool {
        match self {
            Tile::Floor(floor) => floor.fire.on_fire,
            Tile::Wall(_) => false,
            Tile::Item(item) => item.active_fire().on_fire,
        }
    }

    /// Current flame animation frame; meaningless while not burning.
    pub fn fire_state(&self) -> usize {
        match self {
            Tile::Floor(floor) => floor.fire.frame,
            Tile::Wall(_) => 0,
            Tile::Item(item) => item.active_fire().frame,
        }
    }

    pub fn durability(&self) -> Option<u32> {
        match self {
            Tile::Item(item) => Some(item.durability),
            _ => None,
        }
    }

    pub fn set_on_fire(&mut self) -> Result<(), TileError> {
        match self {
            Tile::Floor(floor) => floor.fire.ignite(),
            Tile::Wall(wall) => {
                return Err(TileError::NotInflammable {
                    kind: TileKind::Wall,
                    position: wall.position,
                });
            }
            Tile::Item(item) => item.active_fire_mut().ignite(),
        }
        Ok(())
    }

    pub fn put_out_fire(&mut self) {
        match self {
            Tile::Floor(floor) => floor.fire.on_fire = false,
            Tile::Wall(_) => {}
            Tile::Item(item) => item.active_fire_mut().on_fire = false,
        }
    }

    /// Per-step hook. Burning items lose durability; everything else is inert.
    pub fn update(&mut self) {
        if let Tile::Item(item) = self {
            item.burn();
        }
    }

    /// Advances the flame animation. Never changes simulation state.
    pub fn animate(&mut self, frame_count: usize) {
        match self {
            Tile::Floor(floor) => floor.fire.advance(frame_count),
            Tile::Wall(_) => {}
            Tile::Item(item) => item.active_fire_mut().advance(frame_count),
        }
    }
}
