use rand::{Rng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    Action, Position,
    config::{Config, FireConfig},
    map::Matrix,
    render::Renderer,
    room::{RoomError, RoomFactory, place_item},
    tile::{Tile, TileError},
};

/// Errors raised while building or seeding a grid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error(transparent)]
    Room(#[from] RoomError),
    #[error(transparent)]
    Tile(#[from] TileError),
    #[error("Position ({}, {}) is out of bounds for grid size {size}", position.x, position.y)]
    OutOfBounds { position: Position, size: usize },
    #[error("Cannot spawn the {role} on non-traversable tile at ({}, {})", position.x, position.y)]
    NotTraversable {
        role: &'static str,
        position: Position,
    },
    #[error("No free traversable tile left to spawn the {role}")]
    NoFreeTile { role: &'static str },
}

/// Anything standing on the grid.
pub trait Character {
    fn position(&self) -> Position;

    fn is_alive(&self) -> bool {
        true
    }
}

/// The agent controlled by the learner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FireFighter {
    pub position: Position,
    alive: bool,
}

impl FireFighter {
    pub fn new(position: Position) -> Self {
        FireFighter {
            position,
            alive: true,
        }
    }

    /// Marks the firefighter dead. Returns `true` only on the first call.
    pub fn kill(&mut self) -> bool {
        std::mem::replace(&mut self.alive, false)
    }
}

impl Character for FireFighter {
    fn position(&self) -> Position {
        self.position
    }

    fn is_alive(&self) -> bool {
        self.alive
    }
}

/// The cat waiting to be rescued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cat {
    pub position: Position,
}

impl Character for Cat {
    fn position(&self) -> Position {
        self.position
    }
}

/// Requested spawn locations. `None` means "draw at random".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Spawn {
    pub agent: Option<Position>,
    pub target: Option<Position>,
}

/// What happened to the agent's action during one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOutcome {
    pub is_legal_move: bool,
    /// Tile put out by `PutOutFire`, if any.
    pub extinguished: Option<Position>,
}

impl StepOutcome {
    const ILLEGAL: StepOutcome = StepOutcome {
        is_legal_move: false,
        extinguished: None,
    };
}

/// Authoritative state of one episode: tiles, firefighter and cat.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    tiles: Matrix<Tile>,
    agent: FireFighter,
    target: Cat,
    static_mode: bool,
    fire: FireConfig,
}

impl Grid {
    /// Lays out `room`, spawns both characters and drops the room's random items.
    pub fn new<R: Rng>(
        room: &dyn RoomFactory,
        config: &Config,
        spawn: Spawn,
        rng: &mut R,
    ) -> Result<Self, GridError> {
        let size = config.grid.grid_size;
        let tiles = room.create_tiles(size, &config.fire, rng)?;
        let traversable: Vec<Position> = traversable_in(&tiles);

        let agent_pos = match spawn.agent {
            Some(position) => check_spawn(&tiles, "agent", position)?,
            None => *traversable
                .choose(rng)
                .ok_or(GridError::NoFreeTile { role: "agent" })?,
        };

        let target_pos = match spawn.target {
            Some(position) => check_spawn(&tiles, "target", position)?,
            None => {
                let fixed = room.fixed_target();
                let fixed_usable = !config.grid.random_target_location
                    && fixed != agent_pos
                    && tiles.get(fixed).is_some_and(Tile::is_traversable);
                if fixed_usable {
                    fixed
                } else {
                    let remaining: Vec<Position> = traversable
                        .iter()
                        .copied()
                        .filter(|p| *p != agent_pos)
                        .collect();
                    *remaining
                        .choose(rng)
                        .ok_or(GridError::NoFreeTile { role: "target" })?
                }
            }
        };

        let mut grid = Grid {
            tiles,
            agent: FireFighter::new(agent_pos),
            target: Cat {
                position: target_pos,
            },
            static_mode: config.grid.static_fire_mode,
            fire: config.fire.clone(),
        };

        for &kind in room.random_items() {
            if let Some(position) = grid.random_empty_floor(rng) {
                place_item(&mut grid.tiles, position, kind, grid.fire.durability_power)?;
            }
        }
        Ok(grid)
    }

    pub fn tiles(&self) -> &Matrix<Tile> {
        &self.tiles
    }

    pub fn tile(&self, position: Position) -> Option<&Tile> {
        self.tiles.get(position)
    }

    pub fn agent(&self) -> &FireFighter {
        &self.agent
    }

    pub fn target(&self) -> &Cat {
        &self.target
    }

    pub fn size(&self) -> usize {
        self.tiles.width()
    }

    pub fn is_static(&self) -> bool {
        self.static_mode
    }

    pub fn is_agent_dead(&self) -> bool {
        !self.agent.is_alive()
    }

    pub fn is_target_rescued(&self) -> bool {
        self.agent.position == self.target.position
    }

    /// Every traversable position in row-major order.
    pub fn traversable_positions(&self) -> Vec<Position> {
        traversable_in(&self.tiles)
    }

    /// A uniformly chosen floor tile not occupied by either character.
    pub fn random_empty_floor<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Position> {
        let free: Vec<Position> = self
            .tiles
            .enumerate()
            .filter(|(p, tile)| {
                matches!(tile, Tile::Floor(_))
                    && *p != self.agent.position
                    && *p != self.target.position
            })
            .map(|(p, _)| p)
            .collect();
        free.choose(rng).copied()
    }

    /// Sets the tile at `position` on fire.
    pub fn ignite(&mut self, position: Position) -> Result<(), GridError> {
        let size = self.size();
        let tile = self
            .tiles
            .get_mut(position)
            .ok_or(GridError::OutOfBounds { position, size })?;
        tile.set_on_fire()?;
        Ok(())
    }

    pub fn extinguish(&mut self, position: Position) {
        if let Some(tile) = self.tiles.get_mut(position) {
            tile.put_out_fire();
        }
    }

    /// In-bounds neighbour of `position` in the direction of `action`.
    fn neighbor(&self, position: Position, action: Action) -> Option<Position> {
        let (dx, dy) = action.displacement();
        position
            .offset(dx, dy)
            .filter(|candidate| self.tiles.contains(*candidate))
    }

    /// Whether any orthogonal neighbour of the agent is burning.
    pub fn fire_near_agent(&self) -> bool {
        Action::SCAN_ORDER.iter().any(|&direction| {
            self.neighbor(self.agent.position, direction)
                .is_some_and(|p| self.tiles[p].is_on_fire())
        })
    }

    /// Legality of each action (indexed by `Action::index`) from the current state.
    pub fn possible_actions(&self) -> [bool; Action::COUNT] {
        let mut possible = [false; Action::COUNT];
        for action in Action::ALL {
            possible[action.index()] = if action.is_movement() {
                self.neighbor(self.agent.position, action)
                    .is_some_and(|p| self.tiles[p].is_traversable())
            } else {
                self.fire_near_agent()
            };
        }
        possible
    }

    pub fn legal_actions(&self) -> Vec<Action> {
        let possible = self.possible_actions();
        Action::ALL
            .into_iter()
            .filter(|a| possible[a.index()])
            .collect()
    }

    /// Advances the simulation by one step.
    ///
    /// Without an action only the ambient fire dynamics run and the step is
    /// reported as illegal.
    pub fn update<R: Rng + ?Sized>(&mut self, action: Option<Action>, rng: &mut R) -> StepOutcome {
        let outcome = match action {
            Some(action) => self.apply_action(action),
            None => StepOutcome::ILLEGAL,
        };

        self.spread_fire(rng);

        if self.tiles[self.agent.position].is_on_fire() {
            self.agent.kill();
        }
        outcome
    }

    fn apply_action(&mut self, action: Action) -> StepOutcome {
        let Some(candidate) = self.neighbor(self.agent.position, action) else {
            return StepOutcome::ILLEGAL;
        };
        if !self.tiles[candidate].is_traversable() {
            return StepOutcome::ILLEGAL;
        }

        if action.is_movement() {
            self.agent.position = candidate;
            return StepOutcome {
                is_legal_move: true,
                extinguished: None,
            };
        }

        let burning = Action::SCAN_ORDER.iter().find_map(|&direction| {
            self.neighbor(self.agent.position, direction)
                .filter(|p| self.tiles[*p].is_on_fire())
        });
        match burning {
            Some(position) => {
                self.extinguish(position);
                StepOutcome {
                    is_legal_move: true,
                    extinguished: Some(position),
                }
            }
            None => StepOutcome::ILLEGAL,
        }
    }

    /// Item damage, then at most one random ignition and one random
    /// self-extinguish. The characters' own tiles are never picked.
    fn spread_fire<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.static_mode {
            return;
        }

        for tile in self.tiles.iter_mut() {
            tile.update();
        }

        if rng.random_bool(self.fire.chance_of_catching_fire) {
            let candidates = self.fire_candidates(|tile| tile.is_inflammable() && !tile.is_on_fire());
            if let Some(&position) = candidates.choose(rng) {
                if let Err(err) = self.tiles[position].set_on_fire() {
                    error!(%err, "ambient ignition picked a non-inflammable tile");
                }
            }
        }

        if rng.random_bool(self.fire.chance_of_self_extinguish) {
            let candidates = self.fire_candidates(Tile::is_on_fire);
            if let Some(&position) = candidates.choose(rng) {
                self.tiles[position].put_out_fire();
            }
        }
    }

    fn fire_candidates(&self, predicate: impl Fn(&Tile) -> bool) -> Vec<Position> {
        self.tiles
            .enumerate()
            .filter(|(p, tile)| {
                *p != self.agent.position && *p != self.target.position && predicate(tile)
            })
            .map(|(p, _)| p)
            .collect()
    }

    /// Advances every flame animation by one frame.
    pub fn animate(&mut self) {
        let frames = self.fire.fire_frame_count;
        for tile in self.tiles.iter_mut() {
            tile.animate(frames);
        }
    }

    /// Hands the current frame to `renderer`, then advances the animations.
    pub fn render(&mut self, renderer: &mut dyn Renderer) {
        renderer.draw(&self.tiles, &self.agent, &self.target);
        renderer.animate();
        self.animate();
    }
}

pub(crate) fn traversable_in(tiles: &Matrix<Tile>) -> Vec<Position> {
    tiles
        .enumerate()
        .filter(|(_, tile)| tile.is_traversable())
        .map(|(p, _)| p)
        .collect()
}

fn check_spawn(
    tiles: &Matrix<Tile>,
    role: &'static str,
    position: Position,
) -> Result<Position, GridError> {
    match tiles.get(position) {
        None => Err(GridError::OutOfBounds {
            position,
            size: tiles.width(),
        }),
        Some(tile) if !tile.is_traversable() => Err(GridError::NotTraversable { role, position }),
        Some(_) => Ok(position),
    }
}
