use rand::{SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    Action, Position,
    config::Config,
    grid::{Grid, GridError, Spawn, StepOutcome},
    render::Renderer,
};

/// Options accepted by [`FireFighterWorld::reset`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetOptions {
    /// Honoured only in static fire mode.
    pub initial_agent_pos: Option<Position>,
    /// Honoured only in static fire mode.
    pub initial_target_pos: Option<Position>,
    pub preset_fire_mode: bool,
    /// Tiles set alight right after the grid is built when `preset_fire_mode` is on.
    pub preset_fire_positions: Vec<Position>,
}

impl ResetOptions {
    pub fn placed(agent: Position, target: Position) -> Self {
        ResetOptions {
            initial_agent_pos: Some(agent),
            initial_target_pos: Some(target),
            ..Default::default()
        }
    }

    pub fn with_fire(mut self, positions: impl IntoIterator<Item = Position>) -> Self {
        self.preset_fire_mode = true;
        self.preset_fire_positions = positions.into_iter().collect();
        self
    }
}

/// What the learner sees after every reset and step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Observation {
    pub agent: Position,
    pub target: Position,
    /// Whether a tile orthogonally adjacent to the agent is burning.
    pub fire_nearby: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepInfo {
    pub is_legal_move: bool,
    pub is_agent_dead: bool,
    /// Euclidean distance between agent and target.
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub observation: Observation,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
    pub info: StepInfo,
}

/// Step/reset wrapper around a [`Grid`] that computes shaped, clamped rewards.
#[derive(Debug, Clone)]
pub struct FireFighterWorld {
    config: Config,
    rng: StdRng,
    grid: Grid,
    max_distance: f64,
}

impl FireFighterWorld {
    /// Builds the environment and an initial episode from `seed`.
    pub fn new(config: Config, seed: u64) -> Result<Self, GridError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let grid = Grid::new(config.grid.room.factory(), &config, Spawn::default(), &mut rng)?;
        let max_distance = config.max_distance();
        Ok(FireFighterWorld {
            config,
            rng,
            grid,
            max_distance,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// Mutable access for scripted scenarios (igniting tiles by hand, etc.).
    pub fn grid_mut(&mut self) -> &mut Grid {
        &mut self.grid
    }

    /// Starts a new episode on a freshly built room.
    ///
    /// A `seed` re-seeds the environment's generator first. Explicit spawn
    /// positions are used verbatim only in static fire mode.
    pub fn reset(
        &mut self,
        seed: Option<u64>,
        options: &ResetOptions,
    ) -> Result<(Observation, StepInfo), GridError> {
        if let Some(seed) = seed {
            self.rng = StdRng::seed_from_u64(seed);
        }

        let spawn = if self.config.grid.static_fire_mode {
            Spawn {
                agent: options.initial_agent_pos,
                target: options.initial_target_pos,
            }
        } else {
            Spawn::default()
        };
        let mut grid = Grid::new(
            self.config.grid.room.factory(),
            &self.config,
            spawn,
            &mut self.rng,
        )?;

        if options.preset_fire_mode {
            for &position in &options.preset_fire_positions {
                grid.ignite(position)?;
            }
        }
        self.grid = grid;

        let info = StepInfo {
            is_legal_move: true,
            is_agent_dead: self.grid.is_agent_dead(),
            distance: self.distance(),
        };
        Ok((self.observation(), info))
    }

    pub fn observation(&self) -> Observation {
        Observation {
            agent: self.grid.agent().position,
            target: self.grid.target().position,
            fire_nearby: self.grid.fire_near_agent(),
        }
    }

    fn distance(&self) -> f64 {
        self.grid.agent().position.distance(self.grid.target().position)
    }

    pub fn legal_actions(&self) -> Vec<Action> {
        self.grid.legal_actions()
    }

    /// Applies `action` and scores the result.
    pub fn step(&mut self, action: Action) -> StepResult {
        let outcome = self.grid.update(Some(action), &mut self.rng);
        let distance = self.distance();
        let is_agent_dead = self.grid.is_agent_dead();
        let rescued = self.grid.is_target_rescued();

        let reward = self.reward(action, outcome, distance, is_agent_dead, rescued);
        StepResult {
            observation: self.observation(),
            reward,
            terminated: is_agent_dead || rescued,
            truncated: false,
            info: StepInfo {
                is_legal_move: outcome.is_legal_move,
                is_agent_dead,
                distance,
            },
        }
    }

    /// Advances only the ambient fire dynamics.
    pub fn tick(&mut self) -> StepOutcome {
        self.grid.update(None, &mut self.rng)
    }

    fn reward(
        &self,
        action: Action,
        outcome: StepOutcome,
        distance: f64,
        is_agent_dead: bool,
        rescued: bool,
    ) -> f64 {
        let r = &self.config.rewards;
        let mut reward = r.time_step_punishment + r.distance_reward * (self.max_distance - distance);
        if !outcome.is_legal_move {
            reward += r.illegal_move_punishment;
        }
        if is_agent_dead {
            reward += r.death_punishment;
        } else if rescued {
            reward += r.evacuation_success_reward;
        }
        if action == Action::PutOutFire && outcome.extinguished.is_some() {
            reward += r.fire_extinguished_reward;
        }
        self.config.clamp_reward(reward)
    }

    pub fn render(&mut self, renderer: &mut dyn Renderer) {
        self.grid.render(renderer);
    }
}
