use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{Position, room::RoomKind, tile::ItemKind};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Top-level configuration, loaded once and passed into every constructor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub fire: FireConfig,
    #[serde(default)]
    pub rewards: RewardConfig,
    #[serde(default)]
    pub mdp: MdpConfig,
    #[serde(default)]
    pub q_learning: QLearningConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_grid_size")]
    pub grid_size: usize,
    #[serde(default)]
    pub room: RoomKind,
    /// Disables ambient ignition and self-extinguishing.
    #[serde(default)]
    pub static_fire_mode: bool,
    #[serde(default = "default_true")]
    pub random_target_location: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireConfig {
    #[serde(default = "default_chance_of_catching_fire")]
    pub chance_of_catching_fire: f64,
    #[serde(default = "default_chance_of_self_extinguish")]
    pub chance_of_self_extinguish: f64,
    #[serde(default = "default_wall_decoration_chance")]
    pub chance_of_wall_being_window: f64,
    #[serde(default = "default_wall_decoration_chance")]
    pub chance_of_wall_being_picture: f64,
    /// Multiplier applied to every item's base durability.
    #[serde(default = "default_durability_power")]
    pub durability_power: u32,
    /// Number of frames in the fire animation cycle.
    #[serde(default = "default_fire_frame_count")]
    pub fire_frame_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    #[serde(default = "default_time_step_punishment")]
    pub time_step_punishment: f64,
    #[serde(default = "default_illegal_move_punishment")]
    pub illegal_move_punishment: f64,
    #[serde(default = "default_death_punishment")]
    pub death_punishment: f64,
    #[serde(default = "default_evacuation_success_reward")]
    pub evacuation_success_reward: f64,
    #[serde(default = "default_fire_extinguished_reward")]
    pub fire_extinguished_reward: f64,
    #[serde(default = "default_distance_reward")]
    pub distance_reward: f64,
    #[serde(default = "default_min_reward")]
    pub min_reward: f64,
    #[serde(default = "default_max_reward")]
    pub max_reward: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MdpConfig {
    #[serde(default = "default_mdp_discount_factor")]
    pub discount_factor: f64,
    #[serde(default = "default_mdp_epsilon")]
    pub epsilon: f64,
    #[serde(default = "default_mdp_max_iterations")]
    pub max_iterations: usize,
    /// Fire layout applied to every simulated transition.
    #[serde(default = "default_preset_fire_positions")]
    pub preset_fire_positions: Vec<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QLearningConfig {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_q_discount_factor")]
    pub discount_factor: f64,
    #[serde(default = "default_initial_epsilon")]
    pub initial_epsilon: f64,
    #[serde(default = "default_epsilon_decay")]
    pub epsilon_decay: f64,
    #[serde(default = "default_final_epsilon")]
    pub final_epsilon: f64,
    #[serde(default = "default_episodes")]
    pub episodes: usize,
    #[serde(default = "default_max_steps_per_episode")]
    pub max_steps_per_episode: usize,
}

// Default values
fn default_true() -> bool { true }
fn default_grid_size() -> usize { 6 }
fn default_chance_of_catching_fire() -> f64 { 0.04 }
fn default_chance_of_self_extinguish() -> f64 { 0.004 }
fn default_wall_decoration_chance() -> f64 { 0.1 }
fn default_durability_power() -> u32 { 1 }
fn default_fire_frame_count() -> usize { 8 }
fn default_time_step_punishment() -> f64 { -1.0 }
fn default_illegal_move_punishment() -> f64 { -10.0 }
fn default_death_punishment() -> f64 { -100.0 }
fn default_evacuation_success_reward() -> f64 { 100.0 }
fn default_fire_extinguished_reward() -> f64 { 5.0 }
fn default_distance_reward() -> f64 { 0.1 }
fn default_min_reward() -> f64 { -100.0 }
fn default_max_reward() -> f64 { 100.0 }
fn default_mdp_discount_factor() -> f64 { 0.9 }
fn default_mdp_epsilon() -> f64 { 1e-6 }
fn default_mdp_max_iterations() -> usize { 10_000 }
fn default_preset_fire_positions() -> Vec<Position> {
    vec![Position::new(5, 0), Position::new(5, 1), Position::new(5, 3)]
}
fn default_learning_rate() -> f64 { 0.01 }
fn default_q_discount_factor() -> f64 { 0.95 }
fn default_initial_epsilon() -> f64 { 1.0 }
fn default_epsilon_decay() -> f64 { 2e-5 }
fn default_final_epsilon() -> f64 { 0.1 }
fn default_episodes() -> usize { 100_000 }
fn default_max_steps_per_episode() -> usize { 100 }

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            grid_size: default_grid_size(),
            room: RoomKind::default(),
            static_fire_mode: false,
            random_target_location: default_true(),
        }
    }
}

impl Default for FireConfig {
    fn default() -> Self {
        Self {
            chance_of_catching_fire: default_chance_of_catching_fire(),
            chance_of_self_extinguish: default_chance_of_self_extinguish(),
            chance_of_wall_being_window: default_wall_decoration_chance(),
            chance_of_wall_being_picture: default_wall_decoration_chance(),
            durability_power: default_durability_power(),
            fire_frame_count: default_fire_frame_count(),
        }
    }
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            time_step_punishment: default_time_step_punishment(),
            illegal_move_punishment: default_illegal_move_punishment(),
            death_punishment: default_death_punishment(),
            evacuation_success_reward: default_evacuation_success_reward(),
            fire_extinguished_reward: default_fire_extinguished_reward(),
            distance_reward: default_distance_reward(),
            min_reward: default_min_reward(),
            max_reward: default_max_reward(),
        }
    }
}

impl Default for MdpConfig {
    fn default() -> Self {
        Self {
            discount_factor: default_mdp_discount_factor(),
            epsilon: default_mdp_epsilon(),
            max_iterations: default_mdp_max_iterations(),
            preset_fire_positions: default_preset_fire_positions(),
        }
    }
}

impl Default for QLearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            discount_factor: default_q_discount_factor(),
            initial_epsilon: default_initial_epsilon(),
            epsilon_decay: default_epsilon_decay(),
            final_epsilon: default_final_epsilon(),
            episodes: default_episodes(),
            max_steps_per_episode: default_max_steps_per_episode(),
        }
    }
}

impl Config {
    /// Reads and validates a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid.grid_size < 2 {
            return Err(invalid("grid.grid_size", "must be at least 2"));
        }
        check_probability("fire.chance_of_catching_fire", self.fire.chance_of_catching_fire)?;
        check_probability("fire.chance_of_self_extinguish", self.fire.chance_of_self_extinguish)?;
        check_probability(
            "fire.chance_of_wall_being_window",
            self.fire.chance_of_wall_being_window,
        )?;
        check_probability(
            "fire.chance_of_wall_being_picture",
            self.fire.chance_of_wall_being_picture,
        )?;
        if self.fire.durability_power == 0
            || self
                .fire
                .durability_power
                .checked_mul(ItemKind::MAX_BASE_DURABILITY)
                .is_none()
        {
            return Err(invalid(
                "fire.durability_power",
                format!(
                    "must be between 1 and {}",
                    u32::MAX / ItemKind::MAX_BASE_DURABILITY
                ),
            ));
        }
        if self.fire.fire_frame_count == 0 {
            return Err(invalid("fire.fire_frame_count", "must be at least 1"));
        }
        if self.rewards.min_reward > self.rewards.max_reward {
            return Err(invalid(
                "rewards.min_reward",
                format!(
                    "{} exceeds max_reward {}",
                    self.rewards.min_reward, self.rewards.max_reward
                ),
            ));
        }
        check_discount("mdp.discount_factor", self.mdp.discount_factor)?;
        if self.mdp.epsilon <= 0.0 {
            return Err(invalid("mdp.epsilon", "must be positive"));
        }
        if let Some(p) = self
            .mdp
            .preset_fire_positions
            .iter()
            .find(|p| p.x >= self.grid.grid_size || p.y >= self.grid.grid_size)
        {
            return Err(invalid(
                "mdp.preset_fire_positions",
                format!("({}, {}) lies outside the grid", p.x, p.y),
            ));
        }
        check_discount("q_learning.discount_factor", self.q_learning.discount_factor)?;
        if self.q_learning.learning_rate <= 0.0 || self.q_learning.learning_rate > 1.0 {
            return Err(invalid("q_learning.learning_rate", "must be in (0, 1]"));
        }
        check_probability("q_learning.initial_epsilon", self.q_learning.initial_epsilon)?;
        check_probability("q_learning.final_epsilon", self.q_learning.final_epsilon)?;
        if self.q_learning.max_steps_per_episode == 0 {
            return Err(invalid("q_learning.max_steps_per_episode", "must be at least 1"));
        }
        Ok(())
    }

    /// Norm of the grid diagonal, used by the distance shaping term.
    pub fn max_distance(&self) -> f64 {
        let size = self.grid.grid_size as f64;
        (2.0 * size * size).sqrt()
    }

    /// Clamps a reward into `[min_reward, max_reward]`.
    pub fn clamp_reward(&self, reward: f64) -> f64 {
        reward.clamp(self.rewards.min_reward, self.rewards.max_reward)
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn check_probability(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} is not a probability")))
    }
}

fn check_discount(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{value} must lie in [0, 1)")))
    }
}
