use std::{collections::VecDeque, fs, path::Path};

use rand::{Rng, SeedableRng, rngs::StdRng, seq::IndexedRandom};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    Action,
    agent::{Agent, EpisodeSummary, run_episode},
    config::{Config, QLearningConfig},
    environment::{FireFighterWorld, Observation, ResetOptions, StepResult},
    grid::GridError,
};

#[derive(Debug, thiserror::Error)]
pub enum QTableError {
    #[error("Failed to access Q-table file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed Q-table file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Q-table shape {found:?} does not match expected {expected:?}")]
    ShapeMismatch {
        expected: [usize; 6],
        found: Vec<usize>,
    },
}

/// Dense action values indexed by
/// `(target_x, target_y, fire_nearby, agent_x, agent_y, action)`.
#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    grid_size: usize,
    values: Vec<f64>,
}

/// On-disk layout of a [`QTable`].
#[derive(Debug, Serialize, Deserialize)]
struct QTableFile {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl QTable {
    pub fn new(grid_size: usize) -> Self {
        let len = Self::shape_for(grid_size).iter().product();
        QTable {
            grid_size,
            values: vec![0.0; len],
        }
    }

    fn shape_for(grid_size: usize) -> [usize; 6] {
        [grid_size, grid_size, 2, grid_size, grid_size, Action::COUNT]
    }

    pub fn shape(&self) -> [usize; 6] {
        Self::shape_for(self.grid_size)
    }

    fn row_start(&self, observation: &Observation) -> usize {
        let g = self.grid_size;
        let fire = usize::from(observation.fire_nearby);
        let cell = (((observation.target.x * g + observation.target.y) * 2 + fire) * g
            + observation.agent.x)
            * g
            + observation.agent.y;
        cell * Action::COUNT
    }

    /// Action values for `observation`, indexed by `Action::index`.
    pub fn row(&self, observation: &Observation) -> &[f64] {
        let start = self.row_start(observation);
        &self.values[start..start + Action::COUNT]
    }

    pub fn get(&self, observation: &Observation, action: Action) -> f64 {
        self.values[self.row_start(observation) + action.index()]
    }

    pub fn set(&mut self, observation: &Observation, action: Action, value: f64) {
        let idx = self.row_start(observation) + action.index();
        self.values[idx] = value;
    }

    pub fn max_value(&self, observation: &Observation) -> f64 {
        self.row(observation)
            .iter()
            .copied()
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Highest-valued action; ties go to the lowest index.
    pub fn best_action(&self, observation: &Observation) -> Action {
        let row = self.row(observation);
        let mut best = 0;
        for (i, value) in row.iter().enumerate() {
            if *value > row[best] {
                best = i;
            }
        }
        Action::ALL[best]
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), QTableError> {
        let file = QTableFile {
            shape: self.shape().to_vec(),
            values: self.values.clone(),
        };
        fs::write(path, serde_json::to_string(&file)?)?;
        Ok(())
    }

    /// Loads a table saved by [`QTable::save`] and checks it against `grid_size`.
    pub fn load(path: impl AsRef<Path>, grid_size: usize) -> Result<Self, QTableError> {
        let contents = fs::read_to_string(path)?;
        let file: QTableFile = serde_json::from_str(&contents)?;
        let expected = Self::shape_for(grid_size);
        let expected_len: usize = expected.iter().product();
        if file.shape != expected || file.values.len() != expected_len {
            return Err(QTableError::ShapeMismatch {
                expected,
                found: file.shape,
            });
        }
        Ok(QTable {
            grid_size,
            values: file.values,
        })
    }
}

/// Number of most recent temporal-difference errors kept by the agent.
pub const TD_ERROR_WINDOW: usize = 10_000;

/// Number of most recent episode summaries kept in a [`TrainingReport`].
pub const RECENT_EPISODES: usize = 1_000;

/// Aggregate outcome of [`QLearningAgent::train`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    pub episodes: usize,
    pub rescued: usize,
    pub died: usize,
    /// Summaries of the last [`RECENT_EPISODES`] episodes, oldest first.
    pub recent: VecDeque<EpisodeSummary>,
}

impl TrainingReport {
    fn record(&mut self, summary: EpisodeSummary) {
        self.episodes += 1;
        self.rescued += usize::from(summary.rescued);
        self.died += usize::from(summary.died);
        if self.recent.len() == RECENT_EPISODES {
            self.recent.pop_front();
        }
        self.recent.push_back(summary);
    }

    pub fn recent_rescued(&self) -> usize {
        self.recent.iter().filter(|s| s.rescued).count()
    }

    pub fn recent_mean_reward(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let total: f64 = self.recent.iter().map(|s| s.total_reward).sum();
        Some(total / self.recent.len() as f64)
    }
}

/// Epsilon-greedy tabular Q-learner.
#[derive(Debug, Clone)]
pub struct QLearningAgent {
    table: QTable,
    params: QLearningConfig,
    epsilon: f64,
    min_reward: f64,
    max_reward: f64,
    rng: StdRng,
    training_error: VecDeque<f64>,
}

impl QLearningAgent {
    pub fn new(config: &Config, seed: u64) -> Self {
        Self::with_table(config, QTable::new(config.grid.grid_size), seed)
    }

    pub fn with_table(config: &Config, table: QTable, seed: u64) -> Self {
        QLearningAgent {
            table,
            params: config.q_learning.clone(),
            epsilon: config.q_learning.initial_epsilon,
            min_reward: config.rewards.min_reward,
            max_reward: config.rewards.max_reward,
            rng: StdRng::seed_from_u64(seed),
            training_error: VecDeque::with_capacity(TD_ERROR_WINDOW),
        }
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn set_epsilon(&mut self, epsilon: f64) {
        self.epsilon = epsilon;
    }

    /// Temporal-difference errors of the last [`TD_ERROR_WINDOW`] updates,
    /// oldest first.
    pub fn training_error(&self) -> &VecDeque<f64> {
        &self.training_error
    }

    /// With probability epsilon a uniformly random legal action, otherwise the
    /// greedy one.
    pub fn choose_action(&mut self, observation: &Observation, legal_actions: &[Action]) -> Action {
        if self.rng.random::<f64>() < self.epsilon {
            if let Some(&action) = legal_actions.choose(&mut self.rng) {
                return action;
            }
        }
        self.table.best_action(observation)
    }

    /// One-step temporal-difference update, clamped to the reward range.
    pub fn update(
        &mut self,
        observation: &Observation,
        action: Action,
        reward: f64,
        terminated: bool,
        next_observation: &Observation,
    ) {
        let q_value = self.table.get(observation, action);
        let future = if terminated {
            0.0
        } else {
            self.table.max_value(next_observation)
        };
        let temporal_difference = reward + self.params.discount_factor * future - q_value;
        let updated = (q_value + self.params.learning_rate * temporal_difference)
            .clamp(self.min_reward, self.max_reward);
        self.table.set(observation, action, updated);
        if self.training_error.len() == TD_ERROR_WINDOW {
            self.training_error.pop_front();
        }
        self.training_error.push_back(temporal_difference);
    }

    /// Linear decay towards `final_epsilon`.
    pub fn decay_epsilon(&mut self) {
        self.epsilon = (self.epsilon - self.params.epsilon_decay).max(self.params.final_epsilon);
    }

    /// Runs `episodes` training episodes from random spawns.
    pub fn train(
        &mut self,
        env: &mut FireFighterWorld,
        episodes: usize,
        options: &ResetOptions,
    ) -> Result<TrainingReport, GridError> {
        let max_steps = self.params.max_steps_per_episode;
        let mut report = TrainingReport::default();
        for _ in 0..episodes {
            env.reset(None, options)?;
            report.record(run_episode(env, self, max_steps));
            self.decay_epsilon();
            if report.episodes % 10_000 == 0 {
                info!(
                    episode = report.episodes,
                    epsilon = self.epsilon,
                    rescued = report.recent_rescued(),
                    of = report.recent.len(),
                    "training progress"
                );
            }
        }
        Ok(report)
    }
}

impl Agent for QLearningAgent {
    fn get_action(&mut self, observation: &Observation, legal_actions: &[Action]) -> Action {
        self.choose_action(observation, legal_actions)
    }

    fn observe(&mut self, observation: &Observation, action: Action, result: &StepResult) {
        self.update(
            observation,
            action,
            result.reward,
            result.terminated,
            &result.observation,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Position, room::RoomKind};
    use approx::assert_relative_eq;

    fn obs(agent: (usize, usize), target: (usize, usize), fire_nearby: bool) -> Observation {
        Observation {
            agent: agent.into(),
            target: target.into(),
            fire_nearby,
        }
    }

    #[test]
    fn table_rows_are_disjoint() {
        let mut table = QTable::new(3);
        assert_eq!(table.shape(), [3, 3, 2, 3, 3, 5]);
        let a = obs((0, 1), (2, 2), false);
        let b = obs((1, 0), (2, 2), false);
        let c = obs((0, 1), (2, 2), true);
        table.set(&a, Action::Down, 4.0);
        assert_eq!(table.get(&a, Action::Down), 4.0);
        assert_eq!(table.max_value(&b), 0.0);
        assert_eq!(table.max_value(&c), 0.0);
        assert_eq!(table.best_action(&a), Action::Down);
        assert_eq!(table.best_action(&b), Action::Right);
    }

    #[test]
    fn update_applies_td_rule() {
        let config = Config::default();
        let mut agent = QLearningAgent::new(&config, 0);
        let s = obs((0, 0), (5, 5), false);
        let s2 = obs((1, 0), (5, 5), false);
        agent.table.set(&s2, Action::Up, 10.0);

        agent.update(&s, Action::Right, 2.0, false, &s2);
        // 0 + 0.01 * (2 + 0.95 * 10 - 0)
        assert_relative_eq!(agent.table().get(&s, Action::Right), 0.115, epsilon = 1e-12);
        assert_relative_eq!(agent.training_error()[0], 11.5, epsilon = 1e-12);

        agent.update(&s, Action::Left, 2.0, true, &s2);
        assert_relative_eq!(agent.table().get(&s, Action::Left), 0.02, epsilon = 1e-12);
    }

    #[test]
    fn td_errors_keep_only_the_latest_window() {
        let config = Config::default();
        let mut agent = QLearningAgent::new(&config, 0);
        let s = obs((0, 0), (5, 5), false);
        for i in 0..TD_ERROR_WINDOW + 5 {
            agent.update(&s, Action::Up, i as f64, true, &s);
        }
        assert_eq!(agent.training_error().len(), TD_ERROR_WINDOW);
    }

    #[test]
    fn report_keeps_totals_but_bounds_history() {
        let mut report = TrainingReport::default();
        for i in 0..RECENT_EPISODES + 10 {
            report.record(EpisodeSummary {
                steps: i,
                rescued: i % 2 == 0,
                total_reward: 1.0,
                ..Default::default()
            });
        }
        assert_eq!(report.episodes, RECENT_EPISODES + 10);
        assert_eq!(report.rescued, (RECENT_EPISODES + 10) / 2);
        assert_eq!(report.recent.len(), RECENT_EPISODES);
        assert_eq!(report.recent.front().map(|s| s.steps), Some(10));
        assert_eq!(report.recent_mean_reward(), Some(1.0));
    }

    #[test]
    fn update_is_clamped() {
        let mut config = Config::default();
        config.q_learning.learning_rate = 1.0;
        let mut agent = QLearningAgent::new(&config, 0);
        let s = obs((0, 0), (5, 5), false);
        agent.update(&s, Action::Up, 500.0, true, &s);
        assert_eq!(agent.table().get(&s, Action::Up), 100.0);
        agent.update(&s, Action::Down, -500.0, true, &s);
        assert_eq!(agent.table().get(&s, Action::Down), -100.0);
    }

    #[test]
    fn epsilon_decays_to_floor() {
        let mut config = Config::default();
        config.q_learning.epsilon_decay = 0.4;
        let mut agent = QLearningAgent::new(&config, 0);
        agent.decay_epsilon();
        assert_relative_eq!(agent.epsilon(), 0.6);
        agent.decay_epsilon();
        agent.decay_epsilon();
        assert_relative_eq!(agent.epsilon(), 0.1);
    }

    #[test]
    fn greedy_when_epsilon_is_zero() {
        let config = Config::default();
        let mut agent = QLearningAgent::new(&config, 0);
        agent.set_epsilon(0.0);
        let s = obs((2, 2), (0, 0), false);
        agent.table.set(&s, Action::Left, 1.0);
        for _ in 0..10 {
            assert_eq!(agent.choose_action(&s, &[Action::Up]), Action::Left);
        }
    }

    #[test]
    fn exploration_only_picks_legal_actions() {
        let config = Config::default();
        let mut agent = QLearningAgent::new(&config, 3);
        agent.set_epsilon(1.0);
        let s = obs((0, 0), (5, 5), false);
        for _ in 0..50 {
            let action = agent.choose_action(&s, &[Action::Right, Action::Down]);
            assert!(matches!(action, Action::Right | Action::Down));
        }
    }

    #[test]
    fn save_and_load_preserve_values() {
        let mut table = QTable::new(2);
        table.set(&obs((1, 1), (0, 0), true), Action::PutOutFire, -3.5);
        let path = std::env::temp_dir().join(format!("q_table_{}.json", std::process::id()));
        table.save(&path).unwrap();
        let loaded = QTable::load(&path, 2).unwrap();
        assert_eq!(loaded, table);
        assert!(matches!(
            QTable::load(&path, 3),
            Err(QTableError::ShapeMismatch { .. })
        ));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn training_learns_a_short_corridor() {
        let mut config = Config::default();
        config.grid.grid_size = 2;
        config.grid.room = RoomKind::Empty;
        config.grid.static_fire_mode = true;
        config.q_learning.learning_rate = 0.5;
        config.q_learning.epsilon_decay = 0.01;
        config.q_learning.max_steps_per_episode = 20;
        let mut env = FireFighterWorld::new(config.clone(), 0).unwrap();
        let mut agent = QLearningAgent::new(&config, 0);
        let options = ResetOptions::placed(Position::new(0, 0), Position::new(1, 0));

        let report = agent.train(&mut env, 200, &options).unwrap();
        assert_eq!(report.episodes, 200);
        assert_eq!(report.recent.len(), 200);
        assert_eq!(report.died, 0);
        assert!(report.rescued > 0);
        assert!(agent.epsilon() < 1.0);

        let start = obs((0, 0), (1, 0), false);
        assert_eq!(agent.table().best_action(&start), Action::Right);
    }
}
