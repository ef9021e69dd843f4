//! Exact solver for the static-fire variant of the environment.
//!
//! States are ordered pairs `(agent, target)` of traversable positions. The
//! transition and reward tables are filled by simulating one step of the real
//! environment for every state/action pair, after which value iteration
//! computes an optimal stationary policy.
//!
//! Building the tables costs `|traversable|^2 * |actions|` resets and steps.

use std::collections::{HashMap, HashSet};

use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::{
    Action, Position,
    agent::Agent,
    config::Config,
    environment::{FireFighterWorld, Observation, ResetOptions},
    grid::{GridError, traversable_in},
    room::RoomFactory,
};

/// Actions considered by the solver, in policy-index order.
pub const MDP_ACTIONS: [Action; 5] = [
    Action::Up,
    Action::Down,
    Action::Left,
    Action::Right,
    Action::PutOutFire,
];

/// Returned by [`MdpSolver::get_optimal_action`] for states outside the space.
pub const FALLBACK_ACTION: Action = Action::Up;

const SIMULATION_SEED: u64 = 0;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolverError {
    #[error("Failed to simulate the environment: {0}")]
    Simulation(#[from] GridError),
    #[error("The room places items at random, so its layout is not a fixed state space")]
    RandomLayout,
    #[error("The room needs at least two traversable tiles to place agent and target, found {found}")]
    TooFewTraversable { found: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MdpState {
    pub agent: Position,
    pub target: Position,
}

/// Outcome of the value iteration sweep loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Convergence {
    pub iterations: usize,
    pub delta: f64,
    pub converged: bool,
}

struct Simulated {
    next: MdpState,
    reward: f64,
}

pub struct MdpSolver {
    positions: Vec<Position>,
    states: Vec<MdpState>,
    state_to_idx: HashMap<MdpState, usize>,
    /// Sparse rows of `P[s, a, ·]`, stored at `s * |A| + a`.
    transitions: Vec<Vec<(usize, f64)>>,
    /// `R[s, a]`, stored at `s * |A| + a`.
    rewards: Vec<f64>,
    /// Episode-ending configurations, held at zero value.
    terminal: Vec<bool>,
    value_function: Vec<f64>,
    policy: Vec<usize>,
    discount_factor: f64,
    epsilon: f64,
    max_iterations: usize,
    convergence: Option<Convergence>,
}

impl MdpSolver {
    /// Enumerates the state space, simulates the tables and runs value iteration.
    pub fn new(config: &Config) -> Result<Self, SolverError> {
        let mut solver = Self::build(config)?;
        solver.value_iteration();
        Ok(solver)
    }

    /// Enumerates the state space and simulates the tables without solving.
    pub fn build(config: &Config) -> Result<Self, SolverError> {
        let mut config = config.clone();
        config.grid.static_fire_mode = true;

        let room = config.grid.room.factory();
        if !room.random_items().is_empty() {
            return Err(SolverError::RandomLayout);
        }

        let positions = traversable_layout(room, &config)?;

        let states: Vec<MdpState> = positions
            .iter()
            .flat_map(|&agent| positions.iter().map(move |&target| MdpState { agent, target }))
            .collect();
        let state_to_idx: HashMap<MdpState, usize> =
            states.iter().enumerate().map(|(i, s)| (*s, i)).collect();

        let fire: HashSet<Position> = config.mdp.preset_fire_positions.iter().copied().collect();
        let terminal = states
            .iter()
            .map(|s| s.agent == s.target || fire.contains(&s.agent))
            .collect();

        info!(
            states = states.len(),
            actions = MDP_ACTIONS.len(),
            "building MDP tables"
        );

        let simulator = FireFighterWorld::new(config.clone(), SIMULATION_SEED)?;
        let preset = config.mdp.preset_fire_positions.clone();
        let simulated: Vec<Vec<Simulated>> = states
            .par_iter()
            .map_init(
                || simulator.clone(),
                |env, state| simulate_state(env, *state, &preset),
            )
            .collect::<Result<_, GridError>>()?;

        let mut transitions = Vec::with_capacity(states.len() * MDP_ACTIONS.len());
        let mut rewards = Vec::with_capacity(states.len() * MDP_ACTIONS.len());
        for (s_idx, row) in simulated.into_iter().enumerate() {
            for outcome in row {
                let next_idx = match state_to_idx.get(&outcome.next) {
                    Some(&idx) => idx,
                    None => {
                        warn!(
                            state = ?states[s_idx],
                            next = ?outcome.next,
                            "simulated next state is outside the state space, using a self-loop"
                        );
                        s_idx
                    }
                };
                transitions.push(vec![(next_idx, 1.0)]);
                rewards.push(outcome.reward);
            }
        }

        let n = states.len();
        Ok(MdpSolver {
            positions,
            states,
            state_to_idx,
            transitions,
            rewards,
            terminal,
            value_function: vec![0.0; n],
            policy: vec![0; n],
            discount_factor: config.mdp.discount_factor,
            epsilon: config.mdp.epsilon,
            max_iterations: config.mdp.max_iterations,
            convergence: None,
        })
    }

    /// Synchronous Bellman sweeps from `V = 0` until the largest change drops
    /// below `epsilon` or the iteration cap is reached.
    pub fn value_iteration(&mut self) -> Convergence {
        let n = self.states.len();
        let actions = MDP_ACTIONS.len();
        let mut values = vec![0.0; n];
        let mut iterations = 0;

        let convergence = loop {
            iterations += 1;
            let mut next_values = vec![0.0; n];
            let mut delta: f64 = 0.0;

            for s in 0..n {
                if self.terminal[s] {
                    self.policy[s] = 0;
                    continue;
                }
                let mut best_value = f64::NEG_INFINITY;
                let mut best_action = 0;
                for a in 0..actions {
                    let q = self.q_value(&values, s, a);
                    // strict comparison keeps the first maximising action
                    if q > best_value {
                        best_value = q;
                        best_action = a;
                    }
                }
                next_values[s] = best_value;
                self.policy[s] = best_action;
                delta = delta.max((best_value - values[s]).abs());
            }

            values = next_values;
            if delta < self.epsilon {
                info!(iterations, delta, "value iteration converged");
                break Convergence {
                    iterations,
                    delta,
                    converged: true,
                };
            }
            if iterations % 100 == 0 {
                debug!(iterations, delta, "value iteration progress");
            }
            if iterations >= self.max_iterations {
                warn!(iterations, delta, "value iteration hit the iteration cap");
                break Convergence {
                    iterations,
                    delta,
                    converged: false,
                };
            }
        };

        self.value_function = values;
        self.convergence = Some(convergence);
        convergence
    }

    /// `R(s, a) + γ · Σ P(s, a, s') · V(s')` under `values`.
    fn q_value(&self, values: &[f64], state: usize, action: usize) -> f64 {
        let idx = state * MDP_ACTIONS.len() + action;
        let expected: f64 = self.transitions[idx]
            .iter()
            .map(|&(next, p)| p * values[next])
            .sum();
        self.rewards[idx] + self.discount_factor * expected
    }

    /// One-step lookahead value of `action` in `state` under the solved value
    /// function.
    pub fn action_value(&self, state: usize, action: Action) -> Option<f64> {
        let a = MDP_ACTIONS.iter().position(|candidate| *candidate == action)?;
        Some(self.q_value(&self.value_function, state, a))
    }

    pub fn state_index(&self, agent: Position, target: Position) -> Option<usize> {
        self.state_to_idx.get(&MdpState { agent, target }).copied()
    }

    /// The policy's action for the given configuration.
    ///
    /// Pairs outside the enumerated space are reported and answered with
    /// [`FALLBACK_ACTION`].
    pub fn get_optimal_action(&self, agent: Position, target: Position) -> Action {
        match self.state_index(agent, target) {
            Some(idx) => MDP_ACTIONS[self.policy[idx]],
            None => {
                error!(
                    ?agent,
                    ?target,
                    "state not found in MDP state space, returning default action"
                );
                FALLBACK_ACTION
            }
        }
    }

    pub fn actions(&self) -> &[Action] {
        &MDP_ACTIONS
    }

    pub fn traversable_positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn states(&self) -> &[MdpState] {
        &self.states
    }

    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    pub fn is_terminal(&self, state: usize) -> bool {
        self.terminal[state]
    }

    /// `P[s, a, s']`.
    pub fn transition_probability(&self, state: usize, action: usize, next: usize) -> f64 {
        self.transitions[state * MDP_ACTIONS.len() + action]
            .iter()
            .filter(|(idx, _)| *idx == next)
            .map(|(_, p)| p)
            .sum()
    }

    /// The successor states of `(s, a)` with their probabilities.
    pub fn successors(&self, state: usize, action: usize) -> &[(usize, f64)] {
        &self.transitions[state * MDP_ACTIONS.len() + action]
    }

    /// `R[s, a]`.
    pub fn reward(&self, state: usize, action: usize) -> f64 {
        self.rewards[state * MDP_ACTIONS.len() + action]
    }

    pub fn value_function(&self) -> &[f64] {
        &self.value_function
    }

    pub fn policy(&self) -> &[usize] {
        &self.policy
    }

    pub fn convergence(&self) -> Option<Convergence> {
        self.convergence
    }
}

impl std::fmt::Display for MdpSolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "MdpSolver ({} states, {} actions)",
            self.states.len(),
            MDP_ACTIONS.len()
        )
    }
}

impl Agent for MdpSolver {
    /// Follows the policy while its action is legal in the live world.
    ///
    /// States carry no fire layout, so a fire already put out still looks
    /// burning to the policy. In that case the best legal action by one-step
    /// lookahead is taken instead.
    fn get_action(&mut self, observation: &Observation, legal_actions: &[Action]) -> Action {
        let action = self.get_optimal_action(observation.agent, observation.target);
        if legal_actions.is_empty() || legal_actions.contains(&action) {
            return action;
        }
        let Some(state) = self.state_index(observation.agent, observation.target) else {
            return action;
        };
        let mut best: Option<(Action, f64)> = None;
        for &candidate in legal_actions {
            let Some(value) = self.action_value(state, candidate) else {
                continue;
            };
            if best.is_none_or(|(_, best_value)| value > best_value) {
                best = Some((candidate, value));
            }
        }
        match best {
            Some((candidate, _)) => {
                debug!(
                    ?action,
                    ?candidate,
                    "policy action is illegal, using best legal action"
                );
                candidate
            }
            None => action,
        }
    }
}

/// Traversable positions of the room's fixed layout.
fn traversable_layout(
    room: &dyn RoomFactory,
    config: &Config,
) -> Result<Vec<Position>, SolverError> {
    let mut rng = StdRng::seed_from_u64(SIMULATION_SEED);
    let tiles = room
        .create_tiles(config.grid.grid_size, &config.fire, &mut rng)
        .map_err(GridError::from)?;
    let positions = traversable_in(&tiles);
    if positions.len() < 2 {
        return Err(SolverError::TooFewTraversable {
            found: positions.len(),
        });
    }
    Ok(positions)
}

/// One reset and one step per action from `state`.
fn simulate_state(
    env: &mut FireFighterWorld,
    state: MdpState,
    preset_fire: &[Position],
) -> Result<Vec<Simulated>, GridError> {
    let options =
        ResetOptions::placed(state.agent, state.target).with_fire(preset_fire.iter().copied());
    MDP_ACTIONS
        .iter()
        .map(|&action| {
            env.reset(None, &options)?;
            let result = env.step(action);
            Ok(Simulated {
                next: MdpState {
                    agent: result.observation.agent,
                    target: result.observation.target,
                },
                reward: result.reward,
            })
        })
        .collect()
}
