use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    Action,
    environment::{FireFighterWorld, Observation, StepResult},
};

/// Trait defining the behavior of a controller driving the firefighter.
pub trait Agent {
    /// Picks the next action given the current observation and the actions
    /// that are legal from it.
    fn get_action(&mut self, observation: &Observation, legal_actions: &[Action]) -> Action;

    /// Called after every step with the transition it produced.
    /// Learning agents update themselves here; planners ignore it.
    fn observe(&mut self, _observation: &Observation, _action: Action, _result: &StepResult) {}
}

/// Totals collected while rolling out one episode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeSummary {
    pub steps: usize,
    pub total_reward: f64,
    pub illegal_moves: usize,
    pub rescued: bool,
    pub died: bool,
    /// The step cap ended the episode before it terminated.
    pub truncated: bool,
}

/// Lets `agent` act in `env` from its current state until the episode
/// terminates or `max_steps` steps have been taken.
///
/// The caller is responsible for resetting `env` beforehand.
pub fn run_episode<A: Agent + ?Sized>(
    env: &mut FireFighterWorld,
    agent: &mut A,
    max_steps: usize,
) -> EpisodeSummary {
    run_episode_with(env, agent, max_steps, |_, _, _| {})
}

/// Same as [`run_episode`], calling `on_step` after every step.
pub fn run_episode_with<A, F>(
    env: &mut FireFighterWorld,
    agent: &mut A,
    max_steps: usize,
    mut on_step: F,
) -> EpisodeSummary
where
    A: Agent + ?Sized,
    F: FnMut(&mut FireFighterWorld, Action, &StepResult),
{
    let mut summary = EpisodeSummary::default();
    let mut observation = env.observation();

    while summary.steps < max_steps {
        let legal = env.legal_actions();
        let action = agent.get_action(&observation, &legal);
        let result = env.step(action);
        agent.observe(&observation, action, &result);
        on_step(env, action, &result);

        summary.steps += 1;
        summary.total_reward += result.reward;
        if !result.info.is_legal_move {
            summary.illegal_moves += 1;
        }
        observation = result.observation;

        if result.terminated {
            summary.died = result.info.is_agent_dead;
            summary.rescued = !summary.died;
            break;
        }
    }
    summary.truncated = !summary.rescued && !summary.died;

    debug!(
        steps = summary.steps,
        reward = summary.total_reward,
        rescued = summary.rescued,
        died = summary.died,
        "episode finished"
    );
    summary
}

/// Replays a fixed list of actions, then keeps repeating the last one.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    actions: Vec<Action>,
    cursor: usize,
}

impl ScriptedAgent {
    pub fn new(actions: Vec<Action>) -> Self {
        ScriptedAgent { actions, cursor: 0 }
    }
}

impl Agent for ScriptedAgent {
    fn get_action(&mut self, _observation: &Observation, _legal_actions: &[Action]) -> Action {
        let action = self
            .actions
            .get(self.cursor)
            .or(self.actions.last())
            .copied()
            .unwrap_or(Action::PutOutFire);
        self.cursor += 1;
        action
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Config, Position, environment::ResetOptions, room::RoomKind};

    fn static_empty(size: usize) -> FireFighterWorld {
        let mut config = Config::default();
        config.grid.grid_size = size;
        config.grid.room = RoomKind::Empty;
        config.grid.static_fire_mode = true;
        FireFighterWorld::new(config, 0).unwrap()
    }

    #[test]
    fn scripted_rescue_terminates() {
        let mut env = static_empty(3);
        env.reset(None, &ResetOptions::placed(Position::new(0, 0), Position::new(2, 0)))
            .unwrap();
        let mut agent = ScriptedAgent::new(vec![Action::Right, Action::Right]);
        let summary = run_episode(&mut env, &mut agent, 10);
        assert_eq!(summary.steps, 2);
        assert!(summary.rescued);
        assert!(!summary.died);
        assert!(!summary.truncated);
    }

    #[test]
    fn step_hook_sees_every_step() {
        let mut env = static_empty(3);
        env.reset(None, &ResetOptions::placed(Position::new(0, 0), Position::new(0, 2)))
            .unwrap();
        let mut agent = ScriptedAgent::new(vec![Action::Left, Action::Down, Action::Down]);
        let mut seen = Vec::new();
        let summary = run_episode_with(&mut env, &mut agent, 10, |env, action, result| {
            seen.push((action, env.grid().agent().position, result.info.is_legal_move));
        });
        assert_eq!(summary.steps, 3);
        assert_eq!(summary.illegal_moves, 1);
        assert_eq!(
            seen,
            vec![
                (Action::Left, Position::new(0, 0), false),
                (Action::Down, Position::new(0, 1), true),
                (Action::Down, Position::new(0, 2), true),
            ]
        );
    }

    #[test]
    fn step_cap_truncates() {
        let mut env = static_empty(3);
        env.reset(None, &ResetOptions::placed(Position::new(0, 0), Position::new(2, 2)))
            .unwrap();
        let mut agent = ScriptedAgent::new(vec![Action::Up]);
        let summary = run_episode(&mut env, &mut agent, 5);
        assert_eq!(summary.steps, 5);
        assert_eq!(summary.illegal_moves, 5);
        assert!(summary.truncated);
    }
}
