use approx::assert_relative_eq;
use fire_evac_core::{
    Action, Config, FireFighterWorld, MdpSolver, Position, ResetOptions,
    agent::{ScriptedAgent, run_episode},
    room::RoomKind,
};
use proptest::prelude::*;

fn empty_room(size: usize, static_fire_mode: bool) -> Config {
    let mut config = Config::default();
    config.grid.grid_size = size;
    config.grid.room = RoomKind::Empty;
    config.grid.static_fire_mode = static_fire_mode;
    config.mdp.preset_fire_positions = vec![];
    config
}

fn world(config: Config, agent: (usize, usize), target: (usize, usize)) -> FireFighterWorld {
    let mut env = FireFighterWorld::new(config, 0).unwrap();
    env.reset(None, &ResetOptions::placed(agent.into(), target.into()))
        .unwrap();
    env
}

#[test]
fn rescue_across_an_empty_room() {
    let mut env = world(empty_room(4, true), (0, 0), (3, 3));
    let path = [
        Action::Right,
        Action::Right,
        Action::Right,
        Action::Down,
        Action::Down,
    ];
    for action in path {
        let result = env.step(action);
        assert!(result.info.is_legal_move);
        assert!(!result.terminated);
    }

    let result = env.step(Action::Down);
    assert!(result.terminated);
    assert!(!result.truncated);
    assert!(!result.info.is_agent_dead);
    assert_eq!(result.observation.agent, Position::new(3, 3));
    assert_relative_eq!(result.info.distance, 0.0);
    assert_relative_eq!(result.reward, -1.0 + 0.1 * 32f64.sqrt() + 100.0, epsilon = 1e-12);
}

#[test]
fn walking_into_fire_kills_the_firefighter() {
    let mut env = FireFighterWorld::new(empty_room(4, true), 0).unwrap();
    let options = ResetOptions::placed(Position::new(0, 0), Position::new(3, 3))
        .with_fire([Position::new(1, 0)]);
    let (observation, _) = env.reset(None, &options).unwrap();
    assert!(observation.fire_nearby);

    let result = env.step(Action::Right);
    assert!(result.info.is_legal_move);
    assert!(result.info.is_agent_dead);
    assert!(result.terminated);
    assert_eq!(result.reward, -100.0);
    assert!(env.grid().is_agent_dead());
}

#[test]
fn putting_out_adjacent_fire() {
    let mut env = FireFighterWorld::new(empty_room(4, true), 0).unwrap();
    let options = ResetOptions::placed(Position::new(0, 0), Position::new(3, 3))
        .with_fire([Position::new(0, 1)]);
    env.reset(None, &options).unwrap();
    assert!(env.legal_actions().contains(&Action::PutOutFire));

    let result = env.step(Action::PutOutFire);
    assert!(result.info.is_legal_move);
    assert!(!result.observation.fire_nearby);
    assert!(!env.grid().tile(Position::new(0, 1)).unwrap().is_on_fire());
    let expected = -1.0 + 0.1 * (32f64.sqrt() - 18f64.sqrt()) + 5.0;
    assert_relative_eq!(result.reward, expected, epsilon = 1e-12);
}

#[test]
fn putting_out_nothing_is_illegal() {
    let mut env = world(empty_room(4, true), (0, 0), (3, 3));
    assert!(!env.legal_actions().contains(&Action::PutOutFire));
    let before = env.grid().clone();

    let result = env.step(Action::PutOutFire);
    assert!(!result.info.is_legal_move);
    assert_eq!(env.grid(), &before);
    let expected = -1.0 + 0.1 * (32f64.sqrt() - 18f64.sqrt()) - 10.0;
    assert_relative_eq!(result.reward, expected, epsilon = 1e-12);
}

#[test]
fn illegal_moves_leave_the_world_untouched() {
    let mut env = world(empty_room(4, true), (0, 0), (3, 3));
    let before = env.grid().clone();
    for action in [Action::Up, Action::Left, Action::Up] {
        let result = env.step(action);
        assert!(!result.info.is_legal_move);
        assert_eq!(result.observation.agent, Position::new(0, 0));
    }
    assert_eq!(env.grid(), &before);
}

#[test]
fn walls_block_every_time() {
    let mut config = Config::default();
    config.grid.static_fire_mode = true;
    let mut env = world(config, (0, 1), (4, 4));
    for _ in 0..4 {
        let result = env.step(Action::Down);
        assert!(!result.info.is_legal_move);
        assert_eq!(result.observation.agent, Position::new(0, 1));
    }
}

#[test]
fn static_fire_is_deterministic() {
    let mut config = Config::default();
    config.grid.static_fire_mode = true;
    config.fire.chance_of_catching_fire = 1.0;
    config.fire.chance_of_self_extinguish = 1.0;
    let options = ResetOptions::placed(Position::new(1, 1), Position::new(0, 0))
        .with_fire([Position::new(5, 0), Position::new(5, 1)]);
    let actions = [
        Action::Right,
        Action::Down,
        Action::Down,
        Action::Left,
        Action::Up,
        Action::Up,
    ];

    let trace = |seed: u64| {
        let mut env = FireFighterWorld::new(config.clone(), seed).unwrap();
        env.reset(Some(seed), &options).unwrap();
        let burning_before = env.grid().tiles().iter().filter(|t| t.is_on_fire()).count();
        let results: Vec<_> = actions.iter().map(|&a| env.step(a)).collect();
        let burning_after = env.grid().tiles().iter().filter(|t| t.is_on_fire()).count();
        assert_eq!(burning_before, burning_after);
        results
    };
    assert_eq!(trace(1), trace(2));
}

#[test]
fn value_iteration_walks_shortest_paths() {
    let config = empty_room(3, true);
    let mut solver = MdpSolver::new(&config).unwrap();
    assert!(solver.convergence().unwrap().converged);
    let mut env = FireFighterWorld::new(config, 0).unwrap();

    let positions: Vec<Position> = (0..3)
        .flat_map(|y| (0..3).map(move |x| Position::new(x, y)))
        .collect();
    for &agent in &positions {
        for &target in &positions {
            if agent == target {
                continue;
            }
            env.reset(None, &ResetOptions::placed(agent, target)).unwrap();
            let summary = run_episode(&mut env, &mut solver, 20);
            assert!(summary.rescued, "{agent:?} -> {target:?}");
            assert_eq!(summary.steps, agent.manhattan_distance(target), "{agent:?} -> {target:?}");
            assert_eq!(summary.illegal_moves, 0);
        }
    }
}

#[test]
fn scripted_agent_reaches_cat_in_training_room() {
    let mut config = Config::default();
    config.grid.static_fire_mode = true;
    let mut env = world(config, (4, 0), (4, 3));
    let mut agent = ScriptedAgent::new(vec![Action::Down; 3]);
    let summary = run_episode(&mut env, &mut agent, 10);
    assert!(summary.rescued);
    assert_eq!(summary.steps, 3);
}

proptest! {
    #[test]
    fn dynamic_fire_keeps_world_consistent(
        seed in any::<u64>(),
        actions in prop::collection::vec(0..Action::COUNT, 1..60),
    ) {
        let mut config = Config::default();
        config.fire.chance_of_catching_fire = 0.5;
        config.fire.chance_of_self_extinguish = 0.2;
        let mut env = FireFighterWorld::new(config.clone(), seed).unwrap();
        let size = config.grid.grid_size;

        for index in actions {
            let action = Action::from_index(index).unwrap();
            let legal = env.legal_actions();
            let result = env.step(action);

            prop_assert_eq!(result.info.is_legal_move, legal.contains(&action));
            prop_assert!(result.reward >= config.rewards.min_reward);
            prop_assert!(result.reward <= config.rewards.max_reward);
            prop_assert!(!result.truncated);

            let agent = env.grid().agent().position;
            prop_assert!(agent.x < size && agent.y < size);
            prop_assert!(env.grid().tile(agent).unwrap().is_traversable());
            for (position, tile) in env.grid().tiles().enumerate() {
                prop_assert!(!tile.is_on_fire() || tile.is_inflammable(), "{:?}", position);
            }

            if result.terminated {
                break;
            }
        }
    }
}
