use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fire_evac_core::{
    Config, FireFighterWorld, MdpSolver, QLearningAgent, ResetOptions,
    agent::{Agent, EpisodeSummary, run_episode_with},
    q_learning::QTable,
    render::TextRenderer,
};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// TOML configuration file; built-in defaults are used when omitted
    #[arg(short, long, value_name = "CONFIG_FILE", global = true)]
    config: Option<PathBuf>,

    /// Seed for the environment and the learner
    #[arg(short, long, default_value_t = 0, global = true)]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Solve the static-fire MDP with value iteration and roll out the policy
    Solve {
        /// Print every frame of the rollout
        #[arg(long)]
        render: bool,
    },
    /// Train a tabular Q-learning agent
    Train {
        /// Number of episodes; overrides the configured value
        #[arg(short, long)]
        episodes: Option<usize>,
        /// Where to write the learned Q-table
        #[arg(short, long, value_name = "FILE")]
        q_table: Option<PathBuf>,
    },
    /// Run a saved Q-table greedily
    Evaluate {
        #[arg(short, long, value_name = "FILE")]
        q_table: PathBuf,
        #[arg(short, long, default_value_t = 10)]
        episodes: usize,
        #[arg(long)]
        render: bool,
    },
}

/// Delay between rendered frames.
const FRAME_DELAY: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    config.validate()?;

    match args.command {
        Command::Solve { render } => solve(config, args.seed, render),
        Command::Train { episodes, q_table } => train(config, args.seed, episodes, q_table),
        Command::Evaluate {
            q_table,
            episodes,
            render,
        } => evaluate(config, args.seed, &q_table, episodes, render),
    }
}

fn solve(mut config: Config, seed: u64, render: bool) -> Result<()> {
    let mut solver = MdpSolver::new(&config)?;
    if let Some(convergence) = solver.convergence() {
        info!(
            iterations = convergence.iterations,
            delta = convergence.delta,
            converged = convergence.converged,
            "{solver}"
        );
    }

    config.grid.static_fire_mode = true;
    let options = ResetOptions::default().with_fire(config.mdp.preset_fire_positions.clone());
    let max_steps = config.q_learning.max_steps_per_episode;
    let mut env = FireFighterWorld::new(config, seed)?;
    env.reset(Some(seed), &options)?;

    let summary = play(&mut env, &mut solver, max_steps, render);
    report(&summary);
    Ok(())
}

fn train(
    config: Config,
    seed: u64,
    episodes: Option<usize>,
    q_table: Option<PathBuf>,
) -> Result<()> {
    let episodes = episodes.unwrap_or(config.q_learning.episodes);
    let mut env = FireFighterWorld::new(config.clone(), seed)?;
    let mut agent = QLearningAgent::new(&config, seed);

    info!(episodes, "training started");
    let report = agent.train(&mut env, episodes, &ResetOptions::default())?;

    if let Some(mean_reward) = report.recent_mean_reward() {
        info!(
            mean_reward,
            rescued = report.recent_rescued(),
            of = report.recent.len(),
            total_rescued = report.rescued,
            total_died = report.died,
            epsilon = agent.epsilon(),
            "training finished"
        );
    }

    if let Some(path) = q_table {
        agent
            .table()
            .save(&path)
            .with_context(|| format!("Failed to save Q-table to {}", path.display()))?;
        info!(path = %path.display(), "Q-table saved");
    }
    Ok(())
}

fn evaluate(
    config: Config,
    seed: u64,
    q_table: &Path,
    episodes: usize,
    render: bool,
) -> Result<()> {
    let table = QTable::load(q_table, config.grid.grid_size)
        .with_context(|| format!("Failed to load Q-table {}", q_table.display()))?;
    let max_steps = config.q_learning.max_steps_per_episode;
    let mut agent = QLearningAgent::with_table(&config, table, seed);
    agent.set_epsilon(0.0);
    let mut env = FireFighterWorld::new(config, seed)?;

    let mut rescued = 0;
    for episode in 0..episodes {
        env.reset(None, &ResetOptions::default())?;
        let summary = play(&mut env, &mut agent, max_steps, render);
        if summary.rescued {
            rescued += 1;
        }
        info!(episode, steps = summary.steps, reward = summary.total_reward, "evaluated");
    }
    info!(rescued, episodes, "evaluation finished");
    Ok(())
}

/// Rolls out one episode, optionally printing each frame.
fn play(
    env: &mut FireFighterWorld,
    agent: &mut dyn Agent,
    max_steps: usize,
    render: bool,
) -> EpisodeSummary {
    let mut renderer = TextRenderer::new();
    if render {
        draw(env, &mut renderer);
    }
    run_episode_with(env, agent, max_steps, |env, action, result| {
        if render {
            println!("{action:?} -> reward {:.2}", result.reward);
            draw(env, &mut renderer);
        }
    })
}

fn draw(env: &mut FireFighterWorld, renderer: &mut TextRenderer) {
    env.render(renderer);
    for frame in renderer.drain() {
        println!("{frame}");
    }
    thread::sleep(FRAME_DELAY);
}

fn report(summary: &EpisodeSummary) {
    let outcome = if summary.rescued {
        "cat rescued"
    } else if summary.died {
        "firefighter died"
    } else {
        "step limit reached"
    };
    info!(
        steps = summary.steps,
        reward = summary.total_reward,
        illegal_moves = summary.illegal_moves,
        "{outcome}"
    );
}
