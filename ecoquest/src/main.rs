use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ecoquest::{completion, AppConfig, EcoQuest, JoinChallenge, LeaderboardPeriod, PacketState};
use ecoquest_sync::QueryObserver;

#[derive(Parser)]
#[command(name = "ecoquest")]
#[command(about = "EcoQuest client: profiles, daily tasks, journals and challenges", long_about = None)]
struct Cli {
    /// Base URL of the EcoQuest API
    #[arg(long, env = "ECOQUEST_API_URL")]
    api_url: Option<String>,

    /// Bearer token of the signed-in user
    #[arg(long, env = "ECOQUEST_API_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "ECOQUEST_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Print cache statistics after the command
    #[arg(long)]
    stats: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the signed-in user's profile
    Profile,

    /// List today's tasks
    Tasks,

    /// Mark a task as completed
    Complete {
        /// Task ID
        task_id: i64,

        /// Mark the task as not completed instead
        #[arg(long)]
        undo: bool,
    },

    /// Show the active task packet
    Packet,

    /// List journal entries
    Journals,

    /// List photo albums
    Albums,

    /// Show the leaderboard
    Leaderboard {
        /// daily, weekly, monthly or all-time
        #[arg(short, long, default_value = "weekly")]
        period: LeaderboardPeriod,
    },

    /// List challenges
    Challenges,

    /// Join a challenge
    Join {
        /// Challenge ID
        challenge_id: i64,
    },
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Mount a query, wait for it to settle and print the data
async fn show<T: Serialize + Send + Sync + 'static>(mut observer: QueryObserver<T>) -> Result<()> {
    if !observer.is_enabled() {
        anyhow::bail!("Not signed in. Set ECOQUEST_API_TOKEN or pass --token.");
    }
    let state = observer.settled().await;
    match (state.data, state.error) {
        (Some(data), _) => print_json(data.as_ref()),
        (None, Some(error)) => Err(error).with_context(|| format!("Failed to load {}", observer.key())),
        (None, None) => anyhow::bail!("No data for {}", observer.key()),
    }
}

/// Apply command-line overrides on top of the environment
fn apply_overrides(mut config: AppConfig, cli: &Cli) -> Result<AppConfig> {
    if let Some(url) = &cli.api_url {
        config = config.with_api_url(url.clone());
    }
    if let Some(token) = &cli.token {
        config = config.with_token(token.clone());
    }
    if let Some(secs) = cli.timeout_secs {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loads `.env` before clap reads the environment
    let config = AppConfig::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = apply_overrides(config, &cli)?;
    debug!("Using API at {}", config.api_url);

    let app = EcoQuest::new(&config)?;
    let _gc = app.client().start_gc();

    match cli.command {
        Commands::Profile => show(app.use_profile_me()).await?,

        Commands::Tasks => show(app.use_today_tasks()).await?,

        Commands::Complete { task_id, undo } => {
            // Load the list first so the optimistic flip has something to patch
            app.prefetch_home().await;

            let task = app
                .use_update_task_completion()
                .mutate_async(completion(task_id, !undo))
                .await
                .with_context(|| format!("Failed to update task {}", task_id))?;
            info!("Task {} completed: {}", task.id, task.completed);
            print_json(&task)?;
        }

        Commands::Packet => {
            let mut observer = app.use_my_packet();
            if !observer.is_enabled() {
                anyhow::bail!("Not signed in. Set ECOQUEST_API_TOKEN or pass --token.");
            }
            let state = observer.settled().await;
            match PacketState::from_result(&state) {
                PacketState::Active(packet) => print_json(packet.as_ref())?,
                PacketState::NoActivePacket => println!("No active packet."),
                PacketState::Failed(error) => return Err(error).context("Failed to load packet"),
                PacketState::Idle | PacketState::Loading => println!("Packet not loaded."),
            }
        }

        Commands::Journals => show(app.use_journals()).await?,

        Commands::Albums => show(app.use_albums()).await?,

        Commands::Leaderboard { period } => show(app.use_leaderboard(period)).await?,

        Commands::Challenges => show(app.use_challenges()).await?,

        Commands::Join { challenge_id } => {
            let mut challenges = app.use_challenges();
            challenges.settled().await;

            let challenge = app
                .use_join_challenge()
                .mutate_async(JoinChallenge { challenge_id })
                .await
                .with_context(|| format!("Failed to join challenge {}", challenge_id))?;
            print_json(&challenge)?;
        }
    }

    if cli.stats {
        let stats = app.client().stats();
        eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    }

    Ok(())
}
