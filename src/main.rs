//! Process entry point - the composition root for the TTS media pipeline
//! and foveated session context manager.
//!
//! All CLI subcommands receive the fully-composed [`bootstrap::AppContext`]
//! rather than touching the database, cache, or resource pool directly.

mod bootstrap;
mod config;
mod error;
mod http;

use clap::{Parser, Subcommand};
use tracing::info;

use crate::config::Settings;

#[derive(Parser)]
#[command(name = "tts-platform", about = "Tiered, priority-aware TTS media pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the admin HTTP surface (health check, cache/pool/job introspection).
    Serve {
        #[arg(long)]
        bind_addr: Option<String>,
    },
    /// Print a pre-gen job's current status as JSON.
    JobStatus { job_id: String },
    /// Pause a running pre-gen job.
    PauseJob { job_id: String },
    /// Resume a paused or failed pre-gen job.
    ResumeJob { job_id: String },
    /// Cancel a pre-gen job.
    CancelJob { job_id: String },
    /// Print current cache statistics as JSON.
    CacheStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::from_env();
    let ctx = bootstrap::bootstrap(settings).await?;

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Commands::Serve { bind_addr } => {
            let addr = bind_addr.unwrap_or_else(|| ctx.settings.admin_bind_addr.clone());
            info!(%addr, "starting admin HTTP surface");
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            let router = http::router(std::sync::Arc::new(ctx));
            axum::serve(listener, router).await?;
        }
        Commands::JobStatus { job_id } => {
            let job = ctx.job_engine.get_job(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        Commands::PauseJob { job_id } => {
            ctx.job_engine.pause_job(&job_id).await?;
            println!("job {job_id} paused");
        }
        Commands::ResumeJob { job_id } => {
            ctx.job_engine.resume_job(&job_id).await?;
            println!("job {job_id} resumed");
        }
        Commands::CancelJob { job_id } => {
            ctx.job_engine.cancel_job(&job_id).await?;
            println!("job {job_id} cancelled");
        }
        Commands::CacheStats => {
            let stats = ctx.cache.stats().await;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}
