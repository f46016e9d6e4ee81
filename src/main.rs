mod error;
mod labels;
mod list;
mod podman;
mod runtime;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::process::exit;
use tracing::debug;

use podman::Engine;
use runtime::Runtime;

// ======================================================
// CLI
// ======================================================

#[derive(Parser)]
#[command(name = "hutch")]
#[command(about = "List and manage hutch development containers and images")]
struct Cli {
    /// Log level, also forwarded to the engine: trace | debug | info | warn | error
    #[arg(long, global = true, default_value = "error")]
    log_level: String,

    /// Drive the low-level runtime directly instead of the engine
    #[arg(long, global = true)]
    restricted: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List hutch containers and images
    List {
        /// List only containers, not images
        #[arg(short = 'c', long)]
        containers: bool,

        /// List only images, not containers
        #[arg(short = 'i', long)]
        images: bool,
    },
    /// Remove a hutch container
    Rm {
        container: String,
    },
    /// Remove a hutch image
    Rmi {
        image: String,
    },
    /// Fetch an image into the runtime namespace
    Pull {
        image: String,
    },
    /// Start an existing hutch container
    Start {
        container: String,
    },
    /// Show the hutch and engine versions
    Version,
}

// ======================================================
// MAIN
// ======================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let directive: tracing_subscriber::filter::Directive =
        cli.log_level.parse().unwrap_or_else(|_| {
            eprintln!("Error: invalid log level '{}'", cli.log_level);
            exit(1);
        });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive),
        )
        .with_writer(std::io::stderr)
        .init();

    let engine = Engine::new(&cli.log_level);
    let runtime = Runtime::new();

    let result = match cli.command {
        Commands::List { containers, images } => {
            list::run(&engine, &runtime, cli.restricted, containers, images).await
        }
        Commands::Rm { container } => rm(&engine, &runtime, cli.restricted, &container).await,
        Commands::Rmi { image } => rmi(&engine, &runtime, cli.restricted, &image).await,
        Commands::Pull { image } => pull(&runtime, &image).await,
        Commands::Start { container } => start(&engine, &container).await,
        Commands::Version => version(&engine).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        exit(1);
    }
}

// ======================================================
// COMMANDS
// ======================================================

async fn rm(engine: &Engine, runtime: &Runtime, restricted: bool, container: &str) -> Result<()> {
    debug!("Removing container {}", container);

    if restricted {
        if !runtime.container_exists(container).await? {
            bail!("container {} does not exist", container);
        }
    } else {
        let managed = engine
            .is_managed_container(container)
            .await
            .with_context(|| format!("failed to inspect container {}", container))?;

        if !managed {
            bail!("{} is not a hutch container", container);
        }
    }

    runtime.remove_container(container).await?;
    Ok(())
}

async fn rmi(engine: &Engine, runtime: &Runtime, restricted: bool, image: &str) -> Result<()> {
    debug!("Removing image {}", image);

    if restricted {
        if !runtime.image_exists(image).await? {
            bail!("image {} does not exist", image);
        }
    } else {
        let managed = engine
            .is_managed_image(image)
            .await
            .with_context(|| format!("failed to inspect image {}", image))?;

        if !managed {
            bail!("{} is not a hutch image", image);
        }
    }

    runtime.remove_image(image).await?;
    Ok(())
}

async fn pull(runtime: &Runtime, image: &str) -> Result<()> {
    runtime.pull(image).await?;
    println!("Pulled {}", image);
    Ok(())
}

async fn start(engine: &Engine, container: &str) -> Result<()> {
    let managed = engine
        .is_managed_container(container)
        .await
        .with_context(|| format!("failed to inspect container {}", container))?;

    if !managed {
        bail!("{} is not a hutch container", container);
    }

    engine.start(container).await?;
    Ok(())
}

async fn version(engine: &Engine) -> Result<()> {
    println!("hutch {}", env!("CARGO_PKG_VERSION"));

    match engine.version().await {
        Ok(engine_version) => println!("engine {}", engine_version),
        Err(e) => debug!("Engine version unavailable: {}", e),
    }

    Ok(())
}
