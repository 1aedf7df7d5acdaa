//! effectrace demo runner
//!
//! Run with: `effectrace [COMMAND]`

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use effectrace::demos::{self, DEMOS};
use effectrace::{Array, EffectRegistry, Effectified, RuntimeConfig, Tracer, Var};

#[derive(Parser)]
#[command(name = "effectrace")]
#[command(about = "Run parameterized effect handler demos")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Runtime configuration file (TOML); defaults to EFFECTRACE_* variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print the traced program before running it
    #[arg(long, global = true)]
    dump: bool,

    /// Print dispatch counters after running
    #[arg(long, global = true)]
    stats: bool,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Thread state through a handler parameter
    State {
        /// Initial state
        #[arg(short, long, default_value_t = 3)]
        initial: i32,
    },

    /// Abort a computation from inside a handler
    Abort {
        /// Initial state
        #[arg(short, long, default_value_t = 3)]
        initial: i32,
    },

    /// Nest two handlers for the same effect
    Nested,

    /// Compare local and full continuations
    Local,

    /// List the demos and the effects they declare
    Effects,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config = load_config(cli.config.as_deref())?;
    let mut registry = EffectRegistry::new();

    match &cli.command {
        Commands::State { initial } => {
            let program = demos::state_example(&mut registry).with_config(config);
            run_demo(&cli, "state", &program, &[Array::from(*initial)])
        }
        Commands::Abort { initial } => {
            let program = demos::abort_example(&mut registry).with_config(config);
            run_demo(&cli, "abort", &program, &[Array::from(*initial)])
        }
        Commands::Nested => {
            let program = demos::nested_example(&mut registry).with_config(config);
            run_demo(&cli, "nested", &program, &[])
        }
        Commands::Local => {
            let program = demos::local_example(&mut registry).with_config(config);
            run_demo(&cli, "local", &program, &[])
        }
        Commands::Effects => cmd_effects(),
    }
}

fn load_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration: {}", path.display())),
        None => Ok(RuntimeConfig::from_env()),
    }
}

fn run_demo<F>(cli: &Cli, name: &str, program: &Effectified<F>, args: &[Array]) -> Result<()>
where
    F: Fn(&mut Tracer, &[Var]) -> effectrace::Result<Var>,
{
    info!("Running demo '{}'", name);
    if cli.dump {
        let avals: Vec<_> = args.iter().map(Array::aval).collect();
        let traced = program
            .trace(&avals)
            .with_context(|| format!("Failed to trace demo '{}'", name))?;
        print!("{}", traced);
    }

    let (value, stats) = program
        .call_with_stats(args)
        .with_context(|| format!("Demo '{}' failed", name))?;
    println!("{}", value);

    if cli.stats {
        println!("dispatches: {}", stats.dispatches);
        println!("resumes:    {}", stats.resumes);
        println!("equations:  {}", stats.equations);
        println!("max depth:  {}", stats.max_depth);
    }
    Ok(())
}

fn cmd_effects() -> Result<()> {
    let mut registry = EffectRegistry::new();
    for (name, description) in DEMOS {
        let before = registry.len();
        match *name {
            "state" => {
                demos::state_example(&mut registry);
            }
            "abort" => {
                demos::abort_example(&mut registry);
            }
            "nested" => {
                demos::nested_example(&mut registry);
            }
            "local" => {
                demos::local_example(&mut registry);
            }
            _ => continue,
        }
        println!("{} - {}", name, description);
        for effect in registry.iter().skip(before) {
            println!("  {} {} (arity {})", effect.id(), effect.name(), effect.arity());
        }
    }
    Ok(())
}
