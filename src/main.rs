//! SLM CLI
//!
//! Entry point for the `slm` command-line tool.

use clap::{Parser, Subcommand};
use slm::query::{self, QueryArgs, QueryTarget};
use slm_protocol::{JobStatus, ParseStatusError};
use slm::{submit, supervisor, CliOverrides, SlmConfig};
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "slm")]
#[command(about = "Slurm Lifecycle Monitor", version)]
struct Cli {
    /// Never write to the job database directly
    #[arg(long, global = true)]
    no_db: bool,

    /// Path to the job database (default: ~/.slm/slm.db)
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Base URL of the reporting service
    #[arg(long, global = true)]
    api_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a batch script with sbatch and register the job
    Submit {
        /// The batch script to submit
        script: PathBuf,

        /// Additional arguments passed to sbatch
        #[arg(long, allow_hyphen_values = true)]
        sbatch_args: Option<String>,
    },

    /// Run a command with lifecycle monitoring
    Run {
        /// The command to execute (after --)
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },

    /// Show job records and events from the database
    Query {
        /// Job id (a bare number means slurm-<number>; default: current job)
        job_id: Option<String>,

        /// Show the job's events instead of its record
        #[arg(long, conflicts_with_all = ["recent", "status", "stats"])]
        events: bool,

        /// Show the N most recent jobs
        #[arg(long, value_name = "N", conflicts_with_all = ["status", "stats"])]
        recent: Option<u32>,

        /// Show jobs currently in STATUS (e.g. RUNNING, FAILED)
        #[arg(long, value_name = "STATUS", value_parser = parse_status, conflicts_with = "stats")]
        status: Option<JobStatus>,

        /// Show status distribution, success rate and run times
        #[arg(long)]
        stats: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    slm::logging::init_logging();

    let overrides = CliOverrides {
        no_db: cli.no_db,
        db_path: cli.db_path,
        api_url: cli.api_url,
    };
    let config = match SlmConfig::load(&overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[SLM] Error loading config: {}", e);
            process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Submit {
            script,
            sbatch_args,
        } => run_submit(&config, script, sbatch_args),
        Commands::Run { cmd } => run_command(&config, &cmd),
        Commands::Query {
            job_id,
            events,
            recent,
            status,
            stats,
            json,
        } => {
            let args = QueryArgs {
                job_id,
                events,
                recent,
                status,
                stats,
            };
            run_query(&config, &args, json)
        }
    };
    process::exit(code);
}

fn run_submit(config: &SlmConfig, script: PathBuf, sbatch_args: Option<String>) -> i32 {
    match submit::submit(config, &script, sbatch_args.as_deref()) {
        Ok(submission) => {
            println!("{}", submission.job_id);
            0
        }
        Err(e) => {
            eprintln!("[SLM] {}", e);
            e.exit_code()
        }
    }
}

fn run_command(config: &SlmConfig, cmd: &[String]) -> i32 {
    match supervisor::run(config, cmd) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[SLM] Error: {}", e);
            if matches!(e, supervisor::SupervisorError::EmptyCommand) {
                eprintln!("Usage: slm run -- <your command>");
            }
            1
        }
    }
}

fn parse_status(value: &str) -> Result<JobStatus, ParseStatusError> {
    value.to_ascii_uppercase().parse()
}

fn run_query(config: &SlmConfig, args: &QueryArgs, json: bool) -> i32 {
    let result = QueryTarget::from_args(args, |key| std::env::var(key).ok())
    .and_then(|target| {
        let store = query::open_store(config)?;
        query::run(&store, &target, json)
    });

    match result {
        Ok(output) => {
            print!("{}", output);
            if !output.ends_with('\n') {
                println!();
            }
            0
        }
        Err(e) => {
            eprintln!("[SLM] {}", e);
            1
        }
    }
}
