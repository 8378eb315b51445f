mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{EXIT_DESCRIPTOR_ERROR, EXIT_FAILURE, EXIT_RESOLUTION_ERROR};
use kiln_core::install_signal_handler;
use kiln_schema::Stage;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "kiln",
    version,
    about = "Staged profile assembler for OSGi container distributions"
)]
struct Cli {
    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Build the assembly described by a descriptor.
    Assemble {
        /// Path to the assembly descriptor.
        #[arg(default_value = "kiln.toml")]
        descriptor: PathBuf,
        /// Write the assembly here instead of the descriptor's home.
        #[arg(long)]
        home: Option<PathBuf>,
        /// Number of concurrent fetches.
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print the overlaid, substituted profile of the assembly or of one stage.
    Effective {
        /// Path to the assembly descriptor.
        #[arg(default_value = "kiln.toml")]
        descriptor: PathBuf,
        /// Restrict to one stage: startup, boot or installed.
        #[arg(long)]
        stage: Option<Stage>,
    },
    /// List the features a stage pulls in, dependencies first.
    Closure {
        /// Path to the assembly descriptor.
        #[arg(default_value = "kiln.toml")]
        descriptor: PathBuf,
        /// Stage whose repositories are searched.
        #[arg(long, default_value = "startup")]
        stage: Stage,
        /// Features to close over; defaults to the stage's own features.
        #[arg(long = "feature")]
        features: Vec<String>,
    },
    /// Validate a descriptor and print its normalized plan and assembly id.
    Plan {
        /// Path to the assembly descriptor.
        #[arg(default_value = "kiln.toml")]
        descriptor: PathBuf,
    },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
    /// Generate man pages in the specified directory.
    ManPages {
        /// Output directory for man pages.
        #[arg(default_value = "man")]
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let json_output = cli.json;
    let result = match cli.command {
        Commands::Assemble {
            descriptor,
            home,
            threads,
        } => commands::assemble::run(&descriptor, home, threads, json_output),
        Commands::Effective { descriptor, stage } => {
            commands::effective::run(&descriptor, stage, json_output)
        }
        Commands::Closure {
            descriptor,
            stage,
            features,
        } => commands::closure::run(&descriptor, stage, &features, json_output),
        Commands::Plan { descriptor } => commands::plan::run(&descriptor, json_output),
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
        Commands::ManPages { dir } => commands::man_pages::run::<Cli>(&dir),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            let code = if msg.starts_with("descriptor error:") {
                EXIT_DESCRIPTOR_ERROR
            } else if msg.starts_with("resolution error:") {
                EXIT_RESOLUTION_ERROR
            } else {
                EXIT_FAILURE
            };
            ExitCode::from(code)
        }
    }
}
