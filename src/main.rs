use clap::{Args, Parser, Subcommand, ValueEnum};
use nativecall::config::{AbiConfig, Arch};
use nativecall::signature::{PlanReport, Signature};
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ArchArg {
    Aarch64,
    #[value(name = "x86-64")]
    X86_64,
}

impl From<ArchArg> for Arch {
    fn from(arg: ArchArg) -> Self {
        match arg {
            ArchArg::Aarch64 => Arch::Aarch64,
            ArchArg::X86_64 => Arch::X86_64,
        }
    }
}

#[derive(Debug, Args)]
struct AbiArgs {
    /// Use the built-in preset for this architecture
    #[arg(long, value_enum, conflicts_with = "config")]
    arch: Option<ArchArg>,

    /// Load the ABI description from a TOML file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl AbiArgs {
    fn resolve(&self) -> Result<AbiConfig, Box<dyn Error>> {
        if let Some(path) = &self.config {
            return Ok(AbiConfig::load(path)?);
        }
        if let Some(arch) = self.arch {
            return Ok(AbiConfig::for_arch(arch.into()));
        }
        match AbiConfig::host() {
            Ok(abi) => Ok(abi),
            Err(e) => {
                warn!(error = %e, "falling back to the aarch64 preset");
                Ok(AbiConfig::aarch64())
            }
        }
    }
}

#[derive(Parser)]
#[command(name = "nativecall")]
#[command(about = "Inspect native call layouts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the ABI configuration as TOML
    Abi {
        #[command(flatten)]
        abi: AbiArgs,
    },
    /// Show where each argument of a signature file is passed
    Plan {
        /// Signature file (TOML)
        signature: PathBuf,

        #[command(flatten)]
        abi: AbiArgs,

        /// Print the plan as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("NATIVECALL_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Abi { abi } => {
            print!("{}", abi.resolve()?.to_toml_string()?);
        }
        Commands::Plan {
            signature,
            abi,
            json,
        } => {
            let abi = abi.resolve()?;
            let sig = Signature::load(&signature)?;
            let plan = sig.plan(&abi)?;
            let report = PlanReport::new(sig.name.as_deref(), &plan);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli.command) {
        eprintln!("error: {}", e);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
