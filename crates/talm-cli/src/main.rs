//! talm CLI - Talos machine configs from Jinja templates

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;
mod error;
mod exit_codes;

use commands::template::TemplateArgs;
use talm_core::CaKind;
use error::CliError;

#[derive(Parser)]
#[command(name = "talm")]
#[command(version)]
#[command(about = "Render and manage Talos machine configs with Jinja templates", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Project root (directory holding Chart.yaml and talm.key)
    #[arg(long, global = true, env = "TALM_ROOT", default_value = ".")]
    root: PathBuf,
}

#[derive(Args)]
struct KeyArgs {
    /// Key file (default: <root>/talm.key)
    #[arg(long, env = "TALM_KEY")]
    key: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Render node configs from the chart templates
    Template(TemplateArgs),

    /// Show the difference between two machine configs
    Diff {
        old: PathBuf,
        new: PathBuf,

        /// Print a structural patch instead of a line diff
        #[arg(long)]
        patch: bool,
    },

    /// Split patch files into machine config patches and extra documents
    Classify {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Print only the extra documents as a YAML stream
        #[arg(long)]
        extras: bool,
    },

    /// Encrypt secrets.yaml, talosconfig and kubeconfig
    Encrypt(KeyArgs),

    /// Decrypt the encrypted project files
    Decrypt(KeyArgs),

    /// Replace the project key and re-encrypt every encrypted file
    RotateKeys(KeyArgs),

    /// Replace the OS or Kubernetes CA in the secrets bundle
    RotateCa {
        /// CA to replace (os or kubernetes)
        #[arg(long)]
        ca: CaKind,

        /// New CA certificate (PEM, or base64-encoded PEM)
        #[arg(long)]
        crt: PathBuf,

        /// New CA private key (PEM, or base64-encoded PEM)
        #[arg(long = "ca-key")]
        ca_key: PathBuf,

        #[command(flatten)]
        key: KeyArgs,
    },
}

fn init_logging(debug: bool) {
    let level = if debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let root = cli.root;
    match cli.command {
        Commands::Template(args) => commands::template::run(&root, &args),
        Commands::Diff { old, new, patch } => commands::diff::run(&old, &new, patch),
        Commands::Classify { files, extras } => commands::classify::run(&files, extras),
        Commands::Encrypt(key) => commands::secrets::encrypt(&root, key.key.as_deref()),
        Commands::Decrypt(key) => commands::secrets::decrypt(&root, key.key.as_deref()),
        Commands::RotateKeys(key) => commands::secrets::rotate_keys(&root, key.key.as_deref()),
        Commands::RotateCa {
            ca,
            crt,
            ca_key,
            key,
        } => commands::secrets::rotate_ca(&root, key.key.as_deref(), ca, &crt, &ca_key),
    }
}

fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_logging(cli.debug);

    if let Err(err) = run(cli) {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
