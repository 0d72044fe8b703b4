//! The jcrypt binary: gpg encrypt, decrypt, sign and verify from the shell.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use jcrypt::{CancellationController, Jcrypt, JcryptConfig};
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (defaults to $JCRYPT_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// gpg binary to use instead of discovering one
    #[arg(long, global = true)]
    gpg: Option<PathBuf>,

    /// Alternate gpg keyring directory
    #[arg(long, global = true)]
    homedir: Option<PathBuf>,

    /// Never let gpg prompt on the terminal
    #[arg(long, global = true)]
    batch: bool,

    /// Binary output instead of ASCII armor
    #[arg(long, global = true)]
    no_armor: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Endpoints {
    /// Input file (reads stdin when omitted)
    file: Option<PathBuf>,

    /// Output file (writes stdout when omitted)
    #[arg(short, long, conflicts_with = "in_place")]
    output: Option<PathBuf>,

    /// Replace FILE with the result
    #[arg(long, requires = "file")]
    in_place: bool,

    /// Stream FILE into OUTPUT instead of buffering it in memory
    #[arg(long)]
    stream: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Encrypt to one or more recipients
    Encrypt {
        #[command(flatten)]
        endpoints: Endpoints,
        /// Recipient key id or email (repeatable)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,
        /// Also sign the message
        #[arg(long)]
        sign: bool,
        /// Signing key
        #[arg(short = 'u', long)]
        local_user: Option<String>,
    },
    /// Decrypt a message
    Decrypt {
        #[command(flatten)]
        endpoints: Endpoints,
    },
    /// Produce a signed message
    Sign {
        /// Input file (reads stdin when omitted)
        file: Option<PathBuf>,
        /// Output file (writes stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Signing key
        #[arg(short = 'u', long)]
        local_user: Option<String>,
    },
    /// Check a signed message and print gpg's report
    Verify {
        /// Input file (reads stdin when omitted)
        file: Option<PathBuf>,
    },
}

#[derive(Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries transform output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    CancellationController::global().arm();

    let mut config = JcryptConfig::load(cli.config.as_deref())?;
    if cli.gpg.is_some() {
        config.gpg_path = cli.gpg;
    }
    if cli.homedir.is_some() {
        config.gpg.homedir = cli.homedir;
    }
    config.gpg.batch |= cli.batch;
    if cli.no_armor {
        config.gpg.armor = false;
    }

    match cli.command {
        Commands::Encrypt {
            endpoints,
            recipients,
            sign,
            local_user,
        } => {
            if !recipients.is_empty() {
                config.gpg.recipients = recipients;
            }
            config.gpg.sign |= sign;
            if local_user.is_some() {
                config.gpg.local_user = local_user;
            }
            let client = Jcrypt::from_config(config)?;
            run_transform(&client, Direction::Encrypt, endpoints).await?;
        }
        Commands::Decrypt { endpoints } => {
            let client = Jcrypt::from_config(config)?;
            run_transform(&client, Direction::Decrypt, endpoints).await?;
        }
        Commands::Sign {
            file,
            output,
            local_user,
        } => {
            if local_user.is_some() {
                config.gpg.local_user = local_user;
            }
            let client = Jcrypt::from_config(config)?;
            let data = read_input(file.as_deref()).await?;
            if let Some(written) = client.sign_to_file(data, output.as_deref()).await? {
                tracing::info!(path = %written.display(), "wrote file");
            }
        }
        Commands::Verify { file } => {
            let client = Jcrypt::from_config(config)?;
            let report = client.verify(read_input(file.as_deref()).await?).await?;
            print!("{report}");
        }
    }

    Ok(())
}

async fn run_transform(client: &Jcrypt, direction: Direction, endpoints: Endpoints) -> Result<()> {
    let Endpoints {
        file,
        output,
        in_place,
        stream,
    } = endpoints;

    match (file, output) {
        (Some(file), _) if in_place => {
            if stream {
                bail!("--stream cannot rewrite a file in place");
            }
            let written = match direction {
                Direction::Encrypt => client.encrypt_to_file(&file, None).await?,
                Direction::Decrypt => client.decrypt_to_file(&file, None).await?,
            };
            tracing::info!(path = %written.display(), "rewrote file");
        }
        (Some(file), Some(output)) => {
            let buffered;
            let client = if stream {
                client
            } else {
                buffered = client.buffered();
                &buffered
            };
            let written = match direction {
                Direction::Encrypt => client.encrypt_to_file(&file, Some(&output)).await?,
                Direction::Decrypt => client.decrypt_to_file(&file, Some(&output)).await?,
            };
            tracing::info!(path = %written.display(), "wrote file");
        }
        (Some(file), None) => match direction {
            Direction::Encrypt => client.encrypt_to_stdout(&file).await?,
            Direction::Decrypt => client.decrypt_to_stdout(&file).await?,
        },
        (None, output) => {
            let data = read_input(None).await?;
            transform_data(client, direction, data, output.as_deref()).await?;
        }
    }

    Ok(())
}

async fn transform_data(
    client: &Jcrypt,
    direction: Direction,
    data: Vec<u8>,
    dest: Option<&Path>,
) -> Result<Option<PathBuf>> {
    let written = match direction {
        Direction::Encrypt => client.encrypt_data_to_file(data, dest).await?,
        Direction::Decrypt => client.decrypt_data_to_file(data, dest).await?,
    };
    Ok(written)
}

async fn read_input(file: Option<&Path>) -> Result<Vec<u8>> {
    match file {
        Some(path) => tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut data = Vec::new();
            tokio::io::stdin()
                .read_to_end(&mut data)
                .await
                .context("Failed to read stdin")?;
            Ok(data)
        }
    }
}
