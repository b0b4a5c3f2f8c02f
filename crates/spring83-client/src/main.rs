//! Spring '83 command-line client.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use spring83_client::{Cache, Client, ClientError, FetchOutcome, read_board_list};
use spring83_core::identity::Keypair;

#[derive(Parser, Debug)]
#[command(name = "spring83")]
#[command(about = "Follow, publish, and mint Spring '83 boards")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    fetch: FetchArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every board in the board list into the cache (the default).
    Fetch(FetchArgs),

    /// Sign and upload a board.
    Publish {
        /// Server base URL.
        #[arg(long)]
        server: String,
        /// File holding the 64-hex-character secret key.
        #[arg(long)]
        secret_key: PathBuf,
        /// The board's HTML.
        board: PathBuf,
    },

    /// Mint a keypair whose public key is a valid board key.
    Keygen {
        #[arg(long, default_value_t = spring83_core::identity::DEFAULT_MINT_ATTEMPTS)]
        max_attempts: u64,
    },
}

#[derive(Args, Debug, Default)]
struct FetchArgs {
    /// Board list, one URL per line [default: ~/.83]
    #[arg(long)]
    config: Option<PathBuf>,
    /// Cache directory [default: ~/.83_cache]
    #[arg(long)]
    cache_dir: Option<PathBuf>,
    /// Report every board, not just failures.
    #[arg(long)]
    verbose: bool,
}

fn home_path(explicit: Option<PathBuf>, name: &str) -> Result<PathBuf, ClientError> {
    match explicit {
        Some(path) => Ok(path),
        None => dirs::home_dir().map(|home| home.join(name)).ok_or(ClientError::NoHome),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        None => fetch(cli.fetch).await,
        Some(Command::Fetch(args)) => fetch(args).await,
        Some(Command::Publish { server, secret_key, board }) => {
            publish(&server, &secret_key, &board).await
        }
        Some(Command::Keygen { max_attempts }) => keygen(max_attempts),
    }
}

async fn fetch(args: FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let list = home_path(args.config, ".83")?;
    let cache_dir = home_path(args.cache_dir, ".83_cache")?;

    let urls = read_board_list(&list)?;
    if urls.is_empty() {
        return Err(format!("No URLs found in {}. Add URLs to this file, one per line.", list.display()).into());
    }

    let cache = Cache::open(cache_dir)?;
    let client = Client::new()?;
    for (url, result) in client.fetch_all(&cache, &urls).await {
        match result {
            Ok(FetchOutcome::Updated { .. }) => println!("{url}: 200 OK (cached)"),
            Ok(FetchOutcome::NotModified) => {
                if args.verbose {
                    println!("{url}: 304 Not Modified (using cache)");
                }
            }
            Ok(FetchOutcome::Failed(status)) => println!("{url}: {status}"),
            Err(e) => println!("{url}: Error: {e}"),
        }
    }
    Ok(())
}

async fn publish(
    server: &str,
    secret_key: &Path,
    board: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let secret = std::fs::read_to_string(secret_key)?;
    let keypair = Keypair::from_secret_hex(secret.trim())?;
    let body = std::fs::read(board)?;

    let client = Client::new()?;
    let status = client.publish(server, &keypair, &body).await?;
    println!("{status}");
    if status.is_success() {
        Ok(())
    } else {
        Err(format!("server refused the board: {status}").into())
    }
}

fn keygen(max_attempts: u64) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!("Searching for a valid board key (this can take a few minutes)");
    let keypair = Keypair::mint_within(max_attempts)?;
    println!("public key: {}", keypair.public_key_hex());
    println!("secret key: {}", keypair.secret_key_hex());
    Ok(())
}
