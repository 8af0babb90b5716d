//! lockbox: vault client CLI
//!
//! Commands:
//!   register / login <login>      - create an account or sign in; stores the token
//!   save-lp / save-card           - encrypt and store a login/password or bank card
//!   update-lp / update-card <id>  - replace a stored secret
//!   save-file <path>              - stream an encrypted file to the vault
//!   get <id> / get-file <id>      - fetch and decrypt
//!   delete <id>, list [--kind]    - housekeeping
//!   keygen <path>                 - write a new RSA private key (PEM)
//!   config show                   - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lockbox_cli::{expand_tilde, Session, VaultClient};
use lockbox_core::config::VaultConfig;
use lockbox_core::types::{BankCard, LoginPassword, Payload, RecordId, ResourceKind};
use lockbox_crypto::{Codec, KeyPair};
use lockbox_transfer::{Pipeline, ShutdownCoordinator};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "lockbox",
    version,
    about = "lockbox vault client",
    long_about = "lockbox: keep login/password pairs, bank cards and files in a vault that only stores ciphertext"
)]
struct Cli {
    /// Path to lockbox.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "LOCKBOX_CONFIG",
        default_value = "~/.config/lockbox/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOCKBOX_LOG", default_value = "warn")]
    log: String,

    #[arg(long, env = "LOCKBOX_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an account and log in
    Register {
        login: String,
        /// Prompted for when not given
        #[arg(long, env = "LOCKBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Log in and store the session token
    Login {
        login: String,
        #[arg(long, env = "LOCKBOX_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Store a login/password pair
    SaveLp {
        #[command(flatten)]
        secret: LoginPasswordArgs,
    },

    /// Store a bank card
    SaveCard {
        #[command(flatten)]
        card: BankCardArgs,
    },

    /// Replace a stored login/password pair
    UpdateLp {
        id: RecordId,
        #[command(flatten)]
        secret: LoginPasswordArgs,
    },

    /// Replace a stored bank card
    UpdateCard {
        id: RecordId,
        #[command(flatten)]
        card: BankCardArgs,
    },

    /// Upload a file, encrypted chunk by chunk
    SaveFile {
        path: PathBuf,
        /// Free-form description
        #[arg(long, default_value = "")]
        meta: String,
    },

    /// Show a stored secret
    Get { id: RecordId },

    /// Download a file into the download directory
    GetFile {
        id: RecordId,
        /// Destination directory (overrides [client] download_dir)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },

    /// Delete a stored secret
    Delete { id: RecordId },

    /// List stored secrets
    List {
        /// lp, bc or fl; all kinds when omitted
        #[arg(long)]
        kind: Option<ResourceKind>,
    },

    /// Generate an RSA private key for encrypting payloads
    Keygen {
        path: PathBuf,
        #[arg(long, default_value_t = 2048)]
        bits: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the current configuration
    Show,
}

#[derive(clap::Args, Debug)]
struct LoginPasswordArgs {
    #[arg(long)]
    login: String,
    #[arg(long)]
    password: String,
    #[arg(long, default_value = "")]
    meta: String,
}

#[derive(clap::Args, Debug)]
struct BankCardArgs {
    #[arg(long)]
    number: String,
    /// e.g. 12/27
    #[arg(long)]
    expire_at: String,
    #[arg(long, default_value = "")]
    name: String,
    #[arg(long, default_value = "")]
    surname: String,
    #[arg(long, default_value = "")]
    meta: String,
}

impl LoginPasswordArgs {
    fn into_payload(self) -> (Payload, String) {
        let payload = Payload::LoginPassword(LoginPassword {
            login: self.login,
            password: self.password,
        });
        (payload, self.meta)
    }
}

impl BankCardArgs {
    fn into_payload(self) -> (Payload, String) {
        let payload = Payload::BankCard(BankCard {
            number: self.number,
            expire_at: self.expire_at,
            name: self.name,
            surname: self.surname,
        });
        (payload, self.meta)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);

    let config_path = expand_tilde(&cli.config);
    let config = VaultConfig::load(&config_path)?;

    match cli.command {
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &config_path),
        Commands::Keygen { path, bits } => cmd_keygen(&path, bits),
        command => {
            let client = Client::open(&config).await?;
            run(&client, &config, command).await
        }
    }
}

async fn run(client: &Client, config: &VaultConfig, command: Commands) -> Result<()> {
    let vault = &client.vault;
    match command {
        Commands::Register { login, password } => {
            let password = read_password(password)?;
            vault.register(&login, &password).await?;
            client.save_session()?;
            println!("registered as {login}");
        }
        Commands::Login { login, password } => {
            let password = read_password(password)?;
            vault.login(&login, &password).await?;
            client.save_session()?;
            println!("logged in as {login}");
        }
        Commands::SaveLp { secret } => {
            let (payload, meta) = secret.into_payload();
            let id = vault.save(&payload, &meta).await?;
            println!("saved [{id}]");
        }
        Commands::SaveCard { card } => {
            let (payload, meta) = card.into_payload();
            let id = vault.save(&payload, &meta).await?;
            println!("saved [{id}]");
        }
        Commands::UpdateLp { id, secret } => {
            let (payload, meta) = secret.into_payload();
            vault.update(id, &payload, &meta).await?;
            println!("updated [{id}]");
        }
        Commands::UpdateCard { id, card } => {
            let (payload, meta) = card.into_payload();
            vault.update(id, &payload, &meta).await?;
            println!("updated [{id}]");
        }
        Commands::SaveFile { path, meta } => {
            let spinner = make_spinner("upload")?;
            spinner.set_message(path.display().to_string());
            let result = client.transfer(vault.save_file(&path, &meta)).await;
            spinner.finish_and_clear();
            let id = result.with_context(|| format!("uploading {}", path.display()))?;
            println!("saved [{id}]: {}", path.display());
        }
        Commands::Get { id } => {
            let secret = vault.get(id).await?;
            println!("{}", secret.render());
        }
        Commands::GetFile { id, out_dir } => {
            let spinner = make_spinner("download")?;
            spinner.set_message(format!("[{id}]"));
            let result = match out_dir {
                Some(dir) => {
                    let vault = client.with_download_dir(config, dir)?;
                    client.transfer(vault.get_file(id)).await
                }
                None => client.transfer(vault.get_file(id)).await,
            };
            spinner.finish_and_clear();
            let path = result.with_context(|| format!("downloading [{id}]"))?;
            println!("downloaded [{id}] to {}", path.display());
        }
        Commands::Delete { id } => {
            vault.delete(id).await?;
            println!("deleted [{id}]");
        }
        Commands::List { kind } => {
            let descriptions = vault.list(kind).await?;
            if descriptions.is_empty() {
                println!("nothing stored");
            }
            for description in descriptions {
                println!("{description}");
            }
        }
        Commands::Config { .. } | Commands::Keygen { .. } => {
            anyhow::bail!("local command routed to the vault client")
        }
    }
    Ok(())
}

// ── Client wiring ─────────────────────────────────────────────────────────────

struct Client {
    vault: VaultClient,
    channel: tonic::transport::Channel,
    session: Session,
    codec: Codec,
    token_file: PathBuf,
    coordinator: Arc<ShutdownCoordinator>,
}

impl Client {
    async fn open(config: &VaultConfig) -> Result<Self> {
        let codec = match &config.client.private_key {
            Some(path) => {
                let path = expand_tilde(path);
                let key = KeyPair::load(&path)
                    .with_context(|| format!("loading private key {}", path.display()))?;
                Codec::new(key)
            }
            None => Codec::identity(),
        };
        let token_file = expand_tilde(&config.client.token_file);
        let session = Session::load(&token_file)?;
        let coordinator = Arc::new(ShutdownCoordinator::new(&config.shutdown));
        let channel = lockbox_cli::connect(&config.client).await?;

        let vault = VaultClient::new(
            channel.clone(),
            session.clone(),
            codec.clone(),
            Pipeline::new(&config.transfer),
            coordinator.clone(),
            expand_tilde(&config.client.download_dir),
        );
        Ok(Self {
            vault,
            channel,
            session,
            codec,
            token_file,
            coordinator,
        })
    }

    fn with_download_dir(&self, config: &VaultConfig, dir: PathBuf) -> Result<VaultClient> {
        Ok(VaultClient::new(
            self.channel.clone(),
            self.session.clone(),
            self.codec.clone(),
            Pipeline::new(&config.transfer),
            self.coordinator.clone(),
            expand_tilde(&dir),
        ))
    }

    fn save_session(&self) -> Result<()> {
        self.session
            .save(&self.token_file)
            .with_context(|| format!("saving token to {}", self.token_file.display()))
    }

    /// Run a transfer; Ctrl-C drains it through the coordinator instead of
    /// killing it mid-write.
    async fn transfer<T>(
        &self,
        operation: impl std::future::Future<Output = lockbox_core::VaultResult<T>>,
    ) -> lockbox_core::VaultResult<T> {
        let coordinator = self.coordinator.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!(
                    "interrupted: finishing the current transfer (up to {:?})",
                    coordinator.timeout()
                );
                coordinator.request_shutdown().await;
            }
        });
        let result = operation.await;
        interrupt.abort();
        result
    }
}

// ── `lockbox config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &VaultConfig, config_path: &Path) -> Result<()> {
    println!("# Configuration from: {}", config_path.display());
    println!();
    let toml_str = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{toml_str}");
    Ok(())
}

// ── `lockbox keygen` ──────────────────────────────────────────────────────────

fn cmd_keygen(path: &Path, bits: usize) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let path = expand_tilde(path);
    let spinner = make_spinner("keygen")?;
    spinner.set_message(format!("{bits}-bit RSA"));
    let key = KeyPair::generate(bits);
    spinner.finish_and_clear();
    let pem = key.context("generating key")?.to_pem()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&path)
        .with_context(|| format!("creating {}", path.display()))?;
    file.write_all(pem.as_bytes())?;

    println!("wrote {bits}-bit private key to {}", path.display());
    println!("set [client] private_key = \"{}\" to use it", path.display());
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_password(given: Option<String>) -> Result<SecretString> {
    let password = match given {
        Some(password) => password,
        None => rpassword::prompt_password("password: ").context("reading password")?,
    };
    Ok(SecretString::from(password))
}

fn make_spinner(prefix: &str) -> Result<ProgressBar> {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .context("spinner template")?,
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    Ok(pb)
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
