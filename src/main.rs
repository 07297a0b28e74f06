use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use msglink::common::config::{self, ConfigOverrides};
use msglink::transfer::{DownloadTarget, Downloaded};
use msglink::{
    Client, ClientConfig, Credentials, DirectorySync, DownloadRequest, Operation, UploadFile,
    UploadRequest,
};

#[derive(Parser)]
#[command(name = "msglink")]
#[command(about = "Messenger protocol client")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(long, global = true, env = "MSGLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Override server.protocol_check_url
    #[arg(long, global = true)]
    check_url: Option<String>,

    /// Override device.mobile_id
    #[arg(long, global = true)]
    mobile_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct LoginArgs {
    #[arg(long, env = "MSGLINK_LOGIN_ID")]
    login_id: String,

    #[arg(long, env = "MSGLINK_PASSWORD", hide_env_values = true)]
    password: String,

    /// Cloud id replacing the configured mobile id
    #[arg(long)]
    cloud_id: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the protocol list and print the advertised endpoints
    Discover {
        #[arg(long, default_value = "")]
        login_id: String,
    },

    /// Sign in and print the main count and menu list
    Login(LoginArgs),

    /// Sign in, then send one operation with a JSON body
    Send {
        #[command(flatten)]
        login: LoginArgs,
        /// Operation name or protocol id (e.g. ChatList or P082)
        operation: String,
        #[arg(default_value = "{}")]
        body: String,
    },

    /// Sign in, then upload files to a room
    Upload {
        #[command(flatten)]
        login: LoginArgs,
        #[arg(long)]
        room_id: String,
        #[arg(long, default_value = "800")]
        path_seq: String,
        #[arg(long, default_value = "")]
        file_id: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Sign in, then download an attachment
    Download {
        #[command(flatten)]
        login: LoginArgs,
        #[arg(long)]
        file_id: String,
        #[arg(long, default_value = "0")]
        file_sn: String,
        #[arg(long, default_value = "800")]
        path_seq: String,
        #[arg(long)]
        thumbnail: bool,
        /// Write here instead of printing base64
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Sign in, then replace the local org directory database
    OrgSync {
        #[command(flatten)]
        login: LoginArgs,
        url: String,
        #[arg(long)]
        db_dir: Option<PathBuf>,
    },

    /// Print the effective configuration
    Config {
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut overrides = ConfigOverrides {
        protocol_check_url: cli.check_url.clone(),
        mobile_id: cli.mobile_id.clone(),
        db_dir: None,
    };
    if let Commands::OrgSync { db_dir, .. } = &cli.command {
        overrides.db_dir = db_dir.clone();
    }

    let config = load(cli.config.as_deref(), &overrides)?;

    match cli.command {
        Commands::Discover { login_id } => {
            let client = Client::new(config)?;
            let check_url = client.config().server.protocol_check_url.clone();
            let registry = client
                .discover_as(&check_url, &login_id)
                .await
                .context("Discovery failed")?;

            let missing: Vec<&str> = registry
                .missing_operations()
                .into_iter()
                .map(Operation::name)
                .collect();
            if !missing.is_empty() {
                tracing::warn!(count = missing.len(), "operations not advertised by server");
            }
            print_json(&serde_json::json!({
                "endpoints": registry.len(),
                "missing": missing,
            }))
        }
        Commands::Login(args) => {
            let client = Client::new(config)?;
            let summary = client.login(&credentials(&args)).await.context("Login failed")?;
            print_json(&summary)
        }
        Commands::Send {
            login,
            operation,
            body,
        } => {
            let operation: Operation = operation.parse()?;
            let body: serde_json::Value =
                serde_json::from_str(&body).context("Body is not valid JSON")?;

            let client = signed_in(config, &login).await?;
            let result = client
                .send(operation, &body)
                .await
                .with_context(|| format!("{operation} failed"))?;
            print_json(&result)
        }
        Commands::Upload {
            login,
            room_id,
            path_seq,
            file_id,
            files,
        } => {
            let client = signed_in(config, &login).await?;
            let request = UploadRequest {
                files: files.into_iter().map(UploadFile::new).collect(),
                path_seq,
                file_id,
                room_id,
            };
            let result = client
                .upload(&request, |ev| {
                    tracing::info!(
                        file = ev.current_file_index + 1,
                        of = ev.total_files,
                        percent = (ev.percent_for_current_file * 100.0).round() as u64,
                        "uploading {}",
                        ev.file_path.display()
                    );
                })
                .await
                .context("Upload failed")?;
            print_json(&result)
        }
        Commands::Download {
            login,
            file_id,
            file_sn,
            path_seq,
            thumbnail,
            output,
        } => {
            let client = signed_in(config, &login).await?;
            let request = if thumbnail {
                DownloadRequest::thumbnail(file_id, file_sn, path_seq)
            } else {
                DownloadRequest::new(file_id, file_sn, path_seq)
            };
            let target = match output {
                Some(path) => DownloadTarget::File(path),
                None => DownloadTarget::Base64,
            };

            match client
                .download(&request, target, |_| {})
                .await
                .context("Download failed")?
            {
                Downloaded::File { path, bytes } => {
                    println!("{} ({bytes} bytes)", path.display());
                }
                Downloaded::Base64(encoded) => println!("{encoded}"),
            }
            Ok(())
        }
        Commands::OrgSync { login, url, .. } => {
            let client = signed_in(config, &login).await?;
            let sync = DirectorySync::from_config(client);
            let report = sync.sync(&url).await.context("Org sync failed")?;
            print_json(&report)
        }
        Commands::Config { path } => {
            if path {
                let path = cli.config.unwrap_or_else(config::config_path);
                println!("{}", path.display());
                return Ok(());
            }
            print_json(&config)
        }
    }
}

fn load(path: Option<&std::path::Path>, overrides: &ConfigOverrides) -> Result<ClientConfig> {
    let config = match path {
        Some(path) => config::load_config_from(path)?,
        None => config::load_config()?,
    };
    let config = config::apply_overrides(config, overrides);
    config.validate()?;
    Ok(config)
}

fn credentials(args: &LoginArgs) -> Credentials {
    let credentials = Credentials::new(&args.login_id, &args.password);
    match &args.cloud_id {
        Some(id) => credentials.with_cloud_id(id),
        None => credentials,
    }
}

async fn signed_in(config: ClientConfig, args: &LoginArgs) -> Result<Client> {
    let client = Client::new(config)?;
    client
        .login(&credentials(args))
        .await
        .context("Login failed")?;
    Ok(client)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{text}");
    Ok(())
}
