mod client;

use clap::{Args, Parser, Subcommand};
use client::ApiClient;
use color_eyre::eyre::{eyre, Result, WrapErr};
use kestrel_common::KestrelConfig;
use kestrel_hypervisor::{MemoryHypervisor, RoutedUploadClient};
use kestrel_server::api::{CreateBody, DeleteBody};
use reqwest::Method;
use std::io::stderr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version, about = "Kestrel appliance provisioning", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to /etc/kestrel/config.toml when present)
    #[arg(short, long, global = true, env = "KESTREL_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output - shows more detailed logs
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API and task workers
    Serve(ServeArgs),
    /// List available image versions
    Images(ServerArgs),
    /// List your instances
    Show(ServerArgs),
    /// Provision a new instance and wait for it
    Create(CreateArgs),
    /// Destroy an instance
    Delete(DeleteArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Networks to register with the in-memory hypervisor
    #[arg(long = "network-map", value_name = "NAME")]
    networks: Vec<String>,
}

/// Where the API runs and who is calling it
#[derive(Args, Debug)]
struct ServerArgs {
    /// URL of a running `kestrel serve`
    #[arg(long, env = "KESTREL_SERVER", default_value = "http://127.0.0.1:5000")]
    server: String,

    /// API token; the server maps it to a user
    #[arg(long, env = "KESTREL_TOKEN", hide_env_values = true)]
    token: String,

    /// Give up waiting for the task after this many seconds
    #[arg(long, default_value_t = 7200)]
    wait_secs: u64,
}

#[derive(Args, Debug)]
struct CreateArgs {
    #[command(flatten)]
    server: ServerArgs,
    #[arg(short, long)]
    name: String,
    /// Image version
    #[arg(short, long)]
    image: String,
    /// Network name, scoped to your user as <user>_<network>
    #[arg(long)]
    network: String,
    #[arg(long)]
    static_ip: String,
    #[arg(long)]
    default_gateway: Option<String>,
    #[arg(long)]
    netmask: Option<String>,
    /// DNS server, repeat for more than one
    #[arg(long)]
    dns: Vec<String>,
}

impl CreateArgs {
    fn into_body(self) -> (ServerArgs, CreateBody) {
        let body = CreateBody {
            name: self.name,
            image: self.image,
            network: self.network,
            static_ip: self.static_ip,
            default_gateway: self.default_gateway,
            netmask: self.netmask,
            dns: (!self.dns.is_empty()).then_some(self.dns),
        };
        (self.server, body)
    }
}

#[derive(Args, Debug)]
struct DeleteArgs {
    #[command(flatten)]
    server: ServerArgs,
    #[arg(short, long)]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let default_directives = format!(
        "kestrel={level},kestrel_common={level},kestrel_hypervisor={level},kestrel_guest={level},kestrel_workflow={level},kestrel_server={level},tower=warn,hyper=warn,reqwest=warn",
        level = default_level
    );
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));
    registry()
        .with(filter)
        .with(fmt::layer().with_writer(stderr))
        .init();

    let config = KestrelConfig::load(cli.config.as_deref())
        .wrap_err("Failed to load configuration")?;
    let resource = config.appliance.resource.clone();

    let response = match cli.command {
        Commands::Serve(args) => return serve(config, args).await,
        Commands::Images(server) => {
            connect(&server, &resource)?
                .run::<()>(Method::GET, "/image", None)
                .await?
        }
        Commands::Show(server) => {
            connect(&server, &resource)?
                .run::<()>(Method::GET, "", None)
                .await?
        }
        Commands::Create(args) => {
            let (server, body) = args.into_body();
            connect(&server, &resource)?
                .run(Method::POST, "", Some(&body))
                .await?
        }
        Commands::Delete(args) => {
            let body = DeleteBody { name: args.name };
            connect(&args.server, &resource)?
                .run(Method::DELETE, "", Some(&body))
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    if let Some(error) = response.error {
        return Err(eyre!(error));
    }

    Ok(())
}

async fn serve(config: KestrelConfig, args: ServeArgs) -> Result<()> {
    // Hypervisor SDK bindings are not linked into this binary
    warn!("Serving with the in-memory hypervisor; instances are not persisted");
    let hypervisor = Arc::new(MemoryHypervisor::new());
    for network in &args.networks {
        hypervisor.add_network(network);
    }
    let uploader = Arc::new(
        RoutedUploadClient::new(hypervisor.clone()).wrap_err("Failed to build upload client")?,
    );

    kestrel_server::run(Arc::new(config), hypervisor, uploader)
        .await
        .map_err(|e| eyre!("{:#}", e))
}

fn connect(server: &ServerArgs, resource: &str) -> Result<ApiClient> {
    ApiClient::new(
        &server.server,
        resource,
        &server.token,
        Duration::from_secs(server.wait_secs),
    )
}
