//! Bridge entry point
//!
//! Wires the two HTTP clients, the configuration folder and the ledger
//! together and executes one synchronization run. All coordinates are
//! surfaced on the command line; the optional access token bypasses OIDC
//! token acquisition.

use anyhow::Context;
use clap::Parser;
use log::{error, info};

use aiod_bridge::memory::memory_from_connection_string;
use aiod_bridge::{
    AiodClient, Bridge, BridgeConfig, CatalogSync, KeycloakAuth, PortalClient, QueryTemplates,
};

#[derive(Debug, Parser)]
#[command(name = "aiod-bridge", about = "Publish portal AI-asset records into the AIoD catalog")]
struct Args {
    /// API endpoint of the source portal
    #[arg(long)]
    portal_endpoint: String,

    /// Base URL of the AIoD API server
    #[arg(long)]
    aiod_url: String,

    /// URL of the authentication server
    #[arg(long)]
    keycloak_url: Option<String>,

    /// Authentication realm of this bridge
    #[arg(long)]
    keycloak_realm: Option<String>,

    /// Client id of this bridge
    #[arg(long)]
    client_id: Option<String>,

    /// Client secret of this bridge
    #[arg(long)]
    client_secret: Option<String>,

    /// Pre-acquired access token, used verbatim instead of OIDC
    #[arg(long, default_value = "")]
    access_token: String,

    /// Configuration folder with the endpoint map, platform identity and
    /// translator descriptors
    #[arg(long, default_value = "./configurations")]
    configuration_folder: String,

    /// Ledger connection string: sqlite:<path> or json:<path>
    #[arg(long, default_value = "sqlite:memory/memory.sqlite3")]
    memory: String,
}

fn run(args: Args) -> anyhow::Result<()> {
    let auth = match (
        &args.keycloak_url,
        &args.keycloak_realm,
        &args.client_id,
        &args.client_secret,
    ) {
        (Some(url), Some(realm), Some(id), Some(secret)) => {
            Some(KeycloakAuth::new(url, realm, id, secret))
        }
        _ => None,
    };

    let client = AiodClient::new(&args.aiod_url, auth).context("building the AIoD client")?;
    info!("Configured AIoD connector");

    let config = BridgeConfig::load(&args.configuration_folder)
        .context("loading the configuration folder")?;
    let bridge = Bridge::new(config, client);

    let source = PortalClient::new(&args.portal_endpoint, QueryTemplates::new())
        .context("building the portal client")?;
    let memory =
        memory_from_connection_string(&args.memory).context("opening the sync ledger")?;

    let mut sync = CatalogSync::new(source, bridge, memory);
    sync.run(&args.access_token).context("synchronization run")?;

    info!("Synchronization run completed");
    Ok(())
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        error!("{:#}", err);
        std::process::exit(1);
    }
}
