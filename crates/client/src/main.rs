//! `analyst` - terminal client for the requirements analyst assistant.

mod terminal;

use analyst_client::logging::init_logging;
use analyst_client::{Cli, ClientConfig, ClientHandle, KvStore, Location, Preferences, SessionIdentity};
use clap::Parser;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ClientConfig::resolve(&cli)?;
    config.data_dir.ensure_dirs()?;
    let logging = init_logging(&config.logging)?;

    let store = KvStore::open(&config.data_dir.db_path())?;
    let identity = SessionIdentity::new(store.clone(), Location::parse(&config.location)?);

    let client_id = identity.client_id()?;
    info!(
        component = "main",
        event = "client.starting",
        run_id = %logging.run_id,
        client_id = %client_id,
        server = %config.server_url,
        data_dir = %config.data_dir.root().display(),
        "Starting analyst client"
    );
    let preferences = Preferences::load(store);

    let client = ClientHandle::spawn(identity, config.server_url.clone(), config.timings)?;
    let result = terminal::run(client.clone(), preferences).await;
    client.shutdown();

    info!(
        component = "main",
        event = "client.stopped",
        "Analyst client stopped"
    );
    result
}
