#[macro_use]
extern crate tracing;

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Command};
use ocmt_core::tracing::initialize_tracing;
use ocmt_relay::{start_relay, RelayConfiguration, RelayState};
use ocmt_storage::{MemoryStorage, SledStorage, SledStorageInit, Storage};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing(None);

    let args = Cli::parse();

    match args.command {
        Command::Serve {
            interface,
            port,
            storage_path,
            agent_server_url,
            agent_server_token,
            mesh_audit_url,
            allowed_origins,
            messages_per_minute,
            messages_per_hour,
            rate_limit_window_ms,
            requests_per_hour,
            forward_timeout_ms,
            forward_max_retries,
            message_ttl_hours,
        } => {
            let configuration = RelayConfiguration {
                storage_path: storage_path.clone(),
                agent_server_url,
                agent_server_token,
                mesh_audit_url,
                allowed_origins,
                messages_per_minute,
                messages_per_hour,
                rate_limit_window_ms,
                requests_per_hour,
                forward_timeout_ms,
                forward_max_retries,
                message_ttl_hours,
            };

            let listener = TcpListener::bind((interface, port)).await?;

            match storage_path {
                Some(path) => {
                    let storage = SledStorage::new(SledStorageInit::Path(path))?;
                    serve(listener, storage, configuration).await?;
                }
                None => {
                    warn!("No storage path configured; state will not survive a restart");
                    serve(listener, MemoryStorage::default(), configuration).await?;
                }
            }
        }
    };

    Ok(())
}

async fn serve<S>(
    listener: TcpListener,
    storage: S,
    configuration: RelayConfiguration,
) -> Result<()>
where
    S: Storage + 'static,
{
    let state = RelayState::new(&storage, configuration).await?;
    start_relay(listener, state).await
}
