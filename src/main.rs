mod cli;

use chatroom_core::{ChatroomError, Config, ConfigLoader, ConfigValidator};
use chatroom_gateway::GatewayServer;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<(), ChatroomError> {
    let cli = Cli::parse();

    let dev = matches!(cli.command, Some(Commands::Serve { dev: true, .. }));
    init_tracing(dev);

    match cli.command {
        Some(Commands::ConfigSample { output }) => {
            let path = output.unwrap_or_else(|| std::path::PathBuf::from("./chatroom.sample.yaml"));
            Config::sample().save(&path)?;
            println!("Sample configuration written to {}", path.display());
            Ok(())
        }
        Some(Commands::Serve { host, port, .. }) => {
            serve(cli.config_path.as_deref(), host, port).await
        }
        None => serve(cli.config_path.as_deref(), None, None).await,
    }
}

fn init_tracing(dev: bool) {
    let env_filter = if dev {
        EnvFilter::new("chatroom=debug,chatroom_gateway=debug,chatroom_core=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("chatroom=info,chatroom_gateway=info,warn"))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer())
        .init();
}

async fn serve(
    config_path: Option<&str>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), ChatroomError> {
    let mut config = ConfigLoader::load(config_path)?;

    // CLI args win over the config file
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    ConfigValidator::validate(&config)?;

    info!(
        "Chatroom {} starting (sweep every {}s, idle timeout {}s)",
        env!("CARGO_PKG_VERSION"),
        config.presence.sweep_interval_secs,
        config.presence.idle_timeout_secs
    );

    let bound = GatewayServer::new(config.gateway, config.presence)
        .bind()
        .await
        .map_err(|e| ChatroomError::Other(format!("Gateway error: {:#}", e)))?;

    tokio::select! {
        result = bound.serve() => {
            result.map_err(|e| ChatroomError::Other(format!("Gateway error: {:#}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
