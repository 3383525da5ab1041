use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::runtime;
use tracing::info;
use wirecall::{setup_tracing, AppConfig, AppResult, BusinessError, CallContext, Server, Service};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct EchoPayload {
    message: String,
}

fn main() -> AppResult<()> {
    setup_tracing()?;

    let commandline: CommandLine = CommandLine::parse();
    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = AppConfig::set_up_config(config_path)?;

    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    rt.block_on(serve(config))
}

async fn serve(config: AppConfig) -> AppResult<()> {
    let echo = Service::new("echo").register(
        "echo",
        |_ctx: CallContext, payload: EchoPayload| async move {
            Ok::<_, BusinessError>(payload)
        },
    );

    let mut server = Server::bind(config.network.listen_addr()).await?;
    server.set_max_connections(config.network.max_connection);
    server.set_max_frame_size(config.network.max_frame_size);
    server.register_service(echo);
    info!("wirecall listening on {}", server.local_addr()?);

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
