//! O2 Backend - 보안 부트스트랩 및 백업 서비스

use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use o2_lib::config::{self, AppConfig};
use o2_lib::error::AppError;
use o2_lib::logging;

#[derive(Parser)]
#[command(name = "o2-backend")]
#[command(about = "O2 secure bootstrap and PostgreSQL backup service")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default)
    Serve {
        /// Address to listen on (overrides O2_LISTEN_ADDR)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Rotate the JWT signing secret (previous <- current, new current)
    RotateJwt,
}

#[tokio::main]
async fn main() {
    // 개발 환경: .env.local (운영에서는 없을 수 있음)
    let dev_env = config::load_dev_env();

    let cli = Cli::parse();

    let result = match AppConfig::from_env() {
        Ok(config) => {
            logging::init(config.log_dir.as_deref());
            if let Some(path) = &dev_env {
                tracing::debug!(path = %path.display(), "development env loaded");
            }
            dispatch(cli.command.unwrap_or(Command::Serve { listen: None }), config).await
        }
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, code = e.code(), "o2-backend failed");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn dispatch(command: Command, mut config: AppConfig) -> Result<(), AppError> {
    match command {
        Command::Serve { listen } => {
            if let Some(addr) = listen {
                config.listen_addr = addr;
            }
            o2_lib::run(config).await
        }
        Command::RotateJwt => {
            let secrets = tokio::task::spawn_blocking(move || o2_lib::rotate_jwt(&config))
                .await
                .map_err(|e| AppError::Internal(e.to_string()))??;
            println!("JWT secret rotated to version {}", secrets.version);
            Ok(())
        }
    }
}
