//! SFT 참조 서버
//!
//! 요청마다 연결 하나, 수신 파일은 `<dir>/backup/<client id>/`에 저장
//!
//! 사용법:
//!   cargo run --release --bin sft-server -- [OPTIONS]
//!
//! 예시:
//!   # port.info의 포트 (없으면 1357)
//!   cargo run --release --bin sft-server
//!
//!   # 포트 지정
//!   cargo run --release --bin sft-server -- --port 9000 --host 0.0.0.0

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sft::config::PORT_INFO_FILE;
use sft::{Server, ServerConfig};

#[derive(Parser, Debug)]
#[command(name = "sft-server")]
#[command(version)]
#[command(about = "SFT reference server")]
struct Args {
    /// port.info와 backup 디렉터리의 기준 디렉터리
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// 바인드 호스트
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// port.info 대신 사용할 포트
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::new();
    config.host = args.host;
    config.backup_dir = args.dir.join("backup");
    config = match args.port {
        Some(port) => ServerConfig { port, ..config },
        None => config.with_port_file(&args.dir.join(PORT_INFO_FILE)),
    };

    info!("SFT Server starting...");
    info!("Bind address: {}", config.bind_addr());
    info!("Backup directory: {:?}", config.backup_dir);
    info!("Protocol version: {}", config.version);

    Arc::new(Server::new(config)).run().await?;
    Ok(())
}
