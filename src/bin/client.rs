//! SFT 클라이언트 - 등록, 키 교환, 암호화 파일 업로드
//!
//! 작업 디렉터리에서 `transfer.info`를 읽고, `me.info`/`priv.key`가 있으면
//! 재접속, 없으면 새로 등록함
//!
//! 사용법:
//!   cargo run --release --bin sft-client -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉터리의 transfer.info 사용
//!   cargo run --release --bin sft-client
//!
//!   # 다른 디렉터리 + 서버 주소 덮어쓰기
//!   cargo run --release --bin sft-client -- --dir ./client --server 127.0.0.1:1357

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sft::config::TRANSFER_INFO_FILE;
use sft::{Config, Driver, FileStore, Session, TcpConnector, TransferInfo};

#[derive(Parser, Debug)]
#[command(name = "sft-client")]
#[command(version)]
#[command(about = "SFT client - registers, exchanges keys and uploads one encrypted file")]
struct Args {
    /// transfer.info / me.info / priv.key가 있는 디렉터리
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// transfer.info의 서버 주소 대신 사용할 host:port
    #[arg(short, long)]
    server: Option<String>,

    /// 재접속이 거절되면 재등록하지 않고 종료
    #[arg(long)]
    no_fallback: bool,

    /// debug 로그 출력
    #[arg(short, long)]
    verbose: bool,
}

fn run(args: Args) -> sft::Result<u32> {
    let info = TransferInfo::load(&args.dir.join(TRANSFER_INFO_FILE))?;
    let server_addr = args.server.unwrap_or_else(|| info.server_addr.clone());
    let file_path = info.resolve_file_path(&args.dir);

    info!("Server: {}", server_addr);
    info!("File: {:?}", file_path);

    let store = FileStore::new(&args.dir);
    let boot = store.load_or_create(&info.name)?;

    let config = if args.no_fallback {
        Config::strict()
    } else {
        Config::default()
    };

    let session = Session::new(
        TcpConnector::new(server_addr),
        Box::new(store),
        boot.identity,
        boot.keys,
        config.version,
    );
    Driver::new(session, config, file_path).run()
}

fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match run(args) {
        Ok(crc) => {
            info!("Transfer complete (cksum {})", crc);
            ExitCode::SUCCESS
        }
        Err(e) if e.is_fatal() => {
            error!("Fatal: {}", e);
            ExitCode::from(2)
        }
        Err(e) => {
            error!("Transfer failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
