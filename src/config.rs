//! 프로토콜/드라이버 설정과 설정 파일 파싱

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::{Error, Result, NAME_SIZE, PROTOCOL_VERSION};

/// 등록 정보 파일
pub const ME_INFO_FILE: &str = "me.info";

/// 개인키 파일
pub const PRIV_KEY_FILE: &str = "priv.key";

/// 전송 정보 파일 (서버 주소 / 이름 / 파일 경로)
pub const TRANSFER_INFO_FILE: &str = "transfer.info";

/// 서버 포트 파일
pub const PORT_INFO_FILE: &str = "port.info";

/// port.info가 없을 때 서버 기본 포트
pub const DEFAULT_PORT: u16 = 1357;

/// 클라이언트 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 요청 헤더에 싣는 버전 태그
    pub version: u8,

    /// 등록 최대 시도 횟수
    pub register_attempts: u32,

    /// 연결/재접속 최대 시도 횟수
    pub connect_attempts: u32,

    /// 파일 전송 최대 시도 횟수
    pub send_attempts: u32,

    /// 재접속이 모두 실패하면 새로 등록할지 여부
    /// false면 재접속 실패가 곧 종료
    pub register_on_reconnect_failure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: PROTOCOL_VERSION,
            register_attempts: 3,
            connect_attempts: 3,
            send_attempts: 4,
            register_on_reconnect_failure: true,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 재접속 실패 시 재등록하지 않는 설정
    pub fn strict() -> Self {
        Self {
            register_on_reconnect_failure: false,
            ..Self::default()
        }
    }

    /// 모든 요청을 한 번만 시도 (테스트/진단용)
    pub fn single_attempt() -> Self {
        Self {
            register_attempts: 1,
            connect_attempts: 1,
            send_attempts: 1,
            ..Self::default()
        }
    }
}

/// `transfer.info` 내용
///
/// 1행: 서버 `host:port`, 2행: 클라이언트 이름, 3행: 전송할 파일 경로
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferInfo {
    pub server_addr: String,
    pub name: String,
    pub file_path: PathBuf,
}

impl TransferInfo {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::local_file(path, e))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut lines = text.lines().map(str::trim_end);

        let server_addr = lines
            .next()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Config("transfer.info: 서버 주소 없음".into()))?;
        validate_server_addr(server_addr)?;

        let name = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Config("transfer.info: 클라이언트 이름 없음".into()))?;
        if name.len() > NAME_SIZE {
            return Err(Error::Config(format!(
                "transfer.info: 이름이 {}바이트 초과",
                NAME_SIZE
            )));
        }

        let file_path = lines
            .next()
            .filter(|l| !l.is_empty())
            .ok_or_else(|| Error::Config("transfer.info: 파일 경로 없음".into()))?;

        Ok(Self {
            server_addr: server_addr.to_string(),
            name: name.to_string(),
            file_path: PathBuf::from(file_path),
        })
    }

    /// 상대 경로는 기준 디렉터리 아래로 해석
    pub fn resolve_file_path(&self, base: &Path) -> PathBuf {
        if self.file_path.is_absolute() {
            self.file_path.clone()
        } else {
            base.join(&self.file_path)
        }
    }
}

fn validate_server_addr(addr: &str) -> Result<()> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| Error::Config(format!("서버 주소 형식 오류 (host:port): {}", addr)))?;
    if host.is_empty() {
        return Err(Error::Config(format!("서버 호스트 없음: {}", addr)));
    }
    port.parse::<u16>()
        .map_err(|_| Error::Config(format!("잘못된 포트: {}", addr)))?;
    Ok(())
}

/// 참조 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,

    /// 수신 파일 저장 루트 (클라이언트별 하위 디렉터리)
    pub backup_dir: PathBuf,

    /// 응답 헤더 버전 태그
    pub version: u8,

    /// 허용하는 최대 암호문 크기
    pub max_content_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            backup_dir: PathBuf::from("backup"),
            version: PROTOCOL_VERSION,
            max_content_size: 256 * 1024 * 1024, // 256MB
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// port.info에서 포트 읽기, 없거나 잘못되면 기본 포트
    pub fn with_port_file(mut self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match text.lines().next().map(str::trim).map(str::parse::<u16>) {
                Some(Ok(port)) => self.port = port,
                _ => warn!("Invalid port in {:?}, using {}", path, DEFAULT_PORT),
            },
            Err(_) => warn!("{:?} not found, using default port {}", path, DEFAULT_PORT),
        }
        self
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
