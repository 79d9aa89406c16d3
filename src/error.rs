//! 에러 타입 정의

use std::path::PathBuf;

use thiserror::Error;

use crate::crypto::CryptoError;
use crate::frame::FrameError;
use crate::identity::ClientId;
use crate::message::ResponseCode;

/// SFT 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    /// 소켓 연결/송신/수신 실패 (해당 시도만 실패)
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    /// 로컬 파일 접근 실패 (프로세스 치명적)
    #[error("로컬 파일 접근 실패 {path:?}: {source}")]
    LocalFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 설정 파일 내용 오류 (프로세스 치명적)
    #[error("설정 에러: {0}")]
    Config(String),

    /// 서버가 요청을 거절함 (REG_FAILED, RECONNECT_DENIED)
    #[error("서버 거절: {code:?}")]
    Rejected { code: ResponseCode },

    #[error("예상하지 못한 응답 코드: expected {expected:?}, got {got}")]
    UnexpectedResponse { expected: ResponseCode, got: u16 },

    #[error("프레임 에러: {0}")]
    Frame(#[from] FrameError),

    /// 키 응답에 실린 ID가 요청한 ID와 다름
    #[error("클라이언트 ID 불일치: expected {expected}, got {got}")]
    ClientIdMismatch { expected: ClientId, got: ClientId },

    #[error("CRC 불일치: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("암호화 에러: {0}")]
    Crypto(#[from] CryptoError),

    /// 현재 세션 상태에서 허용되지 않는 요청
    #[error("잘못된 세션 상태: {operation} 요청 불가 (현재 {state})")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("{operation} {attempts}회 시도 모두 실패: {last}")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
        last: Box<Error>,
    },
}

impl Error {
    /// 로컬 파일 에러 생성 헬퍼
    pub fn local_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::LocalFile {
            path: path.into(),
            source,
        }
    }

    /// 재시도해도 의미 없는 에러인지 여부
    ///
    /// 로컬 파일/설정 에러와 상태 위반은 네트워크 재시도로 해결되지 않음
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::LocalFile { .. } | Error::Config(_) | Error::InvalidState { .. } => true,
            Error::RetriesExhausted { last, .. } => last.is_fatal(),
            _ => false,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
