//! # SFT (Secure File Transfer)
//!
//! TCP 기반 고정 크기 프레임 요청/응답 프로토콜 클라이언트
//!
//! ## 핵심 특징
//! - **고정 프레임**: 모든 송수신 단위는 1024바이트, 리틀 엔디언 헤더
//! - **등록/키 교환**: RSA 공개키로 AES 세션키를 전달받음
//! - **암호화 업로드**: AES-128-CBC로 파일 전체 암호화 후 프레임 단위 스트리밍
//! - **무결성 확인**: POSIX `cksum` 호환 CRC로 서버/클라이언트 결과 비교
//! - **재시도 정책**: 드라이버가 시도 횟수 상한을 관리, 세션은 시도 단위 결과만 보고

pub mod checksum;
pub mod config;
pub mod crypto;
pub mod driver;
pub mod error;
pub mod frame;
pub mod identity;
pub mod message;
pub mod server;
pub mod session;
pub mod transport;

pub use checksum::checksum;
pub use config::{Config, ServerConfig, TransferInfo};
pub use crypto::{RsaKeyPair, SessionCipher, SessionKey};
pub use driver::{Driver, RetryPolicy};
pub use error::{Error, Result};
pub use frame::{Frame, RequestHeader, ResponseHeader};
pub use identity::{ClientId, FileStore, Identity, IdentityStore};
pub use message::{RequestCode, ResponseCode, TransferOutcome};
pub use server::Server;
pub use session::{Session, SessionState};
pub use transport::{Connector, TcpConnector, Transport};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 3;

/// 고정 메시지 크기 (바이트)
pub const MESSAGE_SIZE: usize = 1024;

/// 이름/파일명 필드 고정 폭 (0 패딩)
pub const NAME_SIZE: usize = 255;

/// 클라이언트 ID 크기
pub const CLIENT_ID_SIZE: usize = 16;
