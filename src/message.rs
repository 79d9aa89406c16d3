//! 요청/응답 코드와 페이로드 레이아웃
//!
//! 모든 정수는 리틀 엔디언, 문자열 필드는 고정 폭 + 0 패딩

use bytes::{Buf, BufMut};

use crate::crypto::PUBLIC_KEY_SIZE;
use crate::frame::FrameError;
use crate::identity::ClientId;
use crate::{CLIENT_ID_SIZE, NAME_SIZE};

/// 요청 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum RequestCode {
    /// 신규 등록 (이름)
    Register = 1025,
    /// 최초 연결 (이름 + 공개키)
    Connect = 1026,
    /// 재접속 (이름)
    Reconnect = 1027,
    /// 암호화 파일 전송
    Send = 1028,
    /// CRC 일치 통보
    ValidCrc = 1029,
    /// CRC 불일치 통보 (재전송 예정)
    InvalidCrc = 1030,
    /// CRC 불일치, 재시도 포기
    FinalInvalidCrc = 1031,
}

impl TryFrom<u16> for RequestCode {
    type Error = FrameError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            1025 => RequestCode::Register,
            1026 => RequestCode::Connect,
            1027 => RequestCode::Reconnect,
            1028 => RequestCode::Send,
            1029 => RequestCode::ValidCrc,
            1030 => RequestCode::InvalidCrc,
            1031 => RequestCode::FinalInvalidCrc,
            other => return Err(FrameError::UnknownRequestCode(other)),
        })
    }
}

impl From<RequestCode> for u16 {
    fn from(code: RequestCode) -> u16 {
        code as u16
    }
}

/// 응답 코드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ResponseCode {
    RegSuccess = 2100,
    RegFailed = 2101,
    RsaReceived = 2102,
    CrcCheck = 2103,
    MsgReceived = 2104,
    ReconnectAccepted = 2105,
    ReconnectDenied = 2106,
    GeneralServerErr = 2107,
}

impl TryFrom<u16> for ResponseCode {
    type Error = FrameError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        Ok(match code {
            2100 => ResponseCode::RegSuccess,
            2101 => ResponseCode::RegFailed,
            2102 => ResponseCode::RsaReceived,
            2103 => ResponseCode::CrcCheck,
            2104 => ResponseCode::MsgReceived,
            2105 => ResponseCode::ReconnectAccepted,
            2106 => ResponseCode::ReconnectDenied,
            2107 => ResponseCode::GeneralServerErr,
            other => return Err(FrameError::UnknownResponseCode(other)),
        })
    }
}

impl From<ResponseCode> for u16 {
    fn from(code: ResponseCode) -> u16 {
        code as u16
    }
}

/// 전송 결과 통보 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// 서버 파일 유지
    Valid,
    /// 서버 파일 삭제, 재전송 예정
    Invalid,
    /// 재시도 모두 소진
    FinalInvalid,
}

impl TransferOutcome {
    pub fn request_code(self) -> RequestCode {
        match self {
            TransferOutcome::Valid => RequestCode::ValidCrc,
            TransferOutcome::Invalid => RequestCode::InvalidCrc,
            TransferOutcome::FinalInvalid => RequestCode::FinalInvalidCrc,
        }
    }
}

/// 고정 폭 문자열 필드 기록 (남는 공간은 0)
pub fn put_fixed_str(
    dst: &mut impl BufMut,
    field: &'static str,
    value: &str,
    width: usize,
) -> Result<(), FrameError> {
    let bytes = value.as_bytes();
    if bytes.len() > width {
        return Err(FrameError::FieldTooLong {
            field,
            max: width,
            actual: bytes.len(),
        });
    }
    dst.put_slice(bytes);
    dst.put_bytes(0, width - bytes.len());
    Ok(())
}

/// 고정 폭 문자열 필드 읽기 (뒤쪽 0 제거)
pub fn get_fixed_str(src: &mut impl Buf, width: usize) -> String {
    let mut raw = vec![0u8; width];
    src.copy_to_slice(&mut raw);
    let end = raw.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    raw.truncate(end);
    String::from_utf8_lossy(&raw).into_owned()
}

fn ensure_len(src: &[u8], expected: usize) -> Result<(), FrameError> {
    if src.len() < expected {
        return Err(FrameError::TooShort {
            expected,
            actual: src.len(),
        });
    }
    Ok(())
}

fn get_client_id(src: &mut impl Buf) -> ClientId {
    let mut id = [0u8; CLIENT_ID_SIZE];
    src.copy_to_slice(&mut id);
    ClientId::new(id)
}

/// REGISTER 페이로드: name(255)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    pub name: String,
}

impl RegisterRequest {
    pub const SIZE: usize = NAME_SIZE;

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        put_fixed_str(dst, "name", &self.name, NAME_SIZE)
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, Self::SIZE)?;
        let mut src = src;
        Ok(Self {
            name: get_fixed_str(&mut src, NAME_SIZE),
        })
    }
}

/// CONNECT / RECONNECT 페이로드
///
/// CONNECT: name(255) + public_key(160), RECONNECT: name(255)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub name: String,
    /// 재접속이면 None (서버가 이미 공개키 보유)
    pub public_key: Option<Vec<u8>>,
}

impl ConnectRequest {
    pub fn size(&self) -> usize {
        match self.public_key {
            Some(_) => NAME_SIZE + PUBLIC_KEY_SIZE,
            None => NAME_SIZE,
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        put_fixed_str(dst, "name", &self.name, NAME_SIZE)?;
        if let Some(key) = &self.public_key {
            if key.len() != PUBLIC_KEY_SIZE {
                return Err(FrameError::InvalidField {
                    field: "public_key",
                    reason: format!("expected {} bytes, got {}", PUBLIC_KEY_SIZE, key.len()),
                });
            }
            dst.put_slice(key);
        }
        Ok(())
    }

    pub fn decode(src: &[u8], with_public_key: bool) -> Result<Self, FrameError> {
        let expected = if with_public_key {
            NAME_SIZE + PUBLIC_KEY_SIZE
        } else {
            NAME_SIZE
        };
        ensure_len(src, expected)?;

        let mut src = src;
        let name = get_fixed_str(&mut src, NAME_SIZE);
        let public_key = with_public_key.then(|| src[..PUBLIC_KEY_SIZE].to_vec());
        Ok(Self { name, public_key })
    }
}

/// SEND 헤더 페이로드: content_size(4) + file_name(255)
///
/// 암호문 본문은 이 프레임 뒤에 헤더 없이 1024바이트 단위로 이어짐
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFileRequest {
    /// 암호문 크기
    pub content_size: u32,
    pub file_name: String,
}

impl SendFileRequest {
    pub const SIZE: usize = 4 + NAME_SIZE;

    /// 헤더에 선언하는 페이로드 크기 (뒤따르는 본문 포함)
    pub fn declared_size(&self) -> Option<u32> {
        self.content_size.checked_add(Self::SIZE as u32)
    }

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        dst.put_u32_le(self.content_size);
        put_fixed_str(dst, "file_name", &self.file_name, NAME_SIZE)
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, Self::SIZE)?;
        let mut src = src;
        let content_size = src.get_u32_le();
        let file_name = get_fixed_str(&mut src, NAME_SIZE);
        Ok(Self {
            content_size,
            file_name,
        })
    }
}

/// CRC 결과 통보 페이로드: file_name(255)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileNameRequest {
    pub file_name: String,
}

impl FileNameRequest {
    pub const SIZE: usize = NAME_SIZE;

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        put_fixed_str(dst, "file_name", &self.file_name, NAME_SIZE)
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, Self::SIZE)?;
        let mut src = src;
        Ok(Self {
            file_name: get_fixed_str(&mut src, NAME_SIZE),
        })
    }
}

/// REG_SUCCESS 페이로드: client_id(16)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationAccepted {
    pub client_id: ClientId,
}

impl RegistrationAccepted {
    pub const SIZE: usize = CLIENT_ID_SIZE;

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.client_id.as_bytes());
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, Self::SIZE)?;
        let mut src = src;
        Ok(Self {
            client_id: get_client_id(&mut src),
        })
    }
}

/// RSA_RECEIVED / RECONNECT_ACCEPTED 페이로드
///
/// client_id(16) + RSA-OAEP로 암호화된 AES 키 (나머지 전부)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDelivery {
    pub client_id: ClientId,
    pub encrypted_key: Vec<u8>,
}

impl KeyDelivery {
    pub fn size(&self) -> usize {
        CLIENT_ID_SIZE + self.encrypted_key.len()
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(self.client_id.as_bytes());
        dst.put_slice(&self.encrypted_key);
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, CLIENT_ID_SIZE + 1)?;
        let mut src = src;
        let client_id = get_client_id(&mut src);
        Ok(Self {
            client_id,
            encrypted_key: src.to_vec(),
        })
    }
}

/// CRC_CHECK 페이로드
///
/// client_id(16) + content_size(4) + file_name(255) + checksum(4)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumReport {
    pub client_id: ClientId,
    pub content_size: u32,
    pub file_name: String,
    /// 서버가 복호화된 평문으로 계산한 cksum
    pub checksum: u32,
}

impl ChecksumReport {
    pub const SIZE: usize = CLIENT_ID_SIZE + 4 + NAME_SIZE + 4;

    pub fn encode(&self, dst: &mut impl BufMut) -> Result<(), FrameError> {
        dst.put_slice(self.client_id.as_bytes());
        dst.put_u32_le(self.content_size);
        put_fixed_str(dst, "file_name", &self.file_name, NAME_SIZE)?;
        dst.put_u32_le(self.checksum);
        Ok(())
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        ensure_len(src, Self::SIZE)?;
        let mut src = src;
        let client_id = get_client_id(&mut src);
        let content_size = src.get_u32_le();
        let file_name = get_fixed_str(&mut src, NAME_SIZE);
        let checksum = src.get_u32_le();
        Ok(Self {
            client_id,
            content_size,
            file_name,
            checksum,
        })
    }
}
