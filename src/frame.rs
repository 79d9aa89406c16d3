//! 고정 크기 프레임 코덱
//!
//! 요청: client_id(16) | version(1) | code(2) | payload_size(4) | payload
//! 응답: version(1) | code(2) | payload_size(4) | payload
//!
//! 프레임은 항상 1024바이트, 페이로드 뒤 남는 공간은 0으로 채워서 보냄

use bytes::{Buf, BufMut};
use thiserror::Error;

use crate::identity::ClientId;
use crate::message::{RequestCode, ResponseCode};
use crate::{CLIENT_ID_SIZE, MESSAGE_SIZE};

/// 요청 헤더 크기
pub const REQUEST_HEADER_SIZE: usize = CLIENT_ID_SIZE + 1 + 2 + 4;

/// 응답 헤더 크기
pub const RESPONSE_HEADER_SIZE: usize = 1 + 2 + 4;

/// 요청 프레임에 실을 수 있는 최대 페이로드
pub const REQUEST_PAYLOAD_CAPACITY: usize = MESSAGE_SIZE - REQUEST_HEADER_SIZE;

/// 응답 프레임에 실을 수 있는 최대 페이로드
pub const RESPONSE_PAYLOAD_CAPACITY: usize = MESSAGE_SIZE - RESPONSE_HEADER_SIZE;

const RESPONSE_CODE_OFFSET: usize = 1;
const RESPONSE_PAYLOAD_SIZE_OFFSET: usize = 3;

/// 프레임 파싱/생성 에러
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("프레임이 너무 짧음: expected {expected}, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("페이로드가 프레임 용량 초과: capacity {capacity}, got {actual}")]
    PayloadTooLarge { capacity: usize, actual: usize },

    #[error("알 수 없는 요청 코드: {0}")]
    UnknownRequestCode(u16),

    #[error("알 수 없는 응답 코드: {0}")]
    UnknownResponseCode(u16),

    #[error("필드 길이 초과: {field} 최대 {max}, got {actual}")]
    FieldTooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("잘못된 필드 {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// 요청 헤더 (23바이트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub client_id: ClientId,
    pub version: u8,
    /// 원시 코드 값 (서버는 모르는 코드에도 응답해야 함)
    pub code: u16,
    pub payload_size: u32,
}

impl RequestHeader {
    pub fn new(client_id: ClientId, version: u8, code: RequestCode, payload_size: u32) -> Self {
        Self {
            client_id,
            version,
            code: code.into(),
            payload_size,
        }
    }

    /// 헤더 기록
    ///
    /// REGISTER 요청은 아직 ID가 없으므로 client_id 필드를 항상 0으로 씀
    pub fn encode(&self, dst: &mut impl BufMut) {
        if self.code == u16::from(RequestCode::Register) {
            dst.put_bytes(0, CLIENT_ID_SIZE);
        } else {
            dst.put_slice(self.client_id.as_bytes());
        }
        dst.put_u8(self.version);
        dst.put_u16_le(self.code);
        dst.put_u32_le(self.payload_size);
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < REQUEST_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: REQUEST_HEADER_SIZE,
                actual: src.len(),
            });
        }

        let mut src = &src[..REQUEST_HEADER_SIZE];
        let mut id = [0u8; CLIENT_ID_SIZE];
        src.copy_to_slice(&mut id);

        Ok(Self {
            client_id: ClientId::new(id),
            version: src.get_u8(),
            code: src.get_u16_le(),
            payload_size: src.get_u32_le(),
        })
    }

    pub fn request_code(&self) -> Result<RequestCode, FrameError> {
        RequestCode::try_from(self.code)
    }
}

/// 응답 헤더 (7바이트)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub version: u8,
    pub code: u16,
    pub payload_size: u32,
}

impl ResponseHeader {
    pub fn new(version: u8, code: ResponseCode, payload_size: u32) -> Self {
        Self {
            version,
            code: code.into(),
            payload_size,
        }
    }

    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.version);
        dst.put_u16_le(self.code);
        dst.put_u32_le(self.payload_size);
    }

    pub fn decode(src: &[u8]) -> Result<Self, FrameError> {
        if src.len() < RESPONSE_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: RESPONSE_HEADER_SIZE,
                actual: src.len(),
            });
        }

        let mut src = &src[..RESPONSE_HEADER_SIZE];
        Ok(Self {
            version: src.get_u8(),
            code: src.get_u16_le(),
            payload_size: src.get_u32_le(),
        })
    }

    pub fn response_code(&self) -> Result<ResponseCode, FrameError> {
        ResponseCode::try_from(self.code)
    }
}

/// 버퍼 앞 23바이트에 요청 헤더 기록
pub fn pack_request_header(
    buffer: &mut [u8],
    client_id: &ClientId,
    version: u8,
    code: u16,
    payload_size: u32,
) -> Result<(), FrameError> {
    if buffer.len() < REQUEST_HEADER_SIZE {
        return Err(FrameError::TooShort {
            expected: REQUEST_HEADER_SIZE,
            actual: buffer.len(),
        });
    }

    let header = RequestHeader {
        client_id: *client_id,
        version,
        code,
        payload_size,
    };
    let mut dst = &mut buffer[..REQUEST_HEADER_SIZE];
    header.encode(&mut dst);
    Ok(())
}

/// 수신 프레임에서 응답 코드 추출 (오프셋 1, LE16)
pub fn read_response_code(frame: &[u8]) -> Result<u16, FrameError> {
    let field = frame
        .get(RESPONSE_CODE_OFFSET..RESPONSE_CODE_OFFSET + 2)
        .ok_or(FrameError::TooShort {
            expected: RESPONSE_CODE_OFFSET + 2,
            actual: frame.len(),
        })?;
    Ok(u16::from_le_bytes([field[0], field[1]]))
}

/// 수신 프레임에서 페이로드 크기 추출 (오프셋 3, LE32)
pub fn read_payload_size(frame: &[u8]) -> Result<u32, FrameError> {
    let field = frame
        .get(RESPONSE_PAYLOAD_SIZE_OFFSET..RESPONSE_PAYLOAD_SIZE_OFFSET + 4)
        .ok_or(FrameError::TooShort {
            expected: RESPONSE_PAYLOAD_SIZE_OFFSET + 4,
            actual: frame.len(),
        })?;
    Ok(u32::from_le_bytes([field[0], field[1], field[2], field[3]]))
}

/// 1024바이트 고정 메시지 버퍼
///
/// 세션이 소유하고 코덱에는 `&mut`로만 넘김. 송신 직후와 새 작업 시작 전에
/// 반드시 비워서 짧은 페이로드 뒤에 이전 내용이 섞이지 않게 함
pub struct Frame {
    buf: [u8; MESSAGE_SIZE],
}

impl Default for Frame {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let used = self.buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        f.debug_struct("Frame").field("used", &used).finish()
    }
}

impl Frame {
    pub fn new() -> Self {
        Self {
            buf: [0u8; MESSAGE_SIZE],
        }
    }

    /// 전체 버퍼를 0으로 초기화
    pub fn clear(&mut self) {
        self.buf.fill(0);
    }

    pub fn is_clear(&self) -> bool {
        self.buf.iter().all(|&b| b == 0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// 요청 헤더 + 페이로드 기록, 나머지는 0
    pub fn write_request(
        &mut self,
        header: &RequestHeader,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        if payload.len() > REQUEST_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLarge {
                capacity: REQUEST_PAYLOAD_CAPACITY,
                actual: payload.len(),
            });
        }

        self.clear();
        let mut dst = &mut self.buf[..];
        header.encode(&mut dst);
        dst.put_slice(payload);
        Ok(())
    }

    /// 응답 헤더 + 페이로드 기록, 나머지는 0
    pub fn write_response(
        &mut self,
        header: &ResponseHeader,
        payload: &[u8],
    ) -> Result<(), FrameError> {
        if payload.len() > RESPONSE_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLarge {
                capacity: RESPONSE_PAYLOAD_CAPACITY,
                actual: payload.len(),
            });
        }

        self.clear();
        let mut dst = &mut self.buf[..];
        header.encode(&mut dst);
        dst.put_slice(payload);
        Ok(())
    }

    /// 헤더 없는 본문 조각 기록 (마지막 조각은 0 패딩)
    pub fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FrameError> {
        if chunk.len() > MESSAGE_SIZE {
            return Err(FrameError::PayloadTooLarge {
                capacity: MESSAGE_SIZE,
                actual: chunk.len(),
            });
        }

        self.clear();
        self.buf[..chunk.len()].copy_from_slice(chunk);
        Ok(())
    }

    pub fn request_header(&self) -> Result<RequestHeader, FrameError> {
        RequestHeader::decode(&self.buf)
    }

    /// 요청 페이로드 (프레임 용량까지만)
    ///
    /// SEND는 뒤따르는 본문까지 포함한 크기를 선언하므로 잘라서 반환
    pub fn request_payload(&self, header: &RequestHeader) -> &[u8] {
        let len = (header.payload_size as usize).min(REQUEST_PAYLOAD_CAPACITY);
        &self.buf[REQUEST_HEADER_SIZE..REQUEST_HEADER_SIZE + len]
    }

    pub fn response_header(&self) -> Result<ResponseHeader, FrameError> {
        ResponseHeader::decode(&self.buf)
    }

    /// 응답 페이로드, 선언 크기가 프레임을 넘으면 에러
    pub fn response_payload(&self, header: &ResponseHeader) -> Result<&[u8], FrameError> {
        let len = header.payload_size as usize;
        if len > RESPONSE_PAYLOAD_CAPACITY {
            return Err(FrameError::PayloadTooLarge {
                capacity: RESPONSE_PAYLOAD_CAPACITY,
                actual: len,
            });
        }
        Ok(&self.buf[RESPONSE_HEADER_SIZE..RESPONSE_HEADER_SIZE + len])
    }
}
