//! 전송 계층
//!
//! 요청 하나마다 새 연결을 열고, 작업이 끝나면 drop으로 닫힘.
//! 세션은 `Connector`만 알고 실제 소켓 종류는 모름.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use tracing::debug;

use crate::frame::{self, RESPONSE_HEADER_SIZE};

/// 블로킹 바이트 스트림
pub trait Transport: Read + Write {}

impl<T: Read + Write> Transport for T {}

/// 요청용 연결 생성기
pub trait Connector {
    type Conn: Transport;

    fn connect(&self) -> io::Result<Self::Conn>;
}

/// TCP 연결 생성기
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

impl Connector for TcpConnector {
    type Conn = TcpStream;

    fn connect(&self) -> io::Result<TcpStream> {
        let stream = TcpStream::connect(&self.addr)?;
        stream.set_nodelay(true)?;
        debug!("Connected to {}", self.addr);
        Ok(stream)
    }
}

/// 고정 크기 메시지 한 개 송신
pub fn send_message(conn: &mut impl Write, message: &[u8]) -> io::Result<()> {
    conn.write_all(message)?;
    conn.flush()
}

/// 응답 프레임 수신
///
/// 헤더를 먼저 채우고, 선언된 페이로드(버퍼 크기 한도)까지 읽음.
/// 선언된 페이로드가 다 오기 전에 연결이 닫히면 `UnexpectedEof`.
pub fn recv_response(conn: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    let mut wanted = RESPONSE_HEADER_SIZE.min(buf.len());

    while filled < wanted {
        let n = match conn.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        filled += n;

        if filled >= RESPONSE_HEADER_SIZE {
            let declared = frame::read_payload_size(buf)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            wanted = RESPONSE_HEADER_SIZE
                .saturating_add(declared as usize)
                .min(buf.len());
        }
    }

    if filled < RESPONSE_HEADER_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("응답 헤더 수신 전 연결 종료 ({} bytes)", filled),
        ));
    }
    if filled < wanted {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("응답 페이로드 수신 전 연결 종료 ({}/{} bytes)", filled, wanted),
        ));
    }

    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// 한 번에 몇 바이트씩만 돌려주는 리더
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        step: usize,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.step.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    fn response_bytes(payload_len: u32) -> Vec<u8> {
        let mut bytes = vec![3, 0x34, 0x08];
        bytes.extend_from_slice(&payload_len.to_le_bytes());
        bytes.extend(std::iter::repeat(0xAB).take(payload_len as usize));
        bytes
    }

    #[test]
    fn test_recv_partial_reads() {
        let mut reader = Trickle {
            data: response_bytes(16),
            pos: 0,
            step: 3,
        };
        let mut buf = [0u8; 1024];
        let n = recv_response(&mut reader, &mut buf).unwrap();
        assert_eq!(n, RESPONSE_HEADER_SIZE + 16);
        assert_eq!(&buf[RESPONSE_HEADER_SIZE..n], &[0xAB; 16]);
    }

    #[test]
    fn test_recv_full_frame() {
        let mut data = response_bytes(16);
        data.resize(1024, 0);
        let mut reader = Cursor::new(data);
        let mut buf = [0u8; 1024];
        assert!(recv_response(&mut reader, &mut buf).unwrap() >= RESPONSE_HEADER_SIZE + 16);
    }

    #[test]
    fn test_recv_eof_before_header() {
        let mut reader = Cursor::new(vec![3, 0x34]);
        let mut buf = [0u8; 1024];
        let err = recv_response(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_recv_truncated_payload_is_eof() {
        let mut data = response_bytes(100);
        data.truncate(RESPONSE_HEADER_SIZE + 10);
        let mut reader = Cursor::new(data);
        let mut buf = [0u8; 1024];
        let err = recv_response(&mut reader, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_recv_payload_larger_than_buffer_stops_at_capacity() {
        let mut reader = Cursor::new(response_bytes(100));
        let mut buf = [0u8; 32];
        assert_eq!(recv_response(&mut reader, &mut buf).unwrap(), 32);
    }

    #[test]
    fn test_send_message() {
        let mut out = Vec::new();
        send_message(&mut out, &[1, 2, 3]).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}
