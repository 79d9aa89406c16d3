//! 통합 테스트 공용 도구: 스크립트 연결기, 메모리 신원 저장소, 응답 프레임 생성

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::rc::Rc;
use std::sync::OnceLock;

use bytes::BytesMut;

use sft::crypto::{encrypt_for, RsaKeyPair};
use sft::frame::{RequestHeader, ResponseHeader, REQUEST_HEADER_SIZE};
use sft::message::{ChecksumReport, KeyDelivery, RegistrationAccepted};
use sft::{ClientId, Frame, Identity, IdentityStore, ResponseCode, MESSAGE_SIZE};

/// 연결기 공유 상태
#[derive(Default)]
pub struct Script {
    /// 연결이 처음 읽을 때 하나씩 꺼내는 응답
    responses: VecDeque<Vec<u8>>,
    /// 연결별로 기록된 송신 바이트
    pub sent: Vec<Vec<u8>>,
    pub connects: usize,
    /// 남은 횟수만큼 연결 거부
    pub refuse: usize,
}

/// 미리 준비한 응답을 돌려주는 연결기
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Rc<RefCell<Script>>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Vec<u8>) {
        self.script.borrow_mut().responses.push_back(response);
    }

    pub fn refuse_next(&self, count: usize) {
        self.script.borrow_mut().refuse = count;
    }

    pub fn connects(&self) -> usize {
        self.script.borrow().connects
    }

    pub fn pending_responses(&self) -> usize {
        self.script.borrow().responses.len()
    }

    /// 연결별 송신 기록 사본
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.script.borrow().sent.clone()
    }

    /// 연결별 첫 프레임의 요청 코드
    pub fn sent_codes(&self) -> Vec<u16> {
        self.sent()
            .iter()
            .map(|bytes| RequestHeader::decode(bytes).unwrap().code)
            .collect()
    }
}

impl sft::Connector for ScriptedConnector {
    type Conn = ScriptedConn;

    fn connect(&self) -> io::Result<ScriptedConn> {
        let mut script = self.script.borrow_mut();
        script.connects += 1;
        if script.refuse > 0 {
            script.refuse -= 1;
            return Err(io::Error::from(io::ErrorKind::ConnectionRefused));
        }
        Ok(ScriptedConn {
            script: self.script.clone(),
            written: Vec::new(),
            response: None,
        })
    }
}

pub struct ScriptedConn {
    script: Rc<RefCell<Script>>,
    written: Vec<u8>,
    response: Option<Cursor<Vec<u8>>>,
}

impl Read for ScriptedConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.response.is_none() {
            let next = self.script.borrow_mut().responses.pop_front();
            self.response = Some(Cursor::new(next.unwrap_or_default()));
        }
        match self.response.as_mut() {
            Some(cursor) => cursor.read(buf),
            None => Ok(0),
        }
    }
}

impl Write for ScriptedConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for ScriptedConn {
    fn drop(&mut self) {
        let written = std::mem::take(&mut self.written);
        self.script.borrow_mut().sent.push(written);
    }
}

/// 저장 호출을 기록만 하는 신원 저장소
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub saved: Rc<RefCell<Vec<Identity>>>,
}

impl IdentityStore for MemoryStore {
    fn save(&self, identity: &Identity, _keys: &RsaKeyPair) -> sft::Result<()> {
        self.saved.borrow_mut().push(identity.clone());
        Ok(())
    }
}

/// 항상 쓰기 실패하는 신원 저장소
pub struct FailingStore;

impl IdentityStore for FailingStore {
    fn save(&self, _identity: &Identity, _keys: &RsaKeyPair) -> sft::Result<()> {
        Err(sft::Error::local_file(
            "me.info",
            io::Error::from(io::ErrorKind::PermissionDenied),
        ))
    }
}

/// 테스트 전체에서 재사용하는 RSA 키쌍 (생성 비용 절감)
pub fn test_keys() -> RsaKeyPair {
    static DER: OnceLock<Vec<u8>> = OnceLock::new();
    let der = DER.get_or_init(|| {
        RsaKeyPair::generate()
            .unwrap()
            .private_key_der()
            .unwrap()
    });
    RsaKeyPair::from_private_der(der).unwrap()
}

/// 1024바이트 응답 프레임
pub fn response_frame(code: ResponseCode, payload: &[u8]) -> Vec<u8> {
    let mut frame = Frame::new();
    let header = ResponseHeader::new(3, code, payload.len() as u32);
    frame.write_response(&header, payload).unwrap();
    frame.as_bytes().to_vec()
}

pub fn reg_success(client_id: ClientId) -> Vec<u8> {
    let mut out = BytesMut::new();
    RegistrationAccepted { client_id }.encode(&mut out);
    response_frame(ResponseCode::RegSuccess, &out)
}

/// 공개키로 세션 키를 암호화한 키 전달 응답
pub fn key_delivery(
    code: ResponseCode,
    client_id: ClientId,
    public_der: &[u8],
    session_key: &[u8; 16],
) -> Vec<u8> {
    let delivery = KeyDelivery {
        client_id,
        encrypted_key: encrypt_for(public_der, session_key).unwrap(),
    };
    let mut out = BytesMut::new();
    delivery.encode(&mut out);
    response_frame(code, &out)
}

pub fn crc_report(client_id: ClientId, content_size: u32, file_name: &str, checksum: u32) -> Vec<u8> {
    let report = ChecksumReport {
        client_id,
        content_size,
        file_name: file_name.to_string(),
        checksum,
    };
    let mut out = BytesMut::new();
    report.encode(&mut out).unwrap();
    response_frame(ResponseCode::CrcCheck, &out)
}

/// 송신 기록의 첫 프레임 페이로드
pub fn request_payload(sent: &[u8]) -> &[u8] {
    &sent[REQUEST_HEADER_SIZE..MESSAGE_SIZE]
}
