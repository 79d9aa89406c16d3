//! 프로토콜 세션 (클라이언트측)
//!
//! - 등록 → 키 교환 → 암호화 파일 전송 → 결과 통보
//! - 요청 하나당 연결 하나, 응답 하나 (통보는 응답 없음)
//! - 재시도 없음: 시도 한 번의 성공/실패만 돌려주고 횟수 관리는 드라이버 몫

use std::path::Path;

use bytes::BytesMut;
use tracing::{debug, info, warn};

use crate::checksum::checksum;
use crate::crypto::{RsaKeyPair, SessionCipher, SessionKey};
use crate::frame::{Frame, RequestHeader, ResponseHeader};
use crate::identity::{ClientId, Identity, IdentityStore};
use crate::message::{
    ChecksumReport, ConnectRequest, FileNameRequest, KeyDelivery, RegisterRequest,
    RegistrationAccepted, RequestCode, ResponseCode, SendFileRequest, TransferOutcome,
};
use crate::transport::{self, Connector};
use crate::{Error, Result, MESSAGE_SIZE, NAME_SIZE};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// 클라이언트 ID 없음
    Unregistered,
    /// ID 있음, 세션 키 없음
    Registered,
    /// AES 세션 키 확보
    KeyEstablished,
    /// 파일 전송 중
    Transferring,
    /// 체크섬 일치로 전송 완료
    Done,
    /// 드라이버가 재시도 한도를 소진함 (종료 상태)
    Failed,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unregistered => "unregistered",
            SessionState::Registered => "registered",
            SessionState::KeyEstablished => "key-established",
            SessionState::Transferring => "transferring",
            SessionState::Done => "done",
            SessionState::Failed => "failed",
        }
    }
}

/// 클라이언트 프로토콜 세션
pub struct Session<C: Connector> {
    connector: C,
    store: Box<dyn IdentityStore>,
    version: u8,
    identity: Identity,
    keys: RsaKeyPair,
    session_key: Option<SessionKey>,
    state: SessionState,
    /// 모든 요청이 재사용하는 고정 버퍼
    frame: Frame,
}

impl<C: Connector> Session<C> {
    /// 새 세션 생성
    ///
    /// 신원에 ID가 있으면 `Registered`, 없으면 `Unregistered`에서 시작
    pub fn new(
        connector: C,
        store: Box<dyn IdentityStore>,
        identity: Identity,
        keys: RsaKeyPair,
        version: u8,
    ) -> Self {
        let state = if identity.client_id().is_some() {
            SessionState::Registered
        } else {
            SessionState::Unregistered
        };

        Self {
            connector,
            store,
            version,
            identity,
            keys,
            session_key: None,
            state,
            frame: Frame::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.identity.client_id()
    }

    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    pub fn keys(&self) -> &RsaKeyPair {
        &self.keys
    }

    /// 드라이버가 재시도 한도를 소진했을 때 호출
    pub fn mark_failed(&mut self) {
        warn!("Session for '{}' marked as failed", self.identity.name());
        self.state = SessionState::Failed;
    }

    /// 재접속 거절 후 신규 등록으로 되돌림 (키쌍은 유지)
    pub fn reset_registration(&mut self) {
        self.identity.clear_client_id();
        self.session_key = None;
        self.frame.clear();
        self.state = SessionState::Unregistered;
    }

    /// REGISTER 요청
    pub fn register(&mut self) -> Result<ClientId> {
        if self.state != SessionState::Unregistered {
            return Err(self.invalid_state("register"));
        }

        let request = RegisterRequest {
            name: self.identity.name().to_string(),
        };
        let mut payload = BytesMut::with_capacity(RegisterRequest::SIZE);
        request.encode(&mut payload)?;

        let mut conn = self.connector.connect()?;
        self.send_request(
            &mut conn,
            ClientId::ZERO,
            RequestCode::Register,
            RegisterRequest::SIZE as u32,
            &payload,
        )?;

        let header = self.recv_response(&mut conn)?;
        check_response(header.code, ResponseCode::RegSuccess, &[ResponseCode::RegFailed])?;

        let accepted = RegistrationAccepted::decode(self.frame.response_payload(&header)?)?;
        self.frame.clear();

        // 저장에 성공한 뒤에만 세션에 반영
        let mut candidate = self.identity.clone();
        candidate.assign_client_id(accepted.client_id);
        self.store.save(&candidate, &self.keys)?;

        self.identity = candidate;
        self.state = SessionState::Registered;
        info!(
            "'{}' registered with id {}",
            self.identity.name(),
            accepted.client_id
        );
        Ok(accepted.client_id)
    }

    /// CONNECT / RECONNECT 요청
    ///
    /// 최초 연결은 공개키를 함께 보내고, 재접속은 이름만 보냄.
    /// 응답의 암호화된 AES 키를 개인키로 풀어서 세션 키로 저장
    pub fn connect(&mut self, reconnect: bool) -> Result<()> {
        let operation = if reconnect { "reconnect" } else { "connect" };
        if !matches!(
            self.state,
            SessionState::Registered | SessionState::KeyEstablished
        ) {
            return Err(self.invalid_state(operation));
        }
        let client_id = self
            .identity
            .client_id()
            .ok_or_else(|| self.invalid_state(operation))?;

        let (code, expected) = if reconnect {
            (RequestCode::Reconnect, ResponseCode::ReconnectAccepted)
        } else {
            (RequestCode::Connect, ResponseCode::RsaReceived)
        };
        let request = ConnectRequest {
            name: self.identity.name().to_string(),
            public_key: (!reconnect).then(|| self.keys.public_key_der().to_vec()),
        };
        let mut payload = BytesMut::with_capacity(request.size());
        request.encode(&mut payload)?;

        let mut conn = self.connector.connect()?;
        self.send_request(&mut conn, client_id, code, request.size() as u32, &payload)?;

        let header = self.recv_response(&mut conn)?;
        check_response(header.code, expected, &[ResponseCode::ReconnectDenied])?;

        let delivery = KeyDelivery::decode(self.frame.response_payload(&header)?)?;
        self.frame.clear();

        if delivery.client_id != client_id {
            warn!(
                "Key delivered for {} but we are {}",
                delivery.client_id, client_id
            );
            return Err(Error::ClientIdMismatch {
                expected: client_id,
                got: delivery.client_id,
            });
        }

        let raw_key = self.keys.decrypt(&delivery.encrypted_key)?;
        self.session_key = Some(SessionKey::from_slice(&raw_key)?);
        self.state = SessionState::KeyEstablished;
        info!("Session key established ({})", operation);
        Ok(())
    }

    /// 파일 암호화 전송 후 서버 체크섬 확인
    ///
    /// 성공 시 로컬 체크섬 반환. 실패하면 `KeyEstablished`로 돌아가서 재시도 가능
    pub fn send_file(&mut self, path: &Path) -> Result<u32> {
        if self.state != SessionState::KeyEstablished {
            return Err(self.invalid_state("send"));
        }
        let (client_id, key) = match (self.identity.client_id(), self.session_key.clone()) {
            (Some(id), Some(key)) => (id, key),
            _ => return Err(self.invalid_state("send")),
        };

        let file_name = transfer_file_name(path)?;
        let plaintext = std::fs::read(path).map_err(|e| Error::local_file(path, e))?;
        let ciphertext = SessionCipher::new(key).encrypt(&plaintext);
        let content_size = u32::try_from(ciphertext.len())
            .ok()
            .filter(|size| size.checked_add(SendFileRequest::SIZE as u32).is_some())
            .ok_or_else(|| {
                Error::Config(format!("파일이 너무 큼: {:?} ({} bytes)", path, ciphertext.len()))
            })?;

        info!(
            "Sending {:?} ({} bytes, {} encrypted)",
            file_name,
            plaintext.len(),
            content_size
        );

        self.state = SessionState::Transferring;
        let result = self.transfer(client_id, &file_name, content_size, &plaintext, &ciphertext);
        self.frame.clear();

        self.state = if result.is_ok() {
            SessionState::Done
        } else {
            SessionState::KeyEstablished
        };
        result
    }

    fn transfer(
        &mut self,
        client_id: ClientId,
        file_name: &str,
        content_size: u32,
        plaintext: &[u8],
        ciphertext: &[u8],
    ) -> Result<u32> {
        let request = SendFileRequest {
            content_size,
            file_name: file_name.to_string(),
        };
        let declared = request.declared_size().ok_or_else(|| {
            Error::Config(format!("파일이 너무 큼: {} bytes", content_size))
        })?;
        let mut payload = BytesMut::with_capacity(SendFileRequest::SIZE);
        request.encode(&mut payload)?;

        let mut conn = self.connector.connect()?;
        self.send_request(&mut conn, client_id, RequestCode::Send, declared, &payload)?;

        // 본문: 헤더 없이 1024바이트 단위, 마지막 조각은 0 패딩
        let mut chunks = 0usize;
        for chunk in ciphertext.chunks(MESSAGE_SIZE) {
            self.frame.write_chunk(chunk)?;
            transport::send_message(&mut conn, self.frame.as_bytes())?;
            chunks += 1;
        }
        self.frame.clear();
        debug!("Streamed {} chunks", chunks);

        let header = self.recv_response(&mut conn)?;
        check_response(header.code, ResponseCode::CrcCheck, &[])?;

        let report = ChecksumReport::decode(self.frame.response_payload(&header)?)?;
        self.frame.clear();

        let local = checksum(plaintext);
        if report.checksum != local {
            warn!(
                "Checksum mismatch for {:?}: local {}, server {}",
                file_name, local, report.checksum
            );
            return Err(Error::ChecksumMismatch {
                expected: local,
                got: report.checksum,
            });
        }

        info!("Checksum verified for {:?}: {}", file_name, local);
        Ok(local)
    }

    /// 전송 결과 통보 (VALID_CRC / INVALID_CRC / FINAL_INVALID_CRC)
    ///
    /// 응답은 기다리지 않음
    pub fn notify_outcome(&mut self, outcome: TransferOutcome, path: &Path) -> Result<()> {
        let code = outcome.request_code();
        let client_id = self
            .identity
            .client_id()
            .ok_or_else(|| self.invalid_state("notify"))?;

        let request = FileNameRequest {
            file_name: transfer_file_name(path)?,
        };
        let mut payload = BytesMut::with_capacity(FileNameRequest::SIZE);
        request.encode(&mut payload)?;

        let mut conn = self.connector.connect()?;
        self.send_request(
            &mut conn,
            client_id,
            code,
            FileNameRequest::SIZE as u32,
            &payload,
        )?;
        info!("Sent {:?} for {:?}", code, request.file_name);
        Ok(())
    }

    /// 프레임 구성 → 송신 → 버퍼 비움
    fn send_request(
        &mut self,
        conn: &mut C::Conn,
        client_id: ClientId,
        code: RequestCode,
        payload_size: u32,
        payload: &[u8],
    ) -> Result<()> {
        let header = RequestHeader::new(client_id, self.version, code, payload_size);
        self.frame.write_request(&header, payload)?;
        let sent = transport::send_message(conn, self.frame.as_bytes());
        self.frame.clear();
        sent?;
        debug!("Sent {:?} (payload {} bytes)", code, payload_size);
        Ok(())
    }

    /// 버퍼 비움 → 응답 수신 → 헤더 파싱
    fn recv_response(&mut self, conn: &mut C::Conn) -> Result<ResponseHeader> {
        self.frame.clear();
        let received = transport::recv_response(conn, self.frame.as_mut_bytes())?;
        let header = self.frame.response_header()?;

        if header.version != self.version {
            debug!(
                "Server version {} differs from ours ({})",
                header.version, self.version
            );
        }
        debug!(
            "Received response {} ({} bytes, payload {})",
            header.code, received, header.payload_size
        );
        Ok(header)
    }

    fn invalid_state(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state.name(),
        }
    }
}

/// 응답 코드를 성공 / 거절 / 프로토콜 에러로 분류
fn check_response(code: u16, expected: ResponseCode, rejections: &[ResponseCode]) -> Result<()> {
    match ResponseCode::try_from(code) {
        Ok(actual) if actual == expected => Ok(()),
        Ok(actual) if rejections.contains(&actual) => {
            warn!("Server rejected request: {:?}", actual);
            Err(Error::Rejected { code: actual })
        }
        _ => {
            warn!("Unexpected response code {} (expected {:?})", code, expected);
            Err(Error::UnexpectedResponse {
                expected,
                got: code,
            })
        }
    }
}

/// 서버에 전달할 파일 이름 (경로의 마지막 요소)
pub fn transfer_file_name(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::Config(format!("전송할 파일 이름을 알 수 없음: {:?}", path)))?;
    if name.len() > NAME_SIZE {
        return Err(Error::Config(format!(
            "파일 이름이 {}바이트 초과: {:?}",
            NAME_SIZE, name
        )));
    }
    Ok(name.to_string())
}
