//! 참조 서버 (tokio)
//!
//! - 연결 하나당 요청 하나, 태스크 하나
//! - 클라이언트 레지스트리는 메모리에만 유지 (재시작하면 초기화)
//! - 수신 파일은 `backup/<client id>/<file name>`에 평문으로 저장

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::BytesMut;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::checksum::checksum;
use crate::crypto::{self, SessionCipher, SessionKey};
use crate::frame::{Frame, FrameError, RequestHeader, ResponseHeader};
use crate::identity::ClientId;
use crate::message::{
    ChecksumReport, ConnectRequest, FileNameRequest, KeyDelivery, RegisterRequest,
    RegistrationAccepted, RequestCode, ResponseCode, SendFileRequest,
};
use crate::{Error, Result, ServerConfig, MESSAGE_SIZE};

/// 등록된 클라이언트 정보
#[derive(Debug, Clone)]
struct ClientRecord {
    name: String,
    public_key: Option<Vec<u8>>,
    session_key: Option<SessionKey>,
}

/// 수신 파일 정보
#[derive(Debug, Clone)]
struct FileRecord {
    path: PathBuf,
    verified: bool,
}

/// 요청 처리 결과
enum Reply {
    Respond(ResponseCode, Vec<u8>),
    /// INVALID_CRC는 응답하지 않음
    Silent,
}

impl Reply {
    fn empty(code: ResponseCode) -> Self {
        Reply::Respond(code, Vec::new())
    }

    fn with_client_id(code: ResponseCode, client_id: ClientId) -> Self {
        Reply::Respond(code, client_id.as_bytes().to_vec())
    }
}

/// 참조 서버
pub struct Server {
    config: ServerConfig,
    clients: DashMap<ClientId, ClientRecord>,
    names: DashMap<String, ClientId>,
    files: Mutex<HashMap<(ClientId, String), FileRecord>>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            clients: DashMap::new(),
            names: DashMap::new(),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// 등록된 클라이언트 수
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn client_id_of(&self, name: &str) -> Option<ClientId> {
        self.names.get(name).map(|id| *id)
    }

    /// 저장된 파일 경로 (삭제된 파일은 None)
    pub fn stored_file(&self, client_id: &ClientId, file_name: &str) -> Option<PathBuf> {
        self.files
            .lock()
            .get(&(*client_id, file_name.to_string()))
            .map(|record| record.path.clone())
    }

    /// 클라이언트가 VALID_CRC로 확인한 파일인지
    pub fn is_verified(&self, client_id: &ClientId, file_name: &str) -> bool {
        self.files
            .lock()
            .get(&(*client_id, file_name.to_string()))
            .map_or(false, |record| record.verified)
    }

    /// 설정된 주소에 바인딩 후 서비스
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.config.bind_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Server listening on {}", addr);
        self.serve(listener).await
    }

    /// 수락 루프
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        tokio::fs::create_dir_all(&self.config.backup_dir)
            .await
            .map_err(|e| Error::local_file(&self.config.backup_dir, e))?;

        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, peer).await {
                    warn!("Connection from {} failed: {}", peer, e);
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nodelay(true)?;

        let mut frame = Frame::new();
        stream.read_exact(frame.as_mut_bytes()).await?;
        let header = frame.request_header()?;

        if header.version != self.config.version {
            debug!(
                "Client {} uses version {} (server {})",
                peer, header.version, self.config.version
            );
        }

        let reply = match header.request_code() {
            Ok(code) => {
                debug!("{:?} from {} ({})", code, peer, header.client_id);
                match self.dispatch(code, &header, &frame, &mut stream).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        warn!("{:?} from {} failed: {}", code, peer, e);
                        Reply::empty(ResponseCode::GeneralServerErr)
                    }
                }
            }
            Err(e) => {
                warn!("Bad request from {}: {}", peer, e);
                Reply::empty(ResponseCode::GeneralServerErr)
            }
        };

        if let Reply::Respond(code, payload) = reply {
            let header = ResponseHeader::new(self.config.version, code, payload.len() as u32);
            frame.write_response(&header, &payload)?;
            // 통보에 대한 응답은 클라이언트가 읽지 않고 닫을 수 있음
            if let Err(e) = stream.write_all(frame.as_bytes()).await {
                debug!("Response {:?} to {} not delivered: {}", code, peer, e);
            }
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        code: RequestCode,
        header: &RequestHeader,
        frame: &Frame,
        stream: &mut TcpStream,
    ) -> Result<Reply> {
        let payload = frame.request_payload(header);
        match code {
            RequestCode::Register => self.register(payload),
            RequestCode::Connect => self.connect(header.client_id, payload),
            RequestCode::Reconnect => self.reconnect(header.client_id, payload),
            RequestCode::Send => self.receive_file(header, payload, stream).await,
            RequestCode::ValidCrc => self.file_verified(header.client_id, payload),
            RequestCode::InvalidCrc => {
                self.discard_file(header.client_id, payload).await?;
                Ok(Reply::Silent)
            }
            // 직전 INVALID_CRC에서 이미 삭제됨
            RequestCode::FinalInvalidCrc => {
                info!("Client {} gave up on its transfer", header.client_id);
                Ok(Reply::with_client_id(
                    ResponseCode::MsgReceived,
                    header.client_id,
                ))
            }
        }
    }

    fn register(&self, payload: &[u8]) -> Result<Reply> {
        let request = RegisterRequest::decode(payload)?;
        if request.name.is_empty() {
            warn!("Registration with empty name rejected");
            return Ok(Reply::empty(ResponseCode::RegFailed));
        }

        let client_id = match self.names.entry(request.name.clone()) {
            Entry::Occupied(_) => {
                info!("Name {:?} already registered", request.name);
                return Ok(Reply::empty(ResponseCode::RegFailed));
            }
            Entry::Vacant(slot) => {
                let mut client_id = ClientId::random();
                while client_id.is_zero() || self.clients.contains_key(&client_id) {
                    client_id = ClientId::random();
                }
                self.clients.insert(
                    client_id,
                    ClientRecord {
                        name: request.name.clone(),
                        public_key: None,
                        session_key: None,
                    },
                );
                slot.insert(client_id);
                client_id
            }
        };

        info!("Registered {:?} as {}", request.name, client_id);
        let mut out = BytesMut::with_capacity(RegistrationAccepted::SIZE);
        RegistrationAccepted { client_id }.encode(&mut out);
        Ok(Reply::Respond(ResponseCode::RegSuccess, out.to_vec()))
    }

    fn connect(&self, client_id: ClientId, payload: &[u8]) -> Result<Reply> {
        let request = ConnectRequest::decode(payload, true)?;
        let public_key = request.public_key.unwrap_or_default();

        let mut record = match self.clients.get_mut(&client_id) {
            Some(record) if record.name == request.name => record,
            _ => {
                warn!("Connect from unknown client {} ({:?})", client_id, request.name);
                return Ok(Reply::empty(ResponseCode::GeneralServerErr));
            }
        };

        let key = SessionKey::generate();
        let encrypted_key = crypto::encrypt_for(&public_key, key.as_bytes())?;
        record.public_key = Some(public_key);
        record.session_key = Some(key);
        drop(record);

        info!("Session key issued to {}", client_id);
        Ok(key_reply(ResponseCode::RsaReceived, client_id, encrypted_key))
    }

    fn reconnect(&self, client_id: ClientId, payload: &[u8]) -> Result<Reply> {
        let request = ConnectRequest::decode(payload, false)?;

        let mut record = match self.clients.get_mut(&client_id) {
            Some(record) if record.name == request.name && record.public_key.is_some() => record,
            _ => {
                info!("Reconnect denied for {} ({:?})", client_id, request.name);
                return Ok(Reply::with_client_id(ResponseCode::ReconnectDenied, client_id));
            }
        };

        let key = SessionKey::generate();
        let encrypted_key = match &record.public_key {
            Some(public_key) => crypto::encrypt_for(public_key, key.as_bytes())?,
            None => return Ok(Reply::with_client_id(ResponseCode::ReconnectDenied, client_id)),
        };
        record.session_key = Some(key);
        drop(record);

        info!("Client {} reconnected", client_id);
        Ok(key_reply(ResponseCode::ReconnectAccepted, client_id, encrypted_key))
    }

    async fn receive_file(
        &self,
        header: &RequestHeader,
        payload: &[u8],
        stream: &mut TcpStream,
    ) -> Result<Reply> {
        let client_id = header.client_id;
        let request = SendFileRequest::decode(payload)?;

        if request.declared_size() != Some(header.payload_size) {
            return Err(FrameError::InvalidField {
                field: "payload_size",
                reason: format!(
                    "declared {}, content {} + {}",
                    header.payload_size,
                    request.content_size,
                    SendFileRequest::SIZE
                ),
            }
            .into());
        }
        if request.content_size > self.config.max_content_size {
            return Err(FrameError::PayloadTooLarge {
                capacity: self.config.max_content_size as usize,
                actual: request.content_size as usize,
            }
            .into());
        }

        let key = self
            .clients
            .get(&client_id)
            .and_then(|record| record.session_key.clone())
            .ok_or(Error::InvalidState {
                operation: "send",
                state: "no session key",
            })?;

        let file_name = sanitize_file_name(&request.file_name).ok_or_else(|| {
            Error::Frame(FrameError::InvalidField {
                field: "file_name",
                reason: format!("{:?}", request.file_name),
            })
        })?;

        // 본문: 1024바이트 조각, 마지막 조각의 패딩은 잘라냄
        let content_size = request.content_size as usize;
        let chunks = content_size.div_ceil(MESSAGE_SIZE);
        let mut ciphertext = Vec::with_capacity(chunks * MESSAGE_SIZE);
        let mut chunk = [0u8; MESSAGE_SIZE];
        for _ in 0..chunks {
            stream.read_exact(&mut chunk).await?;
            ciphertext.extend_from_slice(&chunk);
        }
        ciphertext.truncate(content_size);

        let plaintext = SessionCipher::new(key).decrypt(&ciphertext)?;
        let crc = checksum(&plaintext);

        let path = self.store_file(client_id, &file_name, &plaintext).await?;
        info!(
            "Received {:?} from {} ({} bytes, crc {})",
            file_name,
            client_id,
            plaintext.len(),
            crc
        );

        let report = ChecksumReport {
            client_id,
            content_size: request.content_size,
            file_name: request.file_name,
            checksum: crc,
        };
        let mut out = BytesMut::with_capacity(ChecksumReport::SIZE);
        report.encode(&mut out)?;
        debug!("Stored at {:?}", path);
        Ok(Reply::Respond(ResponseCode::CrcCheck, out.to_vec()))
    }

    async fn store_file(&self, client_id: ClientId, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        let dir = self.config.backup_dir.join(client_id.to_hex());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::local_file(&dir, e))?;

        let path = dir.join(file_name);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| Error::local_file(&path, e))?;

        self.files.lock().insert(
            (client_id, file_name.to_string()),
            FileRecord {
                path: path.clone(),
                verified: false,
            },
        );
        Ok(path)
    }

    fn file_verified(&self, client_id: ClientId, payload: &[u8]) -> Result<Reply> {
        let request = FileNameRequest::decode(payload)?;
        let key = (client_id, sanitize_file_name(&request.file_name).unwrap_or_default());

        match self.files.lock().get_mut(&key) {
            Some(record) => {
                record.verified = true;
                info!("{:?} from {} verified", key.1, client_id);
            }
            None => warn!("VALID_CRC for unknown file {:?} from {}", request.file_name, client_id),
        }
        Ok(Reply::with_client_id(ResponseCode::MsgReceived, client_id))
    }

    async fn discard_file(&self, client_id: ClientId, payload: &[u8]) -> Result<()> {
        let request = FileNameRequest::decode(payload)?;
        let Some(file_name) = sanitize_file_name(&request.file_name) else {
            return Ok(());
        };

        let removed = self.files.lock().remove(&(client_id, file_name.clone()));
        if let Some(record) = removed {
            remove_quietly(&record.path).await;
            info!("Discarded {:?} from {}", file_name, client_id);
        }
        Ok(())
    }
}

fn key_reply(code: ResponseCode, client_id: ClientId, encrypted_key: Vec<u8>) -> Reply {
    let delivery = KeyDelivery {
        client_id,
        encrypted_key,
    };
    let mut out = BytesMut::with_capacity(delivery.size());
    delivery.encode(&mut out);
    Reply::Respond(code, out.to_vec())
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        error!("Failed to remove {:?}: {}", path, e);
    }
}

/// 경로 구성 요소를 제거한 저장용 파일 이름
///
/// 빈 이름, `.`/`..`, 구분자만 있는 이름은 거부
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let base = name.rsplit(['/', '\\']).next()?;
    if base.is_empty() || base == "." || base == ".." {
        return None;
    }
    Some(base.to_string())
}
