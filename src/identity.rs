//! 클라이언트 신원 (이름, ID, 키쌍)과 로컬 저장소
//!
//! 저장 형식:
//! - `me.info`: 이름 / ID(32자리 hex) / base64 공개키, 한 줄씩
//! - `priv.key`: base64 개인키 (PKCS#8 DER)

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info};

use crate::config::{ME_INFO_FILE, PRIV_KEY_FILE};
use crate::crypto::RsaKeyPair;
use crate::{Error, Result, CLIENT_ID_SIZE, NAME_SIZE};

/// 서버가 발급하는 16바이트 클라이언트 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ClientId([u8; CLIENT_ID_SIZE]);

impl ClientId {
    /// 미등록 상태를 나타내는 0 ID
    pub const ZERO: ClientId = ClientId([0u8; CLIENT_ID_SIZE]);

    pub fn new(bytes: [u8; CLIENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    /// 임의 ID 생성 (서버측)
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_SIZE] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self> {
        let mut bytes = [0u8; CLIENT_ID_SIZE];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|e| Error::Config(format!("잘못된 클라이언트 ID {:?}: {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// 클라이언트 신원
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    client_id: Option<ClientId>,
}

impl Identity {
    /// 미등록 신원 생성
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            client_id: None,
        })
    }

    /// 등록 완료된 신원 복원
    pub fn registered(name: impl Into<String>, client_id: ClientId) -> Result<Self> {
        let mut identity = Self::new(name)?;
        identity.client_id = Some(client_id);
        Ok(identity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub(crate) fn assign_client_id(&mut self, client_id: ClientId) {
        self.client_id = Some(client_id);
    }

    pub(crate) fn clear_client_id(&mut self) {
        self.client_id = None;
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config("클라이언트 이름이 비어 있음".into()));
    }
    if name.len() > NAME_SIZE {
        return Err(Error::Config(format!(
            "클라이언트 이름이 {}바이트 초과: {}",
            NAME_SIZE,
            name.len()
        )));
    }
    if name.contains('\0') {
        return Err(Error::Config("클라이언트 이름에 NUL 문자 포함".into()));
    }
    Ok(())
}

/// 등록 성공 시 신원/키 기록 인터페이스
pub trait IdentityStore {
    fn save(&self, identity: &Identity, keys: &RsaKeyPair) -> Result<()>;
}

/// 부트스트랩 결과
#[derive(Debug)]
pub struct Bootstrap {
    pub identity: Identity,
    pub keys: RsaKeyPair,
    /// 저장된 신원을 복원했는지 (재접속 경로)
    pub restored: bool,
}

/// 디렉터리 기반 신원 저장소
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn me_info_path(&self) -> PathBuf {
        self.dir.join(ME_INFO_FILE)
    }

    pub fn priv_key_path(&self) -> PathBuf {
        self.dir.join(PRIV_KEY_FILE)
    }

    /// 이전 등록 기록 존재 여부
    pub fn exists(&self) -> bool {
        self.me_info_path().exists()
    }

    /// 저장된 신원이 있으면 복원, 없으면 새 키쌍으로 미등록 신원 생성
    pub fn load_or_create(&self, name: &str) -> Result<Bootstrap> {
        if self.exists() {
            let (identity, keys) = self.load()?;
            info!(
                "Restored identity '{}' ({})",
                identity.name(),
                identity.client_id().unwrap_or_default()
            );
            return Ok(Bootstrap {
                identity,
                keys,
                restored: true,
            });
        }

        let identity = Identity::new(name)?;
        let keys = RsaKeyPair::generate()?;
        info!("Generated new RSA key pair for '{}'", identity.name());
        Ok(Bootstrap {
            identity,
            keys,
            restored: false,
        })
    }

    /// `me.info` + `priv.key` 읽기
    pub fn load(&self) -> Result<(Identity, RsaKeyPair)> {
        let me_path = self.me_info_path();
        let me = fs::read_to_string(&me_path).map_err(|e| Error::local_file(&me_path, e))?;
        let mut lines = me.lines();

        let name = lines
            .next()
            .ok_or_else(|| Error::Config(format!("{:?}: 이름 줄 없음", me_path)))?;
        let id_line = lines
            .next()
            .ok_or_else(|| Error::Config(format!("{:?}: ID 줄 없음", me_path)))?;
        let client_id = ClientId::from_hex(id_line)?;
        if client_id.is_zero() {
            return Err(Error::Config(format!("{:?}: 0 클라이언트 ID (미등록)", me_path)));
        }

        let key_path = self.priv_key_path();
        let key_text =
            fs::read_to_string(&key_path).map_err(|e| Error::local_file(&key_path, e))?;
        // 줄바꿈으로 나뉜 base64도 허용
        let joined: String = key_text.lines().map(str::trim).collect();
        let der = BASE64
            .decode(joined.as_bytes())
            .map_err(|e| Error::Config(format!("{:?}: base64 해독 실패: {}", key_path, e)))?;
        let keys = RsaKeyPair::from_private_der(&der)?;

        debug!("Loaded {:?} and {:?}", me_path, key_path);
        Ok((Identity::registered(name, client_id)?, keys))
    }
}

impl IdentityStore for FileStore {
    fn save(&self, identity: &Identity, keys: &RsaKeyPair) -> Result<()> {
        let client_id = identity.client_id().ok_or(Error::InvalidState {
            operation: "save identity",
            state: "unregistered",
        })?;

        fs::create_dir_all(&self.dir).map_err(|e| Error::local_file(&self.dir, e))?;

        let me_path = self.me_info_path();
        let me = format!(
            "{}\n{}\n{}\n",
            identity.name(),
            client_id.to_hex(),
            BASE64.encode(keys.public_key_der())
        );
        fs::write(&me_path, me).map_err(|e| Error::local_file(&me_path, e))?;

        let key_path = self.priv_key_path();
        let encoded = BASE64.encode(keys.private_key_der()?);
        write_private(&key_path, encoded.as_bytes()).map_err(|e| Error::local_file(&key_path, e))?;

        info!("Saved identity to {:?}", self.dir);
        Ok(())
    }
}

/// 개인키 파일은 소유자만 읽을 수 있게 생성
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)
}
