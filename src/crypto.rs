//! 암호화 모듈 - RSA-OAEP 키 전달 + AES-128-CBC 파일 암호화
//!
//! 흐름:
//! 1. 클라이언트가 RSA-1024 키쌍 생성 (또는 저장된 개인키 복원)
//! 2. 공개키(X.509 DER, 160바이트)를 CONNECT 요청으로 전달
//! 3. 서버가 AES 키를 생성해 OAEP(SHA-1)로 암호화해서 응답
//! 4. 클라이언트가 개인키로 복호화, 이후 파일을 AES-CBC로 암호화

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;

/// RSA 모듈러스 크기 (비트)
pub const RSA_KEY_BITS: usize = 1024;

/// 공개 지수 17 + 1024비트 모듈러스 = DER 160바이트
const RSA_PUBLIC_EXPONENT: u32 = 17;

/// DER 인코딩 공개키 크기
pub const PUBLIC_KEY_SIZE: usize = 160;

/// AES-128 키 크기
pub const SYMMETRIC_KEY_SIZE: usize = 16;

/// CBC IV (상대편과 맞추기 위해 0 고정)
const ZERO_IV: [u8; 16] = [0u8; 16];

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// 암호화 오류
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("키 생성 실패: {0}")]
    KeyGeneration(String),
    #[error("키 인코딩 실패: {0}")]
    Encoding(String),
    #[error("잘못된 키 형식: {0}")]
    InvalidKey(String),
    #[error("암호화 실패: {0}")]
    EncryptionFailed(String),
    #[error("복호화 실패: {0}")]
    DecryptionFailed(String),
    #[error("잘못된 키 크기: expected {expected}, got {got}")]
    InvalidKeySize { expected: usize, got: usize },
}

/// 클라이언트 RSA 키쌍
pub struct RsaKeyPair {
    private: RsaPrivateKey,
    public_der: Vec<u8>,
}

impl std::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("public_der_len", &self.public_der.len())
            .finish_non_exhaustive()
    }
}

impl RsaKeyPair {
    /// 새 키쌍 생성
    pub fn generate() -> Result<Self, CryptoError> {
        let exponent = BigUint::from(RSA_PUBLIC_EXPONENT);
        let private = RsaPrivateKey::new_with_exp(&mut OsRng, RSA_KEY_BITS, &exponent)
            .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;
        Self::from_private(private)
    }

    /// PKCS#8 DER 개인키에서 복원
    pub fn from_private_der(der: &[u8]) -> Result<Self, CryptoError> {
        let private =
            RsaPrivateKey::from_pkcs8_der(der).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Self::from_private(private)
    }

    fn from_private(private: RsaPrivateKey) -> Result<Self, CryptoError> {
        let public_der = RsaPublicKey::from(&private)
            .to_public_key_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?
            .as_bytes()
            .to_vec();

        if public_der.len() != PUBLIC_KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                expected: PUBLIC_KEY_SIZE,
                got: public_der.len(),
            });
        }

        Ok(Self {
            private,
            public_der,
        })
    }

    /// 공개키 (X.509 SubjectPublicKeyInfo DER)
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_der
    }

    /// 개인키 (PKCS#8 DER)
    pub fn private_key_der(&self) -> Result<Vec<u8>, CryptoError> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Ok(doc.as_bytes().to_vec())
    }

    /// OAEP(SHA-1) 복호화
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.private
            .decrypt(Oaep::new::<Sha1>(), ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}

/// DER 공개키로 OAEP(SHA-1) 암호화 (서버측)
pub fn encrypt_for(public_der: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let public = RsaPublicKey::from_public_key_der(public_der)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    public
        .encrypt(&mut OsRng, Oaep::new::<Sha1>(), plaintext)
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))
}

/// AES-128 세션 키
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey([u8; SYMMETRIC_KEY_SIZE]);

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

impl SessionKey {
    pub fn new(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// 임의 키 생성 (서버측)
    pub fn generate() -> Self {
        Self(rand::random())
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; SYMMETRIC_KEY_SIZE] =
            bytes.try_into().map_err(|_| CryptoError::InvalidKeySize {
                expected: SYMMETRIC_KEY_SIZE,
                got: bytes.len(),
            })?;
        Ok(Self(key))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.0
    }
}

/// 파일 암호화기 (AES-128-CBC, PKCS#7 패딩)
pub struct SessionCipher {
    key: SessionKey,
}

impl SessionCipher {
    pub fn new(key: SessionKey) -> Self {
        Self { key }
    }

    /// 전체 암호화, 결과 길이는 항상 16의 배수
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.0.into(), &ZERO_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        Aes128CbcDec::new(&self.key.0.into(), &ZERO_IV.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }
}
