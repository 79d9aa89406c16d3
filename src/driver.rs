//! 드라이버 - 세션 호출 순서와 재시도 횟수 관리
//!
//! 세션은 한 번의 시도 결과만 돌려주므로 반복과 포기 판단은 여기서 함.
//! 로컬 파일/설정 에러는 재시도하지 않고 즉시 종료.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::message::TransferOutcome;
use crate::session::{Session, SessionState};
use crate::transport::Connector;
use crate::{Config, Error, Result};

/// 시도 횟수 상한 정책
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// 성공하거나 치명적 에러가 나거나 한도를 채울 때까지 반복
    pub fn run<T>(&self, operation: &'static str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op() {
                Ok(value) => {
                    if attempt > 1 {
                        info!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("{} failed {} times, giving up", operation, attempt);
                    return Err(Error::RetriesExhausted {
                        operation,
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    warn!(
                        "{} attempt {}/{} failed: {}",
                        operation, attempt, self.max_attempts, e
                    );
                    attempt += 1;
                }
            }
        }
    }
}

/// 등록/키 교환/전송 전체 흐름 실행기
pub struct Driver<C: Connector> {
    session: Session<C>,
    config: Config,
    file_path: PathBuf,
}

impl<C: Connector> Driver<C> {
    pub fn new(session: Session<C>, config: Config, file_path: impl Into<PathBuf>) -> Self {
        Self {
            session,
            config,
            file_path: file_path.into(),
        }
    }

    pub fn session(&self) -> &Session<C> {
        &self.session
    }

    pub fn into_session(self) -> Session<C> {
        self.session
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// 전체 흐름 실행, 성공 시 검증된 체크섬 반환
    pub fn run(&mut self) -> Result<u32> {
        if let Err(e) = self.establish() {
            self.session.mark_failed();
            return Err(e);
        }
        self.transfer()
    }

    /// 세션 키 확보까지 진행
    ///
    /// 저장된 신원이 있으면 재접속, 없거나 재접속이 모두 거절되면 신규 등록 후 연결
    pub fn establish(&mut self) -> Result<()> {
        if self.session.state() == SessionState::Registered {
            let policy = RetryPolicy::new(self.config.connect_attempts);
            let session = &mut self.session;
            match policy.run("reconnect", || session.connect(true)) {
                Ok(()) => {
                    info!("Reconnected");
                    return Ok(());
                }
                Err(e) if e.is_fatal() || !self.config.register_on_reconnect_failure => {
                    return Err(e)
                }
                Err(e) => {
                    warn!("Reconnect rejected ({}), registering as a new client", e);
                    self.session.reset_registration();
                }
            }
        }

        let session = &mut self.session;
        RetryPolicy::new(self.config.register_attempts).run("register", || session.register())?;
        info!("Registered");

        let session = &mut self.session;
        RetryPolicy::new(self.config.connect_attempts).run("connect", || session.connect(false))?;
        info!("Connected");
        Ok(())
    }

    /// 파일 전송 + 결과 통보
    ///
    /// 실패할 때마다 INVALID_CRC, 성공하면 VALID_CRC,
    /// 한도 소진 후에는 FINAL_INVALID_CRC를 보내고 세션을 `Failed`로 전환
    pub fn transfer(&mut self) -> Result<u32> {
        let max_attempts = self.config.send_attempts.max(1);
        let mut attempt = 1;

        loop {
            info!("Sending file {:?} (attempt {}/{})", self.file_path, attempt, max_attempts);

            let err = match self.session.send_file(&self.file_path) {
                Ok(crc) => {
                    self.notify(TransferOutcome::Valid);
                    info!("Checksum test passed, transfer complete");
                    return Ok(crc);
                }
                Err(e) if e.is_fatal() => {
                    self.session.mark_failed();
                    return Err(e);
                }
                Err(e) => e,
            };

            warn!("File transfer failed: {}", err);
            self.notify(TransferOutcome::Invalid);

            if attempt >= max_attempts {
                self.notify(TransferOutcome::FinalInvalid);
                self.session.mark_failed();
                return Err(Error::RetriesExhausted {
                    operation: "send",
                    attempts: attempt,
                    last: Box::new(err),
                });
            }
            attempt += 1;
        }
    }

    /// 통보 실패는 전송 결과를 바꾸지 않으므로 기록만 함
    fn notify(&mut self, outcome: TransferOutcome) {
        if let Err(e) = self.session.notify_outcome(outcome, &self.file_path) {
            warn!("Failed to send {:?} notification: {}", outcome, e);
        }
    }
}
