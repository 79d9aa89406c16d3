//! POSIX `cksum` 호환 CRC-32
//!
//! 클라이언트와 서버가 평문 파일에 대해 각자 계산한 값을 비교하는 용도.
//! 일반 CRC-32와 달리 데이터 처리 후 바이트 길이를 추가로 접어 넣고 반전함.
//! 상대편이 이 변형을 기대하므로 그대로 유지해야 함.

use std::path::Path;

use crate::{Error, Result};

/// CRC-32 생성 다항식 (비반사, MSB 우선)
const POLYNOMIAL: u32 = 0x04C1_1DB7;

/// 바이트 단위 룩업 테이블 (컴파일 타임 생성)
static CRC_TABLE: [u32; 256] = build_table();

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLYNOMIAL
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

#[inline]
fn step(crc: u32, byte: u8) -> u32 {
    let idx = ((crc >> 24) as u8 ^ byte) as usize;
    (crc << 8) ^ CRC_TABLE[idx]
}

/// 바이트열의 cksum 값 계산
pub fn checksum(data: &[u8]) -> u32 {
    let mut crc = data.iter().fold(0u32, |crc, &b| step(crc, b));

    // 길이를 하위 바이트부터, 유효 바이트만큼 추가
    let mut len = data.len() as u64;
    while len != 0 {
        crc = step(crc, (len & 0xFF) as u8);
        len >>= 8;
    }

    !crc
}

/// 파일 전체를 읽어서 cksum 계산
pub fn checksum_file(path: &Path) -> Result<u32> {
    let data = std::fs::read(path).map_err(|e| Error::local_file(path, e))?;
    Ok(checksum(&data))
}
