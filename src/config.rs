//! 엔드포인트 설정

use std::net::SocketAddr;
use std::path::PathBuf;

use crate::{Error, Result, DEFAULT_MTU, DEFAULT_SWS, HEADER_SIZE, INITIAL_TIMEOUT_MS};

/// 송신자 설정
#[derive(Debug, Clone)]
pub struct SendConfig {
    /// 로컬 바인드 포트 (0이면 자동 할당)
    pub port: u16,

    /// 수신자 주소
    pub remote: SocketAddr,

    /// 전송할 파일 경로
    pub file_name: PathBuf,

    /// MTU (헤더 포함 세그먼트 최대 크기, 바이트)
    pub mtu: usize,

    /// 송신 윈도우 크기 (동시 in-flight 세그먼트 수)
    pub sws: usize,

    /// 핸드쉐이크/종료 시도당 대기 시간 (밀리초)
    pub handshake_timeout_ms: u64,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            port: 0,
            remote: "127.0.0.1:9000".parse().unwrap(),
            file_name: PathBuf::new(),
            mtu: DEFAULT_MTU,
            sws: DEFAULT_SWS,
            handshake_timeout_ms: INITIAL_TIMEOUT_MS,
        }
    }
}

impl SendConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        validate_common(self.mtu, self.sws)
    }

    /// 세그먼트당 최대 페이로드 (MTU - 헤더)
    pub fn max_payload(&self) -> usize {
        self.mtu - HEADER_SIZE
    }
}

/// 수신자 설정
#[derive(Debug, Clone)]
pub struct RecvConfig {
    /// 바인드 포트
    pub port: u16,

    /// MTU (헤더 포함 세그먼트 최대 크기, 바이트)
    pub mtu: usize,

    /// 수신 큐 크기 (디스크 쓰기 대기 세그먼트 수, 송신 윈도우와 동일)
    pub sws: usize,

    /// 출력 파일 경로
    pub file_name: PathBuf,

    /// 핸드쉐이크/종료 시도당 대기 시간 (밀리초)
    pub handshake_timeout_ms: u64,
}

impl Default for RecvConfig {
    fn default() -> Self {
        Self {
            port: 0,
            mtu: DEFAULT_MTU,
            sws: DEFAULT_SWS,
            file_name: PathBuf::new(),
            handshake_timeout_ms: INITIAL_TIMEOUT_MS,
        }
    }
}

impl RecvConfig {
    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        validate_common(self.mtu, self.sws)
    }
}

fn validate_common(mtu: usize, sws: usize) -> Result<()> {
    // 헤더 + 최소 1바이트 페이로드
    if mtu <= HEADER_SIZE {
        return Err(Error::MtuTooSmall { mtu });
    }
    if sws == 0 {
        return Err(Error::InvalidWindow);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_valid() {
        assert!(SendConfig::default().validate().is_ok());
        assert!(RecvConfig::default().validate().is_ok());
    }

    #[test]
    fn test_mtu_must_exceed_header() {
        let cfg = SendConfig {
            mtu: HEADER_SIZE,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::MtuTooSmall { .. })));
    }

    #[test]
    fn test_zero_window_rejected() {
        let cfg = RecvConfig {
            sws: 0,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidWindow)));
    }

    #[test]
    fn test_max_payload() {
        let cfg = SendConfig {
            mtu: 1024,
            ..Default::default()
        };
        assert_eq!(cfg.max_payload(), 1000);
    }
}
