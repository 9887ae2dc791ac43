//! 에러 타입 정의

use thiserror::Error;

/// TCPend 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("세그먼트 길이 불일치: 선언 {declared} 바이트, 버퍼 {got} 바이트")]
    LengthMismatch { declared: usize, got: usize },

    #[error("핸드쉐이크 실패: {attempts}회 재시도 후 응답 없음")]
    HandshakeFailed { attempts: u32 },

    #[error("재전송 한도 초과: 연결 중단")]
    RetriesExhausted,

    #[error("연결 종료 실패: {attempts}회 재시도 후 FIN ACK 없음")]
    TeardownFailed { attempts: u32 },

    #[error("MTU가 너무 작음: {mtu} 바이트 (헤더 24 바이트 + 페이로드 1 바이트 이상 필요)")]
    MtuTooSmall { mtu: usize },

    #[error("세그먼트가 MTU 초과: {len} > {mtu}")]
    SegmentTooLarge { len: usize, mtu: usize },

    #[error("파일이 너무 큼: {len} 바이트 (시퀀스 번호는 u32 바이트 오프셋)")]
    FileTooLarge { len: u64 },

    #[error("윈도우 크기는 1 이상이어야 함")]
    InvalidWindow,

    #[error("연결되지 않음")]
    NotConnected,

    #[error("쓰기 워커 종료됨")]
    WorkerGone,
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
