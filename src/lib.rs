//! # TCPend
//!
//! UDP 데이터그램 위에 구현한 신뢰성 바이트 스트림 전송 (미니 TCP)
//!
//! ## 핵심 특징
//! - **3-way 핸드쉐이크**: SYN / SYN+ACK / ACK 연결 수립
//! - **누적 ACK**: 시퀀스 번호 = 바이트 오프셋, 순서 보장 전달
//! - **슬라이딩 윈도우**: 고정 크기(sws) in-flight 윈도우로 흐름 제어
//! - **세그먼트별 재전송 타이머**: 적응형 타임아웃으로 독립 재전송
//! - **Fast Retransmit**: 중복 ACK 3회 시 즉시 재전송
//! - **Jacobson/Karels RTT 추정**: ERTT/EDEV 기반 타임아웃 계산
//! - **4-way 종료**: FIN / ACK 대칭 교환
//!
//! 혼잡 제어(slow start 등), SACK, 수신측 순서 재조립 버퍼는 지원하지 않음.
//! 순서가 어긋난 세그먼트는 버리고 이전 누적 ACK을 재전송한다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod receiver;
pub mod retransmit;
pub mod rtt;
pub mod segment;
pub mod sender;

pub use config::{RecvConfig, SendConfig};
pub use error::{Error, Result};
pub use metrics::Metrics;
pub use receiver::Receiver;
pub use rtt::RttEstimator;
pub use segment::{SegFlag, Segment, HEADER_SIZE};
pub use sender::Sender;

/// 핸드쉐이크/재전송/종료 공통 재시도 한도
pub const MAX_RETRIES: u32 = 0x10;

/// 초기 타임아웃 (밀리초) - 핸드쉐이크 대기 및 첫 RTT 샘플 이전에 사용
pub const INITIAL_TIMEOUT_MS: u64 = 0x1388; // 5000ms

/// 기본 MTU (헤더 포함 세그먼트 최대 크기, 바이트)
pub const DEFAULT_MTU: usize = 1500;

/// 기본 송신 윈도우 크기 (세그먼트 수)
pub const DEFAULT_SWS: usize = 8;
