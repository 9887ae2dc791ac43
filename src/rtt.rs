//! RTT 추정 (Jacobson/Karels)
//!
//! 핸드쉐이크의 첫 RTT 샘플로 시드하고, 이후 유효한 ACK마다
//! 지수 가중 평균으로 평활 RTT(ERTT)와 편차(EDEV)를 갱신해
//! 재전송 타임아웃을 유도한다:
//!
//! ```text
//! SRTT    = now - 에코된 타임스탬프
//! SDEV    = |SRTT - ERTT|
//! ERTT    = 0.875 * ERTT + 0.125 * SRTT
//! EDEV    = 0.75  * EDEV + 0.25  * SDEV
//! timeout = ERTT + 4 * EDEV
//! ```
//!
//! 추정기 자체는 순수 상태 기계다. 갱신된 타임아웃은 타이머를 새로
//! 장전할 때만 읽히고, 이미 돌고 있는 타이머에는 소급 적용되지 않는다.

use std::time::Duration;

use crate::INITIAL_TIMEOUT_MS;

const ALPHA: f64 = 0.875;
const BETA: f64 = 0.75;

/// 타이머 장전 시 적용하는 타임아웃 하한 (나노초)
///
/// 루프백 RTT(수 마이크로초)를 그대로 쓰면 재시도 한도 16회가
/// 1밀리초 안에 소진된다. 추정값 자체는 클램프하지 않는다.
pub const MIN_TIMEOUT_NS: u64 = 10_000_000; // 10ms

/// Jacobson/Karels RTT 추정기
#[derive(Debug, Clone)]
pub struct RttEstimator {
    /// 평활 RTT (나노초)
    ertt: f64,

    /// 평활 편차 (나노초)
    edev: f64,

    /// 현재 재전송 타임아웃 (나노초)
    timeout: f64,
}

impl RttEstimator {
    /// 시드 이전 상태 (초기 타임아웃 사용)
    pub fn new() -> Self {
        let initial = (INITIAL_TIMEOUT_MS * 1_000_000) as f64;
        Self {
            ertt: initial,
            edev: 0.0,
            timeout: initial,
        }
    }

    /// 핸드쉐이크 RTT로 시드 (EDEV=0, timeout = 2 * ERTT)
    pub fn seed(&mut self, sample_ns: u64) {
        self.ertt = sample_ns as f64;
        self.edev = 0.0;
        self.timeout = 2.0 * self.ertt;
    }

    /// ACK에 실려온 RTT 샘플 반영, 갱신된 타임아웃(나노초) 반환
    pub fn sample(&mut self, srtt_ns: u64) -> u64 {
        let srtt = srtt_ns as f64;
        let sdev = (srtt - self.ertt).abs();

        self.ertt = ALPHA * self.ertt + (1.0 - ALPHA) * srtt;
        self.edev = BETA * self.edev + (1.0 - BETA) * sdev;
        self.timeout = self.ertt + 4.0 * self.edev;

        self.timeout_ns()
    }

    /// 현재 타임아웃 (나노초)
    pub fn timeout_ns(&self) -> u64 {
        self.timeout as u64
    }

    /// 타이머 장전용 타임아웃 (하한 적용)
    pub fn armed_timeout(&self) -> Duration {
        Duration::from_nanos(self.timeout_ns().max(MIN_TIMEOUT_NS))
    }
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}
