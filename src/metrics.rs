//! 전송 메트릭
//!
//! 연결당 카운터. 송수신 경로와 재전송 타이머가 동시에 갱신하므로
//! 전부 원자 카운터로 유지하고, 종료 시 요약 블록을 출력한다.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// 연결별 전송 메트릭
#[derive(Debug, Default)]
pub struct Metrics {
    /// 전송/수신한 데이터 바이트
    data_transferred: AtomicU64,

    /// 전송/수신한 세그먼트 수
    packets_transferred: AtomicU64,

    /// 순서 불일치(또는 큐 가득참)로 버린 세그먼트 수
    packets_discarded: AtomicU64,

    /// 체크섬 불일치로 버린 세그먼트 수
    wrong_checksum: AtomicU64,

    /// 재전송 횟수
    retransmissions: AtomicU64,

    /// 중복 ACK 수
    duplicate_acks: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_data(&self, bytes: u64) {
        self.data_transferred.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_packet(&self) {
        self.packets_transferred.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discard(&self) {
        self.packets_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wrong_checksum(&self) {
        self.wrong_checksum.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retransmission(&self) {
        self.retransmissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate_ack(&self) {
        self.duplicate_acks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn data_transferred(&self) -> u64 {
        self.data_transferred.load(Ordering::Relaxed)
    }

    pub fn packets_transferred(&self) -> u64 {
        self.packets_transferred.load(Ordering::Relaxed)
    }

    pub fn packets_discarded(&self) -> u64 {
        self.packets_discarded.load(Ordering::Relaxed)
    }

    pub fn wrong_checksum(&self) -> u64 {
        self.wrong_checksum.load(Ordering::Relaxed)
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions.load(Ordering::Relaxed)
    }

    pub fn duplicate_acks(&self) -> u64 {
        self.duplicate_acks.load(Ordering::Relaxed)
    }
}

impl fmt::Display for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hr = "-".repeat(80);
        write!(
            f,
            "\n{hr}\n\
             Amount of Data transferred/received: {}\n\
             Number of packets sent/received: {}\n\
             Number of out-of-sequence packets discarded: {}\n\
             Number of packets discarded due to incorrect checksum: {}\n\
             Number of retransmissions: {}\n\
             Number of duplicate acknowledgements: {}\n{hr}",
            self.data_transferred(),
            self.packets_transferred(),
            self.packets_discarded(),
            self.wrong_checksum(),
            self.retransmissions(),
            self.duplicate_acks(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = Metrics::new();
        m.add_data(1000);
        m.add_data(234);
        m.record_packet();
        m.record_packet();
        m.record_discard();
        m.record_wrong_checksum();
        m.record_retransmission();
        m.record_duplicate_ack();

        assert_eq!(m.data_transferred(), 1234);
        assert_eq!(m.packets_transferred(), 2);
        assert_eq!(m.packets_discarded(), 1);
        assert_eq!(m.wrong_checksum(), 1);
        assert_eq!(m.retransmissions(), 1);
        assert_eq!(m.duplicate_acks(), 1);
    }

    #[test]
    fn test_summary_lists_all_counters() {
        let m = Metrics::new();
        m.add_data(10000);
        let out = m.to_string();
        assert!(out.contains("Amount of Data transferred/received: 10000"));
        assert!(out.contains("Number of duplicate acknowledgements: 0"));
    }
}
