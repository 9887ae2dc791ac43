//! 세그먼트별 재전송 타이머
//!
//! 미확인 세그먼트마다 독립적인 주기 태스크 하나가 붙는다. 태스크는
//! 현재 타임아웃 간격으로 같은 세그먼트를 다시 보내고, 누적 ACK이
//! 세그먼트를 덮으면 정확히 한 번 취소된다. 재시도 한도(16회)를
//! 소진하면 연결 실패 플래그를 세운다.
//!
//! Fast retransmit은 주기 바깥에서 태스크를 찔러(poke) 즉시 한 번
//! 더 보내게 한다.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::warn;

use crate::metrics::Metrics;
use crate::rtt::MIN_TIMEOUT_NS;
use crate::segment::{log_segment, now_nanos, Segment};
use crate::MAX_RETRIES;

/// 타이머 태스크들이 공유하는 전송 문맥
#[derive(Clone)]
pub struct RetransmitCtx {
    /// 송신 소켓
    pub socket: Arc<UdpSocket>,

    /// 피어 주소
    pub peer: SocketAddr,

    /// 현재 재전송 타임아웃 (나노초, ACK 경로가 갱신)
    pub timeout_ns: Arc<AtomicU64>,

    /// 연결 메트릭
    pub metrics: Arc<Metrics>,

    /// 재시도 소진 시 세워지는 연결 실패 플래그
    pub failed: Arc<AtomicBool>,

    /// 윈도우 상태 변화 알림 (실패 포함)
    pub progress: Arc<Notify>,

    /// 연결 수립 시각 (로그 기준점)
    pub start: Instant,
}

/// 실행 중인 재전송 타이머 핸들
///
/// `cancel`은 멱등: 이미 취소됐거나 소진된 타이머에 다시 호출해도
/// 아무 일도 하지 않는다.
pub struct RetransmitTimer {
    cancelled: Arc<AtomicBool>,
    poke: Arc<Notify>,
}

impl RetransmitTimer {
    /// 타이머 스폰. 첫 전송은 즉시 일어난다.
    pub fn spawn(ctx: RetransmitCtx, mut segment: Segment) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let poke = Arc::new(Notify::new());

        let task_cancelled = cancelled.clone();
        let task_poke = poke.clone();

        tokio::spawn(async move {
            let mut attempts: u32 = 0;

            loop {
                if task_cancelled.load(Ordering::Acquire) {
                    return;
                }

                if attempts >= MAX_RETRIES {
                    warn!(
                        seq = segment.seq,
                        attempts, "재전송 한도 소진, 연결 실패 처리"
                    );
                    ctx.failed.store(true, Ordering::Release);
                    ctx.progress.notify_waiters();
                    return;
                }

                // 매 물리 전송마다 타임스탬프를 다시 찍는다. 재전송된
                // 세그먼트의 ACK은 "마지막 전송 기준" RTT 샘플이 된다
                // (Karn 알고리즘 미적용, 원 프로토콜의 알려진 근사).
                segment.timestamp = now_nanos();
                let buf = segment.encode();
                log_segment("snd", ctx.start, &segment);

                if let Err(e) = ctx.socket.send_to(&buf, ctx.peer).await {
                    warn!(seq = segment.seq, "세그먼트 송신 실패: {}", e);
                    ctx.failed.store(true, Ordering::Release);
                    ctx.progress.notify_waiters();
                    return;
                }

                attempts += 1;
                ctx.metrics.record_packet();
                if attempts > 1 {
                    ctx.metrics.record_retransmission();
                }

                let wait =
                    Duration::from_nanos(ctx.timeout_ns.load(Ordering::Relaxed).max(MIN_TIMEOUT_NS));

                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = task_poke.notified() => {}
                }
            }
        });

        Self { cancelled, poke }
    }

    /// 타이머 취소 (ACK 수신 시). 멱등.
    pub fn cancel(&self) {
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.poke.notify_one();
        }
    }

    /// 주기를 기다리지 않고 즉시 한 번 재전송 (fast retransmit)
    pub fn fast_retransmit(&self) {
        self.poke.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    async fn test_ctx(timeout_ns: u64) -> (RetransmitCtx, UdpSocket) {
        let sink = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let ctx = RetransmitCtx {
            socket,
            peer: sink.local_addr().unwrap(),
            timeout_ns: Arc::new(AtomicU64::new(timeout_ns)),
            metrics: Arc::new(Metrics::new()),
            failed: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(Notify::new()),
            start: Instant::now(),
        };
        (ctx, sink)
    }

    async fn drain(sink: &UdpSocket, window: Duration) -> usize {
        let mut buf = [0u8; 2048];
        let mut count = 0;
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Ok(_)) =
            tokio::time::timeout_at(deadline, sink.recv_from(&mut buf)).await
        {
            count += 1;
        }
        count
    }

    fn data_segment() -> Segment {
        let mut seg = Segment::new(0, 1);
        seg.set_payload(Bytes::from_static(b"payload"));
        seg
    }

    #[tokio::test]
    async fn test_cancel_stops_resends() {
        let (ctx, sink) = test_ctx(MIN_TIMEOUT_NS).await;
        let timer = RetransmitTimer::spawn(ctx, data_segment());

        // 첫 전송 직후 취소 (두 번 호출해도 무해)
        tokio::time::sleep(Duration::from_millis(2)).await;
        timer.cancel();
        timer.cancel();

        let count = drain(&sink, Duration::from_millis(60)).await;
        assert_eq!(count, 1, "취소 후에는 재전송이 없어야 함");
    }

    #[tokio::test]
    async fn test_exhaustion_marks_connection_failed() {
        let (ctx, sink) = test_ctx(1).await; // 하한 10ms로 클램프됨
        let failed = ctx.failed.clone();
        let metrics = ctx.metrics.clone();
        let _timer = RetransmitTimer::spawn(ctx, data_segment());

        let count = drain(&sink, Duration::from_millis(400)).await;

        assert_eq!(count as u32, MAX_RETRIES);
        assert!(failed.load(Ordering::Acquire));
        assert_eq!(metrics.retransmissions(), u64::from(MAX_RETRIES) - 1);
    }

    #[tokio::test]
    async fn test_fast_retransmit_is_immediate() {
        // 주기 1초: poke 없이는 두 번째 전송이 일어나지 않는 시간 안에 확인
        let (ctx, sink) = test_ctx(1_000_000_000).await;
        let timer = RetransmitTimer::spawn(ctx, data_segment());

        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.fast_retransmit();

        let count = drain(&sink, Duration::from_millis(80)).await;
        timer.cancel();
        assert_eq!(count, 2, "poke는 주기 바깥의 즉시 재전송이어야 함");
    }
}
