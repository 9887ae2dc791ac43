//! 송신 엔진
//!
//! - 3-way 핸드쉐이크 (`connect`)
//! - 파일을 MTU 크기 세그먼트로 분할, 고정 윈도우(sws)로 in-flight 제한
//! - ACK 리스너 태스크가 누적 ACK으로 윈도우 전진 + RTT 샘플 공급
//! - 중복 ACK 3회 시 윈도우 선두 세그먼트 즉시 재전송
//! - FIN / ACK 대칭 종료 (`close`)
//!
//! 상태 전이: CLOSED → SYN_SENT → ESTABLISHED → FIN_SENT → CLOSED

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SendConfig;
use crate::metrics::Metrics;
use crate::retransmit::{RetransmitCtx, RetransmitTimer};
use crate::rtt::RttEstimator;
use crate::segment::{log_segment, now_nanos, SegFlag, Segment};
use crate::{Error, Result, HEADER_SIZE, MAX_RETRIES};

/// ACK 하나의 분류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckKind {
    /// 새 누적 ACK (윈도우 전진)
    Advanced,

    /// 직전과 같은 값의 중복 ACK
    Duplicate,

    /// 연속 3번째 중복 - fast retransmit 트리거 (카운터 리셋됨)
    FastRetransmit,
}

/// 연속 중복 ACK 카운터
///
/// 같은 값이 연속으로 반복될 때만 센다. 값이 바뀌면 리셋.
/// 3번째 중복에서 정확히 한 번 [`AckKind::FastRetransmit`]을 돌려주고
/// 카운터를 0으로 되돌린다.
struct DupAckCounter {
    last: u32,
    count: u32,
}

impl DupAckCounter {
    fn new() -> Self {
        Self { last: 0, count: 0 }
    }

    fn observe(&mut self, ack: u32) -> AckKind {
        if ack == self.last {
            self.count += 1;
            if self.count == 3 {
                self.count = 0;
                AckKind::FastRetransmit
            } else {
                AckKind::Duplicate
            }
        } else {
            self.last = ack;
            self.count = 0;
            AckKind::Advanced
        }
    }
}

/// in-flight 윈도우 엔트리
///
/// 세그먼트 자체는 재전송 태스크가 들고 있다. 엔트리는 기대 ACK 값과
/// 타이머 핸들, 윈도우 슬롯 permit만 소유하며, 엔트리를 버리면
/// permit이 반환되어 다음 청크가 들어온다.
struct InFlight {
    expected_ack: u32,
    timer: RetransmitTimer,
    _permit: Option<OwnedSemaphorePermit>,
}

/// 윈도우 상태 (단일 임계 구역)
///
/// "이 세그먼트 은퇴"와 "중복 ACK 카운트"가 항상 일관되도록
/// 하나의 뮤텍스가 지킨다.
struct WindowState {
    inflight: VecDeque<InFlight>,
    dup: DupAckCounter,
}

/// 송신자
pub struct Sender {
    config: SendConfig,
    socket: Arc<UdpSocket>,
    peer: SocketAddr,

    /// 연결 수립 시각 (로그 기준점)
    start: Instant,

    metrics: Arc<Metrics>,
    window: Arc<Mutex<WindowState>>,

    /// 윈도우 슬롯 (sws개 permit)
    slots: Arc<Semaphore>,

    /// 현재 재전송 타임아웃 (나노초)
    timeout_ns: Arc<AtomicU64>,

    /// 재시도 소진으로 연결이 죽었는지
    failed: Arc<AtomicBool>,

    /// 윈도우/종료 상태 변화 알림
    progress: Arc<Notify>,

    /// 피어의 FIN을 받고 ACK했는지
    peer_fin: Arc<AtomicBool>,

    /// 다음에 보낼 바이트 오프셋
    next_seq: AtomicU32,

    ack_task: JoinHandle<()>,
}

impl Sender {
    /// 연결 수립
    ///
    /// SYN(seq=0)을 보내고 SYN+ACK을 기다린다. 시도당
    /// `handshake_timeout_ms` 대기, 최대 16회. SYN+ACK의 에코된
    /// 타임스탬프로 RTT 추정기를 시드한다 (EDEV=0, 타임아웃 = 2·ERTT).
    pub async fn connect(config: SendConfig) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", config.port)).await?);
        let peer = config.remote;
        let metrics = Arc::new(Metrics::new());
        let start = Instant::now();

        let mut estimator = RttEstimator::new();

        let mut syn = Segment::new(0, 0);
        syn.set_flag(SegFlag::Syn, true);

        let mut buf = vec![0u8; config.mtu.max(HEADER_SIZE)];
        let wait = Duration::from_millis(config.handshake_timeout_ms);
        let mut syn_ack: Option<Segment> = None;

        for attempt in 0..MAX_RETRIES {
            syn.timestamp = now_nanos();
            let out = syn.encode();
            log_segment("snd", start, &syn);
            socket.send_to(&out, peer).await?;
            metrics.record_packet();
            if attempt > 0 {
                metrics.record_retransmission();
            }

            let deadline = tokio::time::Instant::now() + wait;
            while syn_ack.is_none() {
                let (len, addr) =
                    match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
                        Ok(Ok(recv)) => recv,
                        Ok(Err(e)) => return Err(Error::Io(e)),
                        Err(_) => {
                            warn!(attempt = attempt + 1, "SYN+ACK 타임아웃, 재시도");
                            break;
                        }
                    };
                if addr != peer {
                    debug!("무관한 주소의 데이터그램 무시: {}", addr);
                    continue;
                }
                if !Segment::checksum_ok(&buf[..len]) {
                    metrics.record_wrong_checksum();
                    continue;
                }
                let seg = match Segment::decode(&buf[..len]) {
                    Ok(seg) => seg,
                    Err(e) => {
                        debug!("디코드 실패 데이터그램 무시: {}", e);
                        continue;
                    }
                };
                log_segment("rcv", start, &seg);

                if seg.is_syn() && seg.is_ack() && seg.ack == 1 {
                    syn_ack = Some(seg);
                } else {
                    debug!(seq = seg.seq, "핸드쉐이크 중 예상 밖 세그먼트 무시");
                }
            }
            if syn_ack.is_some() {
                break;
            }
        }

        let syn_ack = syn_ack.ok_or(Error::HandshakeFailed {
            attempts: MAX_RETRIES,
        })?;

        estimator.seed(now_nanos().saturating_sub(syn_ack.timestamp));

        // 핸드쉐이크 마무리 ACK: 피어 논스 + 1, 타임스탬프는 에코
        let mut hs_ack = Segment::new(0, syn_ack.seq.wrapping_add(1));
        hs_ack.set_flag(SegFlag::Ack, true);
        hs_ack.timestamp = syn_ack.timestamp;
        log_segment("snd", start, &hs_ack);
        socket.send_to(&hs_ack.encode(), peer).await?;
        metrics.record_packet();

        info!(%peer, "연결 수립, 초기 타임아웃 {}ns", estimator.timeout_ns());

        let timeout_ns = Arc::new(AtomicU64::new(estimator.timeout_ns()));
        let estimator = Arc::new(Mutex::new(estimator));
        let window = Arc::new(Mutex::new(WindowState {
            inflight: VecDeque::with_capacity(config.sws),
            dup: DupAckCounter::new(),
        }));
        let failed = Arc::new(AtomicBool::new(false));
        let progress = Arc::new(Notify::new());
        let peer_fin = Arc::new(AtomicBool::new(false));

        let listener = AckListener {
            socket: socket.clone(),
            peer,
            start,
            mtu: config.mtu,
            metrics: metrics.clone(),
            window: window.clone(),
            timeout_ns: timeout_ns.clone(),
            estimator: estimator.clone(),
            progress: progress.clone(),
            peer_fin: peer_fin.clone(),
            hs_ack,
        };
        let ack_task = tokio::spawn(listener.run());

        Ok(Self {
            slots: Arc::new(Semaphore::new(config.sws)),
            config,
            socket,
            peer,
            start,
            metrics,
            window,
            timeout_ns,
            failed,
            progress,
            peer_fin,
            next_seq: AtomicU32::new(0),
            ack_task,
        })
    }

    /// 설정된 파일 전체를 전송하고 윈도우가 빌 때까지 기다린다
    pub async fn send_file(&self) -> Result<()> {
        let data = tokio::fs::read(&self.config.file_name).await?;
        // FIN이 시퀀스 하나를 더 쓰므로 u32::MAX - 1 바이트까지
        if data.len() as u64 >= u64::from(u32::MAX) {
            return Err(Error::FileTooLarge {
                len: data.len() as u64,
            });
        }

        let data = Bytes::from(data);
        let chunk = self.config.max_payload();
        let ctx = self.retransmit_ctx();
        let mut offset = 0usize;

        while offset < data.len() {
            let permit = self.acquire_slot().await?;

            let end = (offset + chunk).min(data.len());
            let mut seg = Segment::new(offset as u32, 0);
            seg.set_payload(data.slice(offset..end));

            self.metrics.add_data((end - offset) as u64);
            let timer = RetransmitTimer::spawn(ctx.clone(), seg);
            self.window.lock().inflight.push_back(InFlight {
                expected_ack: end as u32,
                timer,
                _permit: Some(permit),
            });

            offset = end;
        }

        self.next_seq.store(data.len() as u32, Ordering::Release);
        self.drain_window().await
    }

    /// FIN을 보내고 대칭 종료를 완료한다
    ///
    /// FIN도 일반 세그먼트처럼 재전송 타이머를 달고 윈도우에 들어가며
    /// `fin.seq + 1` ACK으로 은퇴한다. 피어의 FIN은 ACK 리스너가 받아
    /// ACK한다. 양쪽 다 끝나야 정상 종료.
    pub async fn close(self) -> Result<()> {
        let fin_seq = self.next_seq.load(Ordering::Acquire);
        let mut fin = Segment::new(fin_seq, 0);
        fin.set_flag(SegFlag::Fin, true);

        let timer = RetransmitTimer::spawn(self.retransmit_ctx(), fin);
        self.window.lock().inflight.push_back(InFlight {
            expected_ack: fin_seq.wrapping_add(1),
            timer,
            _permit: None,
        });

        let deadline = tokio::time::Instant::now()
            + Duration::from_millis(self.config.handshake_timeout_ms) * MAX_RETRIES;

        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.failed.load(Ordering::Acquire) {
                self.ack_task.abort();
                return Err(Error::TeardownFailed {
                    attempts: MAX_RETRIES,
                });
            }

            let fin_acked = self.window.lock().inflight.is_empty();
            if fin_acked && self.peer_fin.load(Ordering::Acquire) {
                break;
            }

            if tokio::time::Instant::now() >= deadline {
                if fin_acked {
                    // 피어 FIN이 오지 않았지만 우리 FIN은 확인됨
                    warn!("피어 FIN 미수신, 일방 종료");
                    break;
                }
                self.ack_task.abort();
                return Err(Error::TeardownFailed {
                    attempts: MAX_RETRIES,
                });
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }

        self.ack_task.abort();
        info!(peer = %self.peer, "연결 종료");
        Ok(())
    }

    /// 연결 메트릭
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    fn retransmit_ctx(&self) -> RetransmitCtx {
        RetransmitCtx {
            socket: self.socket.clone(),
            peer: self.peer,
            timeout_ns: self.timeout_ns.clone(),
            metrics: self.metrics.clone(),
            failed: self.failed.clone(),
            progress: self.progress.clone(),
            start: self.start,
        }
    }

    /// 윈도우 슬롯 획득. 연결 실패 시 즉시 에러.
    async fn acquire_slot(&self) -> Result<OwnedSemaphorePermit> {
        loop {
            if self.failed.load(Ordering::Acquire) {
                return Err(Error::RetriesExhausted);
            }

            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            tokio::select! {
                permit = self.slots.clone().acquire_owned() => {
                    return permit.map_err(|_| Error::NotConnected);
                }
                _ = &mut notified => {}
            }
        }
    }

    /// in-flight 윈도우가 전부 은퇴할 때까지 대기
    async fn drain_window(&self) -> Result<()> {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.failed.load(Ordering::Acquire) {
                return Err(Error::RetriesExhausted);
            }
            if self.window.lock().inflight.is_empty() {
                return Ok(());
            }

            notified.await;
        }
    }
}

/// 인바운드 세그먼트 처리 태스크
///
/// 연결당 하나. 소켓 읽기 경로를 전담하므로 인바운드 처리는 엔드포인트
/// 기준 전순서다.
struct AckListener {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    start: Instant,
    mtu: usize,
    metrics: Arc<Metrics>,
    window: Arc<Mutex<WindowState>>,
    timeout_ns: Arc<AtomicU64>,
    estimator: Arc<Mutex<RttEstimator>>,
    progress: Arc<Notify>,
    peer_fin: Arc<AtomicBool>,

    /// 핸드쉐이크 마무리 ACK (SYN+ACK 재수신 시 다시 보냄)
    hs_ack: Segment,
}

impl AckListener {
    async fn run(self) {
        let mut buf = vec![0u8; self.mtu.max(HEADER_SIZE)];

        loop {
            let (len, addr) = match self.socket.recv_from(&mut buf).await {
                Ok(recv) => recv,
                Err(e) => {
                    warn!("수신 에러: {}", e);
                    continue;
                }
            };
            if addr != self.peer {
                debug!("무관한 주소의 데이터그램 무시: {}", addr);
                continue;
            }
            if !Segment::checksum_ok(&buf[..len]) {
                self.metrics.record_wrong_checksum();
                continue;
            }
            let seg = match Segment::decode(&buf[..len]) {
                Ok(seg) => seg,
                Err(e) => {
                    debug!("디코드 실패 데이터그램 무시: {}", e);
                    continue;
                }
            };
            log_segment("rcv", self.start, &seg);

            if seg.is_syn() {
                // 마무리 ACK이 유실되어 피어가 SYN+ACK을 재전송한 경우
                if let Err(e) = self.resend_handshake_ack(&seg).await {
                    warn!("핸드쉐이크 ACK 재전송 실패: {}", e);
                }
                continue;
            }

            if seg.is_ack() {
                self.handle_ack(&seg);
            }

            if seg.is_fin() {
                if let Err(e) = self.ack_peer_fin(&seg).await {
                    warn!("피어 FIN ACK 송신 실패: {}", e);
                }
            }
        }
    }

    /// 누적 ACK 처리: RTT 샘플, 윈도우 은퇴, 중복 ACK 감지
    fn handle_ack(&self, seg: &Segment) {
        let srtt = now_nanos().saturating_sub(seg.timestamp);
        let new_timeout = self.estimator.lock().sample(srtt);
        self.timeout_ns.store(new_timeout, Ordering::Relaxed);

        let mut state = self.window.lock();

        // 누적 은퇴는 중복 여부와 무관하게 항상 수행한다. ACK 하나가
        // 여러 세그먼트를 덮을 수 있고, 엔트리가 윈도우에 들어가기 전에
        // 해당 ACK이 먼저 도착했다가 재전송으로 같은 값이 반복되는
        // 경우도 덮어야 한다.
        while let Some(entry) = state.inflight.front() {
            if entry.expected_ack > seg.ack {
                break;
            }
            let entry = state.inflight.pop_front().unwrap();
            entry.timer.cancel();
        }

        match state.dup.observe(seg.ack) {
            AckKind::Advanced => {}
            AckKind::Duplicate => {
                self.metrics.record_duplicate_ack();
            }
            AckKind::FastRetransmit => {
                self.metrics.record_duplicate_ack();
                if let Some(head) = state.inflight.front() {
                    head.timer.fast_retransmit();
                }
            }
        }
        drop(state);

        self.progress.notify_waiters();
    }

    async fn resend_handshake_ack(&self, syn_ack: &Segment) -> Result<()> {
        let mut hs_ack = self.hs_ack.clone();
        hs_ack.timestamp = syn_ack.timestamp;
        log_segment("snd", self.start, &hs_ack);
        self.socket.send_to(&hs_ack.encode(), self.peer).await?;
        self.metrics.record_packet();
        Ok(())
    }

    /// 피어 FIN에 ACK (fin.seq + 1, 타임스탬프 에코)
    async fn ack_peer_fin(&self, fin: &Segment) -> Result<()> {
        let mut ack = Segment::new(0, fin.seq.wrapping_add(1));
        ack.set_flag(SegFlag::Ack, true);
        ack.timestamp = fin.timestamp;
        log_segment("snd", self.start, &ack);
        self.socket.send_to(&ack.encode(), self.peer).await?;
        self.metrics.record_packet();

        self.peer_fin.store(true, Ordering::Release);
        self.progress.notify_waiters();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_triple_duplicate_fires_once_and_resets() {
        let mut dup = DupAckCounter::new();

        assert_eq!(dup.observe(1000), AckKind::Advanced);
        assert_eq!(dup.observe(1000), AckKind::Duplicate);
        assert_eq!(dup.observe(1000), AckKind::Duplicate);
        assert_eq!(dup.observe(1000), AckKind::FastRetransmit);

        // 리셋 후 같은 값은 다시 3회 연속이어야 트리거
        assert_eq!(dup.observe(1000), AckKind::Duplicate);
        assert_eq!(dup.observe(1000), AckKind::Duplicate);
        assert_eq!(dup.observe(1000), AckKind::FastRetransmit);
    }

    #[test]
    fn test_new_ack_resets_counter() {
        let mut dup = DupAckCounter::new();

        dup.observe(1000);
        assert_eq!(dup.observe(1000), AckKind::Duplicate);
        assert_eq!(dup.observe(1000), AckKind::Duplicate);

        // 값이 바뀌면 연속성이 끊긴다
        assert_eq!(dup.observe(2000), AckKind::Advanced);
        assert_eq!(dup.observe(2000), AckKind::Duplicate);
        assert_eq!(dup.observe(2000), AckKind::Duplicate);
        assert_eq!(dup.observe(2000), AckKind::FastRetransmit);
    }

    #[test]
    fn test_initial_zero_ack_counts_as_duplicate() {
        // 수신측 nextByte 초기값이 0이므로 첫 세그먼트 유실 시
        // ACK 0이 반복 수신된다. 초기 상태는 last=0이라 바로 중복.
        let mut dup = DupAckCounter::new();
        assert_eq!(dup.observe(0), AckKind::Duplicate);
        assert_eq!(dup.observe(0), AckKind::Duplicate);
        assert_eq!(dup.observe(0), AckKind::FastRetransmit);
    }
}
