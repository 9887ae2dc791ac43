//! 수신 엔진
//!
//! - 핸드쉐이크 응답자 (`accept`): SYN 대기, SYN+ACK 재시도
//! - 순서 일치 세그먼트만 수락, 바운드 큐로 쓰기 워커에 전달 (`start`)
//! - 순서 불일치/큐 포화 세그먼트는 버리고 이전 누적 ACK 재전송
//! - FIN 응답 후 자신의 FIN 교환 (`close`)
//!
//! 상태 전이: CLOSED → LISTEN → SYN_RCVD → ESTABLISHED → CLOSE_WAIT → CLOSED
//!
//! 쓰기 워커는 수신 루프와 바운드 큐로만 연결된다. 수신 루프의 enqueue는
//! 논블로킹이라 디스크 지연이 ACK 경로를 막지 않는다. 큐가 가득 차면
//! 순서가 맞는 세그먼트도 버려진다 - 송신자 재전송이 복구하는,
//! 의도된 역압 동작이다.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use crate::config::RecvConfig;
use crate::metrics::Metrics;
use crate::rtt::RttEstimator;
use crate::segment::{log_segment, now_nanos, SegFlag, Segment};
use crate::{Error, Result, HEADER_SIZE, MAX_RETRIES};

/// 세그먼트 수락 판정
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    /// 순서 일치 + 큐 수용: nextByte 전진
    Accepted,

    /// 시퀀스가 nextByte와 다름
    OutOfOrder,

    /// 순서는 맞지만 쓰기 큐 포화 (역압 드롭)
    QueueFull,
}

/// 순서 일치 수락 판정
///
/// `seq == next_byte`이고 큐가 받아줄 때만 nextByte가 페이로드 길이만큼
/// 전진한다. 큐가 닫혀 있으면 쓰기 워커가 죽은 것이므로 치명적이다.
fn admit(
    next_byte: u32,
    seq: u32,
    payload: Bytes,
    queue: &mpsc::Sender<Bytes>,
) -> Result<(u32, Admission)> {
    if seq != next_byte {
        return Ok((next_byte, Admission::OutOfOrder));
    }

    let len = payload.len() as u32;
    match queue.try_send(payload) {
        Ok(()) => Ok((next_byte.wrapping_add(len), Admission::Accepted)),
        Err(mpsc::error::TrySendError::Full(_)) => Ok((next_byte, Admission::QueueFull)),
        Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::WorkerGone),
    }
}

/// 쓰기 워커: 큐를 비우며 순서대로 파일에 기록
///
/// 큐가 닫히면 (수신 루프 종료) flush 후 정상 반환. 연결 중의
/// I/O 에러는 그대로 전파된다.
async fn write_worker(path: PathBuf, mut queue: mpsc::Receiver<Bytes>) -> Result<()> {
    let mut file = tokio::fs::File::create(&path).await?;

    while let Some(chunk) = queue.recv().await {
        file.write_all(&chunk).await?;
    }

    file.flush().await?;
    Ok(())
}

/// 수신자
pub struct Receiver {
    config: RecvConfig,
    socket: UdpSocket,
    metrics: Arc<Metrics>,
    estimator: RttEstimator,

    /// 다음 기대 바이트 오프셋 (누적 ACK 값)
    next_byte: u32,

    /// 연결된 피어 (accept 이후)
    peer: Option<SocketAddr>,

    /// 연결 수립 시각 (로그 기준점)
    start: Instant,

    worker: Option<JoinHandle<Result<()>>>,
}

impl Receiver {
    /// 포트 바인드 (LISTEN 준비)
    pub async fn bind(config: RecvConfig) -> Result<Self> {
        config.validate()?;
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).await?;
        info!("수신 대기: {}", socket.local_addr()?);

        Ok(Self {
            config,
            socket,
            metrics: Arc::new(Metrics::new()),
            estimator: RttEstimator::new(),
            next_byte: 0,
            peer: None,
            start: Instant::now(),
            worker: None,
        })
    }

    /// 실제 바인드된 주소
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 연결 메트릭
    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// 핸드쉐이크 응답
    ///
    /// SYN을 무기한 기다린 뒤 SYN+ACK(seq=0, ack=SYN.seq+1)을 최대
    /// 16회 재시도한다. SYN+ACK은 SYN의 타임스탬프를 에코해서 송신자가
    /// 핸드쉐이크 RTT를 시드할 수 있게 한다. 수신측 추정기는 SYN+ACK
    /// 송신과 마무리 ACK 도착 사이를 로컬 시계로 재서 시드한다
    /// (에코된 값은 피어 시계라 못 쓴다).
    pub async fn accept(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.config.mtu.max(HEADER_SIZE)];

        // LISTEN: SYN 대기
        let (syn, peer) = loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
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
            if seg.is_syn() && !seg.is_ack() {
                break (seg, addr);
            }
            warn!(seq = seg.seq, "LISTEN 중 예상 밖 세그먼트 무시");
        };

        self.start = Instant::now();
        self.peer = Some(peer);
        log_segment("rcv", self.start, &syn);
        self.metrics.record_packet();

        // SYN_RCVD: SYN+ACK 재시도
        let mut syn_ack = Segment::new(0, syn.seq.wrapping_add(1));
        syn_ack.set_flag(SegFlag::Syn, true);
        syn_ack.set_flag(SegFlag::Ack, true);
        let mut echo_ts = syn.timestamp;

        let wait = std::time::Duration::from_millis(self.config.handshake_timeout_ms);

        for attempt in 0..MAX_RETRIES {
            syn_ack.timestamp = echo_ts;
            let sent_at = Instant::now();
            log_segment("snd", self.start, &syn_ack);
            self.socket.send_to(&syn_ack.encode(), peer).await?;
            if attempt > 0 {
                self.metrics.record_retransmission();
            }

            let deadline = tokio::time::Instant::now() + wait;
            loop {
                let (len, addr) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await
                {
                    Ok(Ok(recv)) => recv,
                    Ok(Err(e)) => return Err(Error::Io(e)),
                    Err(_) => {
                        warn!(attempt = attempt + 1, "핸드쉐이크 ACK 타임아웃, 재시도");
                        break;
                    }
                };
                if addr != peer {
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
                self.metrics.record_packet();

                if seg.is_ack() && !seg.is_syn() && !seg.is_fin() && seg.ack == 1 {
                    self.estimator
                        .seed(sent_at.elapsed().as_nanos() as u64);
                    info!(%peer, "연결 수립");
                    return Ok(());
                }
                if seg.is_syn() {
                    // SYN 재전송: 더 새 타임스탬프를 에코 대상으로
                    echo_ts = seg.timestamp;
                    continue;
                }
                debug!(seq = seg.seq, "SYN_RCVD 중 예상 밖 세그먼트 무시");
            }
        }

        Err(Error::HandshakeFailed {
            attempts: MAX_RETRIES,
        })
    }

    /// 수신 루프: 피어의 FIN이 올 때까지 데이터 수락
    ///
    /// 유효한(체크섬 통과) 세그먼트마다 현재 nextByte로 ACK을 보낸다.
    /// 수락 여부와 무관하다 - 드롭된 세그먼트에 대한 이전 값 ACK이
    /// 송신자에게 중복 ACK 신호이자 역압이다.
    pub async fn start(&mut self) -> Result<()> {
        let peer = self.peer.ok_or(Error::NotConnected)?;

        let (queue_tx, queue_rx) = mpsc::channel(self.config.sws);
        self.worker = Some(tokio::spawn(write_worker(
            self.config.file_name.clone(),
            queue_rx,
        )));

        let mut buf = vec![0u8; self.config.mtu.max(HEADER_SIZE)];

        loop {
            let (len, addr) = self.socket.recv_from(&mut buf).await?;
            if addr != peer {
                debug!("무관한 주소의 데이터그램 무시: {}", addr);
                continue;
            }
            if !Segment::checksum_ok(&buf[..len]) {
                // 수신된 적 없는 것으로 취급: ACK 없이 송신자 타임아웃에 맡긴다
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
            self.metrics.record_packet();

            if seg.is_syn() {
                warn!(seq = seg.seq, "Unexpected SYN packet");
                continue;
            }

            if seg.is_fin() {
                // CLOSE_WAIT: FIN ACK 후 루프 종료, close()가 마무리
                self.send_ack(seg.seq.wrapping_add(1), seg.timestamp, peer)
                    .await?;
                return Ok(());
            }

            if seg.payload.is_empty() {
                // 중복 핸드쉐이크 마무리 ACK 등
                debug!(ack = seg.ack, "페이로드 없는 세그먼트 무시");
                continue;
            }

            match admit(self.next_byte, seg.seq, seg.payload.clone(), &queue_tx) {
                Ok((next, Admission::Accepted)) => {
                    self.metrics.add_data(u64::from(next - self.next_byte));
                    self.next_byte = next;
                }
                Ok((_, Admission::OutOfOrder)) | Ok((_, Admission::QueueFull)) => {
                    self.metrics.record_discard();
                }
                Err(e) => {
                    // 쓰기 워커 사망: 실제 I/O 에러를 살려서 보고
                    if let Some(worker) = self.worker.take() {
                        if let Ok(Err(io)) = worker.await {
                            return Err(io);
                        }
                    }
                    return Err(e);
                }
            }

            self.send_ack(self.next_byte, seg.timestamp, peer).await?;
        }
    }

    /// 종료: 쓰기 워커 플러시 후 자신의 FIN 교환
    ///
    /// FIN(seq=1)을 추정기 타임아웃 간격으로 최대 16회 재시도하며
    /// ack=2를 기다린다. 그 사이 재전송된 피어 FIN은 다시 ACK한다.
    pub async fn close(mut self) -> Result<()> {
        // start 반환으로 큐 송신단이 닫혔으므로 워커는 flush 후 끝난다
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(result) => result?,
                Err(_) => return Err(Error::WorkerGone),
            }
        }

        let peer = self.peer.ok_or(Error::NotConnected)?;
        let fin_seq = 1u32;
        let expected_ack = fin_seq.wrapping_add(1);

        let mut fin = Segment::new(fin_seq, 0);
        fin.set_flag(SegFlag::Fin, true);

        let mut buf = vec![0u8; self.config.mtu.max(HEADER_SIZE)];

        for attempt in 0..MAX_RETRIES {
            fin.timestamp = now_nanos();
            log_segment("snd", self.start, &fin);
            self.socket.send_to(&fin.encode(), peer).await?;
            if attempt > 0 {
                self.metrics.record_retransmission();
            }

            let deadline = tokio::time::Instant::now() + self.estimator.armed_timeout();
            loop {
                let (len, addr) = match timeout_at(deadline, self.socket.recv_from(&mut buf)).await
                {
                    Ok(Ok(recv)) => recv,
                    Ok(Err(e)) => return Err(Error::Io(e)),
                    Err(_) => break,
                };
                if addr != peer {
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
                self.metrics.record_packet();

                if seg.is_ack() && seg.ack == expected_ack {
                    info!(%peer, "연결 종료");
                    return Ok(());
                }
                if seg.is_fin() {
                    // FIN ACK이 유실되어 피어가 FIN을 재전송한 경우
                    self.send_ack(seg.seq.wrapping_add(1), seg.timestamp, peer)
                        .await?;
                }
            }
        }

        Err(Error::TeardownFailed {
            attempts: MAX_RETRIES,
        })
    }

    /// 현재 누적 값으로 ACK 송신 (피어 타임스탬프 에코)
    async fn send_ack(&self, ack: u32, echo_ts: u64, peer: SocketAddr) -> Result<()> {
        let mut seg = Segment::new(0, ack);
        seg.set_flag(SegFlag::Ack, true);
        seg.timestamp = echo_ts;
        log_segment("snd", self.start, &seg);
        self.socket.send_to(&seg.encode(), peer).await?;
        Ok(())
    }
}
