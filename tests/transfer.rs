//! 루프백 종단 간 전송 테스트
//!
//! 실제 UDP 소켓으로 송신자와 수신자를 붙여 파일 전송 전체 경로를
//! 검증한다. 손실 링크는 중간 릴레이 소켓이 데이터 세그먼트의 첫
//! 전송을 골라 버리는 방식으로 흉내낸다.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use tempfile::tempdir;
use tokio::net::UdpSocket;

use tcpend::{Error, Receiver, RecvConfig, Segment, SendConfig, Sender};

fn recv_config(port: u16, file: std::path::PathBuf) -> RecvConfig {
    RecvConfig {
        port,
        mtu: 1024,
        sws: 5,
        file_name: file,
        handshake_timeout_ms: 500,
    }
}

fn send_config(remote: SocketAddr, file: std::path::PathBuf) -> SendConfig {
    SendConfig {
        port: 0,
        remote,
        file_name: file,
        mtu: 1024,
        sws: 5,
        handshake_timeout_ms: 500,
    }
}

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn test_clean_transfer_10000_bytes() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");

    let data = patterned(10_000);
    std::fs::write(&input, &data).unwrap();

    let mut receiver = Receiver::bind(recv_config(0, output.clone())).await.unwrap();
    let port = receiver.local_addr().unwrap().port();
    let recv_metrics = receiver.metrics();

    let recv_task = tokio::spawn(async move {
        receiver.accept().await?;
        receiver.start().await?;
        receiver.close().await
    });

    let remote: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let sender = Sender::connect(send_config(remote, input)).await.unwrap();
    let send_metrics = sender.metrics();

    sender.send_file().await.unwrap();
    sender.close().await.unwrap();
    recv_task.await.unwrap().unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), data);

    // MTU 1024 → 페이로드 1000 → 데이터 세그먼트 정확히 10개
    assert_eq!(send_metrics.data_transferred(), 10_000);
    assert_eq!(recv_metrics.data_transferred(), 10_000);
    // SYN + 핸드쉐이크 ACK + 데이터 10 + FIN + 피어 FIN ACK
    assert!(send_metrics.packets_transferred() >= 14);
}

/// 릴레이: 데이터 세그먼트마다 첫 전송을 버리고 재전송만 통과시킨다
async fn lossy_relay(relay: UdpSocket, receiver_addr: SocketAddr) {
    let mut sender_addr: Option<SocketAddr> = None;
    let mut dropped: HashSet<u32> = HashSet::new();
    let mut buf = vec![0u8; 2048];

    loop {
        let (len, from) = match relay.recv_from(&mut buf).await {
            Ok(recv) => recv,
            Err(_) => return,
        };

        if from != receiver_addr {
            sender_addr = Some(from);
            if let Ok(seg) = Segment::decode(&buf[..len]) {
                if !seg.payload.is_empty() && dropped.insert(seg.seq) {
                    continue;
                }
            }
        }

        let to = if from == receiver_addr {
            match sender_addr {
                Some(addr) => addr,
                None => continue,
            }
        } else {
            receiver_addr
        };
        if relay.send_to(&buf[..len], to).await.is_err() {
            return;
        }
    }
}

#[tokio::test]
async fn test_lossy_link_recovers_by_retransmission() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.bin");
    let output = dir.path().join("output.bin");

    let data = patterned(10_000);
    std::fs::write(&input, &data).unwrap();

    let mut receiver = Receiver::bind(recv_config(0, output.clone())).await.unwrap();
    let receiver_addr: SocketAddr = format!("127.0.0.1:{}", receiver.local_addr().unwrap().port())
        .parse()
        .unwrap();

    let relay = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let relay_addr = relay.local_addr().unwrap();
    tokio::spawn(lossy_relay(relay, receiver_addr));

    let recv_task = tokio::spawn(async move {
        receiver.accept().await?;
        receiver.start().await?;
        receiver.close().await
    });

    let sender = Sender::connect(send_config(relay_addr, input)).await.unwrap();
    let send_metrics = sender.metrics();

    sender.send_file().await.unwrap();
    sender.close().await.unwrap();
    recv_task.await.unwrap().unwrap();

    assert_eq!(std::fs::read(&output).unwrap(), data);
    // 데이터 10개의 첫 전송이 전부 버려졌으므로 전부 재전송됨
    assert!(send_metrics.retransmissions() >= 10);
}

#[tokio::test]
async fn test_handshake_exhaustion_is_fatal_before_data() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("input.bin");
    std::fs::write(&input, patterned(1000)).unwrap();

    // 응답하지 않는 피어
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote = silent.local_addr().unwrap();

    let mut config = send_config(remote, input);
    config.handshake_timeout_ms = 20;

    let result = Sender::connect(config).await;
    assert!(matches!(result, Err(Error::HandshakeFailed { attempts: 16 })));

    // 도착한 데이터그램은 전부 SYN이어야 하고 데이터는 없어야 한다
    let mut buf = vec![0u8; 2048];
    let mut syn_count = 0;
    while let Ok(Ok((len, _))) =
        tokio::time::timeout(Duration::from_millis(50), silent.recv_from(&mut buf)).await
    {
        let seg = Segment::decode(&buf[..len]).unwrap();
        assert!(seg.is_syn());
        assert!(seg.payload.is_empty());
        syn_count += 1;
    }
    assert_eq!(syn_count, 16);
}
