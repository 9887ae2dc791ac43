//! TCPend 송신자 - 파일을 수신자에게 신뢰성 있게 전송
//!
//! UDP 위 미니 TCP: 3-way 핸드쉐이크, 누적 ACK, 슬라이딩 윈도우,
//! 적응형 재전송, fast retransmit, FIN 대칭 종료.
//!
//! 사용법:
//!   cargo run --release --bin tcpend-sender -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin tcpend-sender -- -s 127.0.0.1 -a 9000 -f input.bin
//!   cargo run --release --bin tcpend-sender -- -s 192.168.1.10 -a 9000 -f big.iso -m 1024 -c 5

use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tcpend::{Error, Metrics, SendConfig, Sender, DEFAULT_MTU, DEFAULT_SWS};

fn parse_args() -> SendConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut port: u16 = 0;
    let mut host = String::from("127.0.0.1");
    let mut remote_port: u16 = 9000;
    let mut file_name = PathBuf::new();
    let mut mtu = DEFAULT_MTU;
    let mut sws = DEFAULT_SWS;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-p" => {
                if i + 1 < args.len() {
                    port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "-s" => {
                if i + 1 < args.len() {
                    host = args[i + 1].clone();
                    i += 1;
                }
            }
            "-a" => {
                if i + 1 < args.len() {
                    remote_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "-f" => {
                if i + 1 < args.len() {
                    file_name = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "-m" => {
                if i + 1 < args.len() {
                    mtu = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "-c" => {
                if i + 1 < args.len() {
                    sws = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"TCPend Sender - UDP 위 신뢰성 파일 전송 (송신측)

사용법:
  cargo run --release --bin tcpend-sender -- [OPTIONS]

옵션:
  -p <PORT>    로컬 바인드 포트 (기본: 0 = 자동 할당)
  -s <HOST>    수신자 호스트 (기본: 127.0.0.1)
  -a <PORT>    수신자 포트 (기본: 9000)
  -f <PATH>    전송할 파일 (필수)
  -m <MTU>     세그먼트 최대 크기, 헤더 포함 (기본: 1500)
  -c <SWS>     송신 윈도우 크기 (기본: 8)
  -h, --help   이 도움말 출력

예시:
  cargo run --release --bin tcpend-sender -- -s 127.0.0.1 -a 9000 -f input.bin
  cargo run --release --bin tcpend-sender -- -s 192.168.1.10 -a 9000 -f big.iso -m 1024 -c 5
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    if file_name.as_os_str().is_empty() {
        eprintln!("-f <PATH> 필수 (--help 참고)");
        std::process::exit(2);
    }

    let remote = (host.as_str(), remote_port)
        .to_socket_addrs()
        .expect("호스트 해석 실패")
        .next()
        .expect("호스트 해석 실패");

    SendConfig {
        port,
        remote,
        file_name,
        mtu,
        sws,
        ..Default::default()
    }
}

async fn run(config: SendConfig) -> Result<Arc<Metrics>, (Error, Option<Arc<Metrics>>)> {
    let sender = Sender::connect(config).await.map_err(|e| (e, None))?;
    let metrics = sender.metrics();

    if let Err(e) = sender.send_file().await {
        return Err((e, Some(metrics)));
    }
    if let Err(e) = sender.close().await {
        return Err((e, Some(metrics)));
    }

    Ok(metrics)
}

#[tokio::main]
async fn main() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = parse_args();

    match run(config).await {
        Ok(metrics) => println!("{}", metrics),
        Err((e, metrics)) => {
            eprintln!("전송 실패: {}", e);
            if let Some(metrics) = metrics {
                println!("{}", metrics);
            }
            std::process::exit(1);
        }
    }
}
