//! TCPend 수신자 - 연결 하나를 받아 파일로 저장
//!
//! SYN을 기다려 핸드쉐이크에 응답하고, 순서가 맞는 세그먼트만 수락해
//! 쓰기 워커 큐로 넘긴다. 전송이 끝나면 FIN 교환 후 메트릭을 출력한다.
//!
//! 사용법:
//!   cargo run --release --bin tcpend-receiver -- [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin tcpend-receiver -- -p 9000 -f received.bin
//!   cargo run --release --bin tcpend-receiver -- -p 9000 -f out.bin -m 1024 -c 5

use std::path::PathBuf;
use std::sync::Arc;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tcpend::{Error, Metrics, Receiver, RecvConfig, DEFAULT_MTU, DEFAULT_SWS};

fn parse_args() -> RecvConfig {
    let args: Vec<String> = std::env::args().collect();

    let mut port: u16 = 9000;
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
                    r#"TCPend Receiver - UDP 위 신뢰성 파일 전송 (수신측)

사용법:
  cargo run --release --bin tcpend-receiver -- [OPTIONS]

옵션:
  -p <PORT>    바인드 포트 (기본: 9000)
  -f <PATH>    출력 파일 (필수)
  -m <MTU>     세그먼트 최대 크기, 헤더 포함 (기본: 1500)
  -c <SWS>     쓰기 큐 크기 = 송신 윈도우 크기 (기본: 8)
  -h, --help   이 도움말 출력

예시:
  cargo run --release --bin tcpend-receiver -- -p 9000 -f received.bin
  cargo run --release --bin tcpend-receiver -- -p 9000 -f out.bin -m 1024 -c 5
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

    RecvConfig {
        port,
        mtu,
        sws,
        file_name,
        ..Default::default()
    }
}

async fn run(config: RecvConfig) -> Result<Arc<Metrics>, (Error, Option<Arc<Metrics>>)> {
    let mut receiver = Receiver::bind(config).await.map_err(|e| (e, None))?;
    let metrics = receiver.metrics();

    if let Err(e) = receiver.accept().await {
        return Err((e, Some(metrics)));
    }
    if let Err(e) = receiver.start().await {
        return Err((e, Some(metrics)));
    }
    if let Err(e) = receiver.close().await {
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
            eprintln!("수신 실패: {}", e);
            if let Some(metrics) = metrics {
                println!("{}", metrics);
            }
            std::process::exit(1);
        }
    }
}
