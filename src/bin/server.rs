//! Chanmux 에코 서버
//!
//! 채널 다중화 계층 위에서 받은 ECHO 메시지를 같은 채널로 되돌려 보낸다.
//!
//! 사용법:
//!   cargo run --release --bin chanmux-server -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행
//!   cargo run --release --bin chanmux-server -- --bind 0.0.0.0:9000
//!
//!   # 저지연 (배칭 없음)
//!   cargo run --release --bin chanmux-server -- --preset low-latency

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chanmux::{Config, Host, HostEvent, MessageType, UdpTransport};

/// 클라이언트가 보내는 에코 요청
const ECHO: MessageType = 1;

/// 서버 응답
const ECHO_REPLY: MessageType = 2;

/// 서버 설정
struct ServerConfig {
    bind_addr: SocketAddr,
    tick: Duration,
    report_interval: Duration,
    verbose: bool,
    config: Config,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 9000)),
            tick: Duration::from_millis(5),
            report_interval: Duration::from_secs(5),
            verbose: false,
            config: Config::default(),
        }
    }
}

fn preset(name: &str) -> Config {
    match name {
        "low-latency" => Config::low_latency(),
        "high-throughput" => Config::high_throughput(),
        "default" => Config::default(),
        other => panic!("알 수 없는 preset: {}", other),
    }
}

fn parse_args() -> ServerConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ServerConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--mtu" => {
                if i + 1 < args.len() {
                    config.config.mtu = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--tick-ms" => {
                if i + 1 < args.len() {
                    config.tick =
                        Duration::from_millis(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--timeout-secs" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().expect("유효한 숫자 필요");
                    config.config.connection_timeout =
                        (secs > 0).then(|| Duration::from_secs(secs));
                    i += 1;
                }
            }
            "--preset" | "-p" => {
                if i + 1 < args.len() {
                    let mtu = config.config.mtu;
                    config.config = preset(&args[i + 1]);
                    config.config.mtu = mtu;
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--help" | "-h" => {
                println!(
                    r#"Chanmux Server - 채널 다중화 에코 서버

사용법:
  cargo run --release --bin chanmux-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:9000)
  --mtu <BYTES>           MTU (기본: 1300)
  --tick-ms <MS>          update 주기 (기본: 5)
  --timeout-secs <SECS>   무활동 연결 타임아웃, 0이면 끄기 (기본: 10)
  -p, --preset <NAME>     default | low-latency | high-throughput
  -v, --verbose           debug 로그 출력
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let server_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if server_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Chanmux Server starting...");
    info!("Bind address: {}", server_config.bind_addr);
    info!("Channels: {}", server_config.config.channels.len());
    info!("Tick: {:?}", server_config.tick);

    let mut transport = UdpTransport::bind(server_config.bind_addr).await?;
    if let Some(mtu) = server_config.config.mtu {
        transport = transport.with_mtu(mtu);
    }
    let transport = Arc::new(transport);
    let mut host = Host::new(server_config.config, transport.clone())?;

    host.register_handler(ECHO, |connection, message| {
        connection.send(message.channel_id, ECHO_REPLY, &message.payload)
    })?;

    info!("Server listening on {}", transport.local_addr()?);

    let mut ticker = tokio::time::interval(server_config.tick);
    let mut report = tokio::time::interval(server_config.report_interval);

    loop {
        tokio::select! {
            ready = transport.readable() => ready?,
            _ = ticker.tick() => {}
            _ = report.tick() => {
                info!(
                    "Connections: {} | Free packets: {} | Pending packets: {}",
                    host.connection_count(),
                    host.pool().free_count(),
                    host.pool().pending_packets(),
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }

        for event in host.update(Instant::now()) {
            match event {
                HostEvent::Connected(id) => {
                    let address = host.connection(id).and_then(|c| c.address());
                    info!("Client connected: {} ({:?})", id, address);
                }
                HostEvent::Disconnected {
                    connection_id,
                    reason,
                } => {
                    transport.remove_peer(connection_id);
                    info!("Client disconnected: {} ({:?})", connection_id, reason);
                }
                HostEvent::DatagramError {
                    connection_id,
                    error,
                } => {
                    warn!("Datagram from {} discarded: {}", connection_id, error);
                }
            }
        }
    }

    host.flush();
    for id in host.connection_ids() {
        if let Some(stats) = host.disconnect(id) {
            info!("Connection {}: {}", id, stats.summary());
        }
    }

    Ok(())
}
