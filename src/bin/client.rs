//! Chanmux 에코 클라이언트
//!
//! 무작위 payload를 지정한 채널로 보내고, 돌아온 에코를 CRC32로 검증한다.
//!
//! 사용법:
//!   cargo run --release --bin chanmux-client -- [OPTIONS]
//!
//! 예시:
//!   # 기본: reliable ordered 채널로 1만 개
//!   cargo run --release --bin chanmux-client -- --server 127.0.0.1:9000
//!
//!   # 단편화 확인 (패킷보다 큰 메시지)
//!   cargo run --release --bin chanmux-client -- -s 127.0.0.1:9000 --size 5000 --messages 500

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use chanmux::{ChannelId, Config, Error, Host, HostEvent, MessageType, UdpTransport};

const ECHO: MessageType = 1;
const ECHO_REPLY: MessageType = 2;

/// payload 앞 4바이트는 시퀀스 번호
const SEQUENCE_SIZE: usize = 4;

/// 클라이언트 설정
struct ClientConfig {
    bind_addr: SocketAddr,
    server_addr: SocketAddr,
    channel: ChannelId,
    count: u32,
    size: usize,
    tick: Duration,
    wait: Duration,
    verbose: bool,
    config: Config,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([127, 0, 0, 1], 9000)),
            channel: 0,
            count: 10_000,
            size: 256,
            tick: Duration::from_millis(5),
            wait: Duration::from_secs(5),
            verbose: false,
            config: Config {
                auto_accept: false,
                ..Config::default()
            },
        }
    }
}

fn parse_args() -> ClientConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ClientConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    config.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--channel" | "-c" => {
                if i + 1 < args.len() {
                    config.channel = args[i + 1].parse().expect("유효한 채널 ID 필요");
                    i += 1;
                }
            }
            "--messages" | "-n" => {
                if i + 1 < args.len() {
                    config.count = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--size" => {
                if i + 1 < args.len() {
                    config.size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--mtu" => {
                if i + 1 < args.len() {
                    config.config.mtu = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--preset" | "-p" => {
                if i + 1 < args.len() {
                    let mtu = config.config.mtu;
                    config.config = match args[i + 1].as_str() {
                        "low-latency" => Config::low_latency(),
                        "high-throughput" => Config::high_throughput(),
                        "default" => Config::default(),
                        other => panic!("알 수 없는 preset: {}", other),
                    };
                    config.config.mtu = mtu;
                    config.config.auto_accept = false;
                    i += 1;
                }
            }
            "--verbose" | "-v" => {
                config.verbose = true;
            }
            "--wait-secs" => {
                if i + 1 < args.len() {
                    config.wait =
                        Duration::from_secs(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"Chanmux Client - 채널 다중화 에코 클라이언트

사용법:
  cargo run --release --bin chanmux-client -- [OPTIONS]

옵션:
  -s, --server <ADDR>     서버 주소 (기본: 127.0.0.1:9000)
  -b, --bind <ADDR>       바인드 주소 (기본: 0.0.0.0:0)
  -c, --channel <ID>      송신 채널 0=reliable ordered, 1=reliable, 2=unreliable (기본: 0)
  -n, --messages <N>      보낼 메시지 수 (기본: 10000)
  --size <BYTES>          메시지 payload 크기, 4 이상 (기본: 256)
  --mtu <BYTES>           MTU (기본: 1300)
  --wait-secs <SECS>      송신 후 에코 대기 시간 (기본: 5)
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

    config.size = config.size.max(SEQUENCE_SIZE);
    config
}

/// 에코 검증 상태
#[derive(Default)]
struct EchoTracker {
    /// 시퀀스 -> 보낸 payload CRC32
    expected: HashMap<u32, u32>,
    verified: u64,
    mismatched: u64,
    unexpected: u64,
}

impl EchoTracker {
    fn on_reply(&mut self, payload: &[u8]) {
        let Some(sequence) = payload
            .get(..SEQUENCE_SIZE)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
        else {
            self.unexpected += 1;
            return;
        };

        match self.expected.remove(&sequence) {
            Some(crc) if crc == crc32fast::hash(payload) => self.verified += 1,
            Some(_) => self.mismatched += 1,
            None => self.unexpected += 1,
        }
    }
}

fn handle_events(events: Vec<HostEvent>) {
    for event in events {
        match event {
            HostEvent::Connected(id) => info!("Connected: {}", id),
            HostEvent::Disconnected {
                connection_id,
                reason,
            } => warn!("Disconnected: {} ({:?})", connection_id, reason),
            HostEvent::DatagramError {
                connection_id,
                error,
            } => warn!("Datagram from {} discarded: {}", connection_id, error),
        }
    }
}

/// 수신 대기 또는 한 틱 경과 후 update
async fn pump(host: &mut Host, transport: &UdpTransport, tick: Duration) -> chanmux::Result<()> {
    tokio::select! {
        ready = transport.readable() => ready?,
        _ = tokio::time::sleep(tick) => {}
    }
    handle_events(host.update(Instant::now()));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let client_config = parse_args();

    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(if client_config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Chanmux Client starting...");
    info!("Server address: {}", client_config.server_addr);
    info!(
        "Channel: {} | Messages: {} x {} bytes",
        client_config.channel, client_config.count, client_config.size
    );

    let mut transport = UdpTransport::bind(client_config.bind_addr).await?;
    if let Some(mtu) = client_config.config.mtu {
        transport = transport.with_mtu(mtu);
    }
    let transport = Arc::new(transport);
    info!("Bound to local address: {}", transport.local_addr()?);

    let server_id = transport.register_peer(client_config.server_addr);
    let mut host = Host::new(client_config.config, transport.clone())?;

    let tracker = Arc::new(Mutex::new(EchoTracker::default()));
    let replies = tracker.clone();
    host.register_handler(ECHO_REPLY, move |_, message| {
        replies.lock().on_reply(&message.payload);
        Ok(())
    })?;
    host.connect(server_id, Instant::now())?;

    let mut rng = rand::thread_rng();
    let mut backpressure_waits = 0u64;
    let mut transport_drops = 0u64;
    let start = Instant::now();

    for sequence in 0..client_config.count {
        let mut payload = vec![0u8; client_config.size];
        payload[..SEQUENCE_SIZE].copy_from_slice(&sequence.to_le_bytes());
        rng.fill(&mut payload[SEQUENCE_SIZE..]);
        tracker
            .lock()
            .expected
            .insert(sequence, crc32fast::hash(&payload));

        loop {
            match host.send(server_id, client_config.channel, ECHO, &payload) {
                Ok(()) => break,
                Err(Error::BackpressureExceeded { .. }) => {
                    // backlog가 절반 아래로 빠질 때까지 틱 진행
                    backpressure_waits += 1;
                    pump(&mut host, &transport, client_config.tick).await?;
                }
                Err(Error::TransportRejected { .. }) => {
                    transport_drops += 1;
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if sequence % 64 == 63 {
            handle_events(host.update(Instant::now()));
        }
    }
    host.flush();
    let send_elapsed = start.elapsed();
    info!("All messages queued in {:.2}s", send_elapsed.as_secs_f64());

    let deadline = Instant::now() + client_config.wait;
    while !tracker.lock().expected.is_empty() && Instant::now() < deadline {
        pump(&mut host, &transport, client_config.tick).await?;
    }

    let elapsed = start.elapsed();
    let tracker = tracker.lock();
    let total_bytes = client_config.count as f64 * client_config.size as f64;

    info!("Echo test complete!");
    info!("  Time: {:.2}s", elapsed.as_secs_f64());
    info!("  Verified: {}/{}", tracker.verified, client_config.count);
    info!("  Mismatched: {}", tracker.mismatched);
    info!("  Lost: {}", tracker.expected.len());
    info!("  Unexpected: {}", tracker.unexpected);
    info!("  Backpressure waits: {}", backpressure_waits);
    info!("  Transport drops: {}", transport_drops);
    if elapsed.as_secs_f64() > 0.0 {
        info!(
            "  Round-trip throughput: {:.2} MB/s",
            total_bytes / elapsed.as_secs_f64() / 1_000_000.0
        );
    }
    if let Some(connection) = host.connection(server_id) {
        if let Some(stats) = connection.channel_stats(client_config.channel) {
            info!("  Channel: {}", stats.summary());
            info!("  Average packet fill: {:.1} bytes", stats.average_packet_fill());
        }
        info!("  Connection: {}", connection.stats().summary());
    }

    Ok(())
}
