//! # Chanmux (Channel Multiplexing Layer)
//!
//! MTU 제한이 있는 비신뢰 데이터그램 전송 위에서 동작하는 채널 다중화 계층
//!
//! ## 핵심 특징
//! - **패킷 배칭**: 작은 메시지 여러 개를 MTU 크기 패킷 하나로 묶어 전송
//! - **채널별 순서 보장**: reliable 채널은 전송 계층이 막혀도 FIFO 순서 유지
//! - **백프레셔**: pending 큐 상한 초과 시 송신 거부, 절반 이하로 빠지면 자동 복구
//! - **단편화**: 큰 메시지를 조각내어 전송하고 수신측에서 재조립
//! - **프레이밍**: `[length][type][payload]` 봉투로 메시지 경계 복원
//! - **패킷 풀**: 전 연결이 공유하는 상한 있는 버퍼 free list

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod framer;
pub mod host;
pub mod packet;
pub mod pool;
pub mod stats;
pub mod transport;
pub mod udp;

pub use channel::Channel;
pub use config::{ChannelConfig, Config, QosType};
pub use connection::{Connection, Message, MessageHandler};
pub use error::{Error, Result};
pub use fragment::{FragmentAssembler, FragmentFlag};
pub use framer::{Frame, Frames};
pub use host::{DisconnectReason, Host, HostEvent};
pub use packet::Packet;
pub use pool::PacketPool;
pub use stats::{ChannelStats, ConnectionStats};
pub use transport::{Datagram, MemoryTransport, Transport};
pub use udp::UdpTransport;

/// 연결 ID
pub type ConnectionId = u64;

/// 채널 ID (연결 내 인덱스)
pub type ChannelId = u8;

/// 메시지 타입 (음수는 내부 예약)
pub type MessageType = i16;

/// 프로토콜 상한: 프레이밍된 메시지 최대 크기 (바이트)
pub const MAX_MESSAGE_SIZE: usize = 65535;

/// 메시지 봉투 헤더 크기: length(2) + type(2)
pub const MESSAGE_HEADER_SIZE: usize = 4;

/// 단편 메시지용 예약 타입
pub const FRAGMENT_MESSAGE_TYPE: MessageType = -1;

/// 단편 봉투 오버헤드: 메시지 헤더 + continuation 바이트
pub const FRAGMENT_HEADER_RESERVE: usize = MESSAGE_HEADER_SIZE + 1;

/// 기본 MTU (바이트)
pub const DEFAULT_MTU: usize = 1300;

/// MTU 아래로 남겨두는 헤더 여유분 (바이트)
pub const DEFAULT_HEADER_RESERVE: usize = 100;

/// 패킷 풀이 보관하는 최대 free 패킷 수
pub const DEFAULT_MAX_FREE_PACKETS: usize = 256;
