//! 채널/연결 설정

use std::time::Duration;

use crate::{
    Error, Result, DEFAULT_HEADER_RESERVE, DEFAULT_MAX_FREE_PACKETS, FRAGMENT_HEADER_RESERVE,
};

/// 채널 QoS
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosType {
    /// 전달 보장, 순서 비보장
    Reliable,

    /// 전달 보장 + 순서 보장 (단편화 가능)
    ReliableOrdered,

    /// 최선 노력 전달
    Unreliable,

    /// 최선 노력 전달, 오래된 메시지는 전송 계층이 버림
    UnreliableSequenced,
}

impl QosType {
    pub fn is_reliable(self) -> bool {
        matches!(self, QosType::Reliable | QosType::ReliableOrdered)
    }

    pub fn is_ordered(self) -> bool {
        matches!(self, QosType::ReliableOrdered | QosType::UnreliableSequenced)
    }
}

/// 채널별 설정
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// QoS
    pub qos: QosType,

    /// 단편화 허용 (reliable + ordered 채널만 가능)
    pub fragmentation: bool,

    /// 배칭 최대 지연
    /// 0이면 메시지를 쓰자마자 즉시 flush
    pub max_batch_delay: Duration,

    /// pending 큐 최대 패킷 수 (reliable 채널만 사용)
    pub max_pending_packets: usize,
}

impl ChannelConfig {
    /// 순서 보장 reliable 채널 (단편화 허용)
    pub fn reliable_ordered() -> Self {
        Self {
            qos: QosType::ReliableOrdered,
            fragmentation: true,
            max_batch_delay: Duration::from_millis(10),
            max_pending_packets: 128,
        }
    }

    /// 순서 비보장 reliable 채널
    pub fn reliable() -> Self {
        Self {
            qos: QosType::Reliable,
            fragmentation: false,
            ..Self::reliable_ordered()
        }
    }

    /// unreliable 채널
    pub fn unreliable() -> Self {
        Self {
            qos: QosType::Unreliable,
            fragmentation: false,
            max_batch_delay: Duration::from_millis(10),
            max_pending_packets: 0,
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.max_batch_delay = delay;
        self
    }

    pub fn with_max_pending_packets(mut self, max: usize) -> Self {
        self.max_pending_packets = max;
        self
    }

    pub fn with_fragmentation(mut self, enabled: bool) -> Self {
        self.fragmentation = enabled;
        self
    }

    pub(crate) fn validate(&self, channel_id: usize) -> Result<()> {
        if self.fragmentation && !(self.qos.is_reliable() && self.qos.is_ordered()) {
            return Err(Error::InvalidConfig(format!(
                "channel {}: 단편화는 reliable + ordered 채널에서만 허용 ({:?})",
                channel_id, self.qos
            )));
        }
        if self.qos.is_reliable() && self.max_pending_packets == 0 {
            return Err(Error::InvalidConfig(format!(
                "channel {}: reliable 채널은 max_pending_packets >= 1 필요",
                channel_id
            )));
        }
        Ok(())
    }
}

/// Chanmux 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// MTU (None이면 전송 계층 값 사용)
    pub mtu: Option<usize>,

    /// MTU 아래로 남겨둘 헤더 여유분
    pub header_reserve: usize,

    /// 패킷 풀 최대 free 패킷 수
    pub max_free_packets: usize,

    /// 채널 목록 (인덱스 = 채널 ID)
    pub channels: Vec<ChannelConfig>,

    /// 무활동 연결 타임아웃 (None이면 끊지 않음)
    pub connection_timeout: Option<Duration>,

    /// 모르는 연결 ID의 데이터그램 수신 시 자동 수락
    pub auto_accept: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mtu: None,
            header_reserve: DEFAULT_HEADER_RESERVE,
            max_free_packets: DEFAULT_MAX_FREE_PACKETS,
            channels: vec![
                ChannelConfig::reliable_ordered(),
                ChannelConfig::reliable(),
                ChannelConfig::unreliable(),
            ],
            connection_timeout: Some(Duration::from_secs(10)),
            auto_accept: true,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 저지연 설정: 배칭 없이 즉시 flush
    pub fn low_latency() -> Self {
        let mut config = Self::default();
        for channel in &mut config.channels {
            channel.max_batch_delay = Duration::ZERO;
        }
        config.connection_timeout = Some(Duration::from_secs(5));
        config
    }

    /// 고처리량 설정: 배칭 지연과 backlog를 크게
    pub fn high_throughput() -> Self {
        let mut config = Self::default();
        for channel in &mut config.channels {
            channel.max_batch_delay = Duration::from_millis(50);
            if channel.qos.is_reliable() {
                channel.max_pending_packets = 1024;
            }
        }
        config.max_free_packets = 2048;
        config
    }

    /// 채널 목록 교체
    pub fn with_channels(mut self, channels: Vec<ChannelConfig>) -> Self {
        self.channels = channels;
        self
    }

    /// 채널 설정 조회
    pub fn channel(&self, channel_id: u8) -> Option<&ChannelConfig> {
        self.channels.get(channel_id as usize)
    }

    /// MTU에서 헤더 여유분을 뺀 패킷 용량
    pub fn max_packet_size(&self, mtu: usize) -> Result<usize> {
        let size = mtu.saturating_sub(self.header_reserve);
        if size <= FRAGMENT_HEADER_RESERVE {
            return Err(Error::InvalidConfig(format!(
                "mtu {} - header_reserve {} 로는 패킷 용량이 부족함",
                mtu, self.header_reserve
            )));
        }
        Ok(size)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(Error::InvalidConfig("채널이 하나 이상 필요".into()));
        }
        if self.channels.len() > u8::MAX as usize + 1 {
            return Err(Error::InvalidConfig(format!(
                "채널 수 {} 가 256을 초과",
                self.channels.len()
            )));
        }
        if let Some(mtu) = self.mtu {
            self.max_packet_size(mtu)?;
        }
        self.channels
            .iter()
            .enumerate()
            .try_for_each(|(id, channel)| channel.validate(id))
    }
}
