//! 에러 타입 정의

use thiserror::Error;

use crate::{ChannelId, ConnectionId, MessageType};

/// Chanmux 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 메시지 크기: {size} (허용 범위 1..={max})")]
    InvalidMessageSize { size: usize, max: usize },

    #[error("단편화 불가 채널: channel={channel_id}, size={size}, max_packet_size={max_packet_size}")]
    FragmentationNotAllowed {
        channel_id: ChannelId,
        size: usize,
        max_packet_size: usize,
    },

    #[error("백프레셔 초과: channel={channel_id}, pending={pending}/{max_pending}")]
    BackpressureExceeded {
        channel_id: ChannelId,
        pending: usize,
        max_pending: usize,
    },

    #[error("전송 계층 거부: channel={channel_id}, 버려진 바이트={dropped_bytes}")]
    TransportRejected {
        channel_id: ChannelId,
        dropped_bytes: usize,
    },

    #[error("잘못된 프레임: offset={offset}, {reason}")]
    MalformedFrame { offset: usize, reason: String },

    #[error("패킷 오버플로우: 필요 {needed} 바이트, 남은 공간 {available} 바이트")]
    PacketOverflow { needed: usize, available: usize },

    #[error("유효하지 않은 채널 ID: {channel_id}")]
    InvalidChannel { channel_id: ChannelId },

    #[error("예약된 메시지 타입: {message_type}")]
    ReservedMessageType { message_type: MessageType },

    #[error("연결 없음: connection_id={connection_id}")]
    ConnectionNotFound { connection_id: ConnectionId },

    #[error("잘못된 설정: {0}")]
    InvalidConfig(String),
}

impl Error {
    pub(crate) fn malformed(offset: usize, reason: impl Into<String>) -> Self {
        Error::MalformedFrame {
            offset,
            reason: reason.into(),
        }
    }

    /// 메시지만 버려지고 연결은 계속 사용 가능한 에러인지
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            Error::TransportRejected { .. } | Error::BackpressureExceeded { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soft_errors() {
        assert!(Error::TransportRejected {
            channel_id: 2,
            dropped_bytes: 10
        }
        .is_soft());
        assert!(Error::BackpressureExceeded {
            channel_id: 0,
            pending: 4,
            max_pending: 4
        }
        .is_soft());
        assert!(!Error::malformed(3, "truncated header").is_soft());
        assert!(!Error::InvalidMessageSize { size: 0, max: 65535 }.is_soft());
    }

    #[test]
    fn test_malformed_message_contains_reason() {
        let err = Error::malformed(12, "선언된 길이가 남은 버퍼보다 큼");
        let text = err.to_string();
        assert!(text.contains("offset=12"));
        assert!(text.contains("선언된 길이"));
    }
}
