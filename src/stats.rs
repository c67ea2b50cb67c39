//! 채널/연결 통계

use std::time::{Duration, Instant};

/// 채널 송신 통계
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// 수락된 메시지 수 (단편은 각각 1개)
    pub messages_sent: u64,

    /// 수락된 메시지 바이트
    pub bytes_sent: u64,

    /// 전송 계층이 받아간 패킷 수
    pub packets_sent: u64,

    /// pending 큐에 들어간 패킷 수
    pub packets_queued: u64,

    /// 전송 실패로 버려진 패킷 수 (unreliable)
    pub packets_dropped: u64,

    /// 단편화된 메시지 수
    pub fragmented_messages: u64,

    /// 보낸 단편 조각 수 (end 포함)
    pub fragments_sent: u64,

    /// 백프레셔로 거부된 송신 수
    pub backpressure_rejections: u64,

    /// 전송 계층 거부 수
    pub transport_rejections: u64,
}

impl ChannelStats {
    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Messages: {} | Bytes: {} | Packets: {} sent / {} queued / {} dropped | Fragmented: {} | Backpressure: {} | Rejected: {}",
            self.messages_sent,
            self.bytes_sent,
            self.packets_sent,
            self.packets_queued,
            self.packets_dropped,
            self.fragmented_messages,
            self.backpressure_rejections,
            self.transport_rejections,
        )
    }

    /// 패킷당 평균 바이트 (배칭 효율)
    pub fn average_packet_fill(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.bytes_sent as f64 / self.packets_sent as f64
    }
}

/// 연결 수신 통계
#[derive(Debug, Clone)]
pub struct ConnectionStats {
    /// 생성 시간
    pub created_at: Instant,

    /// 수신 데이터그램 수
    pub datagrams_received: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 핸들러로 전달된 메시지 수
    pub messages_dispatched: u64,

    /// pause 중 큐에 쌓인 메시지 수
    pub messages_deferred: u64,

    /// 재조립 완료된 단편 메시지 수
    pub messages_reassembled: u64,

    /// 파싱 실패/미등록 타입으로 잘린 데이터그램 수
    pub malformed_datagrams: u64,

    /// 핸들러가 에러를 반환한 횟수
    pub handler_errors: u64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self {
            created_at: Instant::now(),
            datagrams_received: 0,
            bytes_received: 0,
            messages_dispatched: 0,
            messages_deferred: 0,
            messages_reassembled: 0,
            malformed_datagrams: 0,
            handler_errors: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// 수신 처리율 (bytes/sec)
    pub fn receive_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Datagrams: {} | Bytes: {} | Dispatched: {} | Deferred: {} | Reassembled: {} | Malformed: {}",
            self.elapsed().as_secs_f64(),
            self.datagrams_received,
            self.bytes_received,
            self.messages_dispatched,
            self.messages_deferred,
            self.messages_reassembled,
            self.malformed_datagrams,
        )
    }
}

impl Default for ConnectionStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_packet_fill() {
        let mut stats = ChannelStats::default();
        assert_eq!(stats.average_packet_fill(), 0.0);
        stats.bytes_sent = 3600;
        stats.packets_sent = 3;
        assert_eq!(stats.average_packet_fill(), 1200.0);
    }

    #[test]
    fn test_summaries_mention_counters() {
        let mut channel = ChannelStats::default();
        channel.packets_dropped = 4;
        assert!(channel.summary().contains("4 dropped"));

        let mut connection = ConnectionStats::new();
        connection.malformed_datagrams = 2;
        assert!(connection.summary().contains("Malformed: 2"));
    }
}
