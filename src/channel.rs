//! 채널: 연결별/채널 ID별 배칭, backlog, 단편화 엔진
//!
//! - 작은 메시지는 현재 열린 패킷에 이어 붙인다
//! - 패킷이 차면 전송 계층으로 넘기고, reliable 채널에서 거부되면 pending 큐로 보낸다
//! - pending 큐는 FIFO로만 빠지며 새 패킷이 큐를 앞지르지 않는다
//! - 패킷보다 큰 메시지는 reliable + ordered 채널에서만 단편화한다

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::{ChannelConfig, QosType};
use crate::fragment::{FragmentAssembler, FragmentFlag};
use crate::framer;
use crate::packet::Packet;
use crate::pool::PacketPool;
use crate::stats::ChannelStats;
use crate::transport::Transport;
use crate::{
    ChannelId, ConnectionId, Error, Result, FRAGMENT_HEADER_RESERVE, MAX_MESSAGE_SIZE,
};

/// 송신 채널
pub struct Channel {
    /// 소속 연결
    connection_id: ConnectionId,

    /// 채널 ID
    id: ChannelId,

    /// QoS
    qos: QosType,

    /// 단편화 허용 여부 (reliable + ordered일 때만 true)
    allow_fragmentation: bool,

    /// 패킷 용량
    max_packet_size: usize,

    /// 배칭 최대 지연
    max_batch_delay: Duration,

    /// pending 큐 상한
    max_pending_packets: usize,

    /// 현재 채우는 중인 패킷
    current: Packet,

    /// 전송 계층이 아직 받지 않은 패킷 (reliable 전용)
    pending: VecDeque<Packet>,

    /// backlog 상한 도달 상태
    overflowed: bool,

    /// 마지막 flush 시각
    last_flush: Instant,

    /// 수신측 단편 재조립 상태
    assembler: FragmentAssembler,

    pool: Arc<PacketPool>,
    transport: Arc<dyn Transport>,
    stats: ChannelStats,
}

impl Channel {
    /// 새 채널 생성
    pub fn new(
        connection_id: ConnectionId,
        id: ChannelId,
        config: &ChannelConfig,
        max_packet_size: usize,
        pool: Arc<PacketPool>,
        transport: Arc<dyn Transport>,
        now: Instant,
    ) -> Result<Self> {
        config.validate(id as usize)?;
        let reliable = config.qos.is_reliable();
        if max_packet_size <= FRAGMENT_HEADER_RESERVE {
            return Err(Error::InvalidConfig(format!(
                "channel {}: 패킷 용량 {} 가 너무 작음",
                id, max_packet_size
            )));
        }

        let current = pool.acquire(max_packet_size, reliable);

        Ok(Self {
            connection_id,
            id,
            qos: config.qos,
            allow_fragmentation: config.fragmentation,
            max_packet_size,
            max_batch_delay: config.max_batch_delay,
            max_pending_packets: config.max_pending_packets,
            current,
            pending: VecDeque::new(),
            overflowed: false,
            last_flush: now,
            assembler: FragmentAssembler::new(),
            pool,
            transport,
            stats: ChannelStats::default(),
        })
    }

    /// 프레이밍된 메시지 송신
    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() || bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::InvalidMessageSize {
                size: bytes.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        if bytes.len() > self.max_packet_size {
            if !self.allow_fragmentation {
                return Err(Error::FragmentationNotAllowed {
                    channel_id: self.id,
                    size: bytes.len(),
                    max_packet_size: self.max_packet_size,
                });
            }
            return self.send_fragmented(bytes);
        }

        self.send_packed(bytes)
    }

    /// 큰 메시지를 조각내어 각각 일반 송신 경로로 보냄
    fn send_fragmented(&mut self, bytes: &[u8]) -> Result<()> {
        let chunk_size = self.max_packet_size - FRAGMENT_HEADER_RESERVE;

        let fragment_count = bytes.len().div_ceil(chunk_size) + 1;

        // 전송 계층이 전부 거부해도 end까지 모두 큐에 들어갈 수 있을 때만 시작
        let worst_case = self.fragment_queue_demand(bytes.len(), chunk_size);
        if self.pending.len() + worst_case > self.max_pending_packets {
            return Err(self.reject_backpressure());
        }

        for chunk in bytes.chunks(chunk_size) {
            let fragment = framer::frame_fragment(FragmentFlag::Continue, chunk)?;
            self.send(&fragment)?;
            self.stats.fragments_sent += 1;
        }

        let end = framer::frame_fragment(FragmentFlag::End, &[])?;
        self.send(&end)?;
        self.stats.fragments_sent += 1;
        self.stats.fragmented_messages += 1;

        debug!(
            connection_id = self.connection_id,
            channel_id = self.id,
            size = bytes.len(),
            fragments = fragment_count,
            "단편화 송신 완료"
        );
        Ok(())
    }

    /// 단편 송신 하나가 pending 큐에 밀어 넣을 수 있는 최대 패킷 수
    ///
    /// 꽉 찬 조각은 패킷 하나를 통째로 차지하므로 열린 패킷(비어 있지 않으면),
    /// 마지막 조각 앞의 조각들, end가 들어갈 자리가 없을 때의 마지막 조각이 큐로 간다.
    fn fragment_queue_demand(&self, size: usize, chunk_size: usize) -> usize {
        let chunks = size.div_ceil(chunk_size);
        let open_packet = usize::from(!self.current.is_empty());
        if self.max_batch_delay.is_zero() {
            // 쓰기마다 flush하므로 조각마다 패킷 하나
            return open_packet + chunks + 1;
        }

        let last_chunk = size - (chunks - 1) * chunk_size;
        let end_spills = usize::from(last_chunk + 2 * FRAGMENT_HEADER_RESERVE > self.max_packet_size);
        open_packet + (chunks - 1) + end_spills
    }

    /// 패킷 하나에 들어가는 메시지 송신
    fn send_packed(&mut self, bytes: &[u8]) -> Result<()> {
        if self.current.has_space(bytes.len()) {
            self.write_current(bytes)?;
            return Ok(());
        }

        if !self.qos.is_reliable() {
            return self.send_packed_unreliable(bytes);
        }

        if self.pending.is_empty() {
            if self.send_current() {
                let sent = self.replace_current();
                self.pool.release(sent);
            } else {
                let full = self.replace_current();
                self.enqueue(full);
            }
        } else {
            // 큐가 비어 있지 않으면 직접 전송하지 않는다 (순서 역전 방지)
            if self.pending.len() >= self.max_pending_packets {
                return Err(self.reject_backpressure());
            }
            let full = self.replace_current();
            self.enqueue(full);
        }

        self.write_current(bytes)
    }

    fn send_packed_unreliable(&mut self, bytes: &[u8]) -> Result<()> {
        let dropped_bytes = if self.send_current() {
            0
        } else {
            self.stats.packets_dropped += 1;
            self.current.len()
        };
        self.current.reset();
        self.write_current(bytes)?;

        if dropped_bytes > 0 {
            self.stats.transport_rejections += 1;
            debug!(
                connection_id = self.connection_id,
                channel_id = self.id,
                dropped_bytes,
                "unreliable 패킷 버림"
            );
            return Err(Error::TransportRejected {
                channel_id: self.id,
                dropped_bytes,
            });
        }
        Ok(())
    }

    fn write_current(&mut self, bytes: &[u8]) -> Result<()> {
        self.current.write(bytes)?;
        self.stats.messages_sent += 1;
        self.stats.bytes_sent += bytes.len() as u64;

        if self.max_batch_delay.is_zero() {
            let dropped_bytes = self.flush_current();
            if dropped_bytes > 0 {
                return Err(Error::TransportRejected {
                    channel_id: self.id,
                    dropped_bytes,
                });
            }
        }
        Ok(())
    }

    /// 주기적 호출: 배칭 지연이 지났으면 flush
    pub fn tick(&mut self, now: Instant) {
        if self.current.is_empty() && self.pending.is_empty() {
            return;
        }

        if now.saturating_duration_since(self.last_flush) > self.max_batch_delay {
            self.flush();
            self.last_flush = now;
        }
    }

    /// pending 큐를 FIFO로 비우거나, 큐가 비어 있으면 현재 패킷 전송
    pub fn flush(&mut self) {
        self.flush_current();
    }

    /// flush 후 unreliable 채널에서 버려진 바이트 수 반환
    fn flush_current(&mut self) -> usize {
        if self.qos.is_reliable() && !self.pending.is_empty() {
            self.drain_pending();
            return 0;
        }

        if self.current.is_empty() {
            return 0;
        }

        if self.send_current() {
            self.current.reset();
            return 0;
        }

        if self.qos.is_reliable() {
            let full = self.replace_current();
            self.enqueue(full);
            return 0;
        }

        let dropped_bytes = self.current.len();
        self.stats.packets_dropped += 1;
        self.stats.transport_rejections += 1;
        self.current.reset();
        debug!(
            connection_id = self.connection_id,
            channel_id = self.id,
            dropped_bytes,
            "unreliable 패킷 버림"
        );
        dropped_bytes
    }

    fn drain_pending(&mut self) {
        let mut drained = 0usize;
        while let Some(packet) = self.pending.pop_front() {
            if !packet.send_to_transport(&*self.transport, self.connection_id, self.id) {
                // 순서 유지: 실패한 패킷은 맨 앞으로 되돌리고 다음 tick에 재시도
                self.pending.push_front(packet);
                break;
            }
            drained += 1;
            self.pool.pending_removed(1);
            self.pool.release(packet);
        }
        self.stats.packets_sent += drained as u64;

        if drained > 0 {
            debug!(
                connection_id = self.connection_id,
                channel_id = self.id,
                drained,
                remaining = self.pending.len(),
                "pending 큐 전송"
            );
        }

        if self.overflowed && self.pending.len() * 2 < self.max_pending_packets {
            self.overflowed = false;
            info!(
                connection_id = self.connection_id,
                channel_id = self.id,
                pending = self.pending.len(),
                "backlog 복구, 송신 재개"
            );
        }
    }

    fn send_current(&mut self) -> bool {
        let sent = self
            .current
            .send_to_transport(&*self.transport, self.connection_id, self.id);
        if sent {
            self.stats.packets_sent += 1;
        }
        sent
    }

    fn replace_current(&mut self) -> Packet {
        let fresh = self
            .pool
            .acquire(self.max_packet_size, self.qos.is_reliable());
        std::mem::replace(&mut self.current, fresh)
    }

    fn enqueue(&mut self, packet: Packet) {
        self.pending.push_back(packet);
        self.pool.pending_added(1);
        self.stats.packets_queued += 1;
    }

    fn reject_backpressure(&mut self) -> Error {
        self.stats.backpressure_rejections += 1;
        // 절반 미만이면 이미 복구 조건을 만족하므로 overflow로 보지 않음
        if !self.overflowed && self.pending.len() * 2 >= self.max_pending_packets {
            self.overflowed = true;
            warn!(
                connection_id = self.connection_id,
                channel_id = self.id,
                pending = self.pending.len(),
                max_pending = self.max_pending_packets,
                "reliable 채널 backlog 상한 도달, 복구 전까지 송신 거부"
            );
        }
        Error::BackpressureExceeded {
            channel_id: self.id,
            pending: self.pending.len(),
            max_pending: self.max_pending_packets,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn qos(&self) -> QosType {
        self.qos
    }

    pub fn is_reliable(&self) -> bool {
        self.qos.is_reliable()
    }

    pub fn allows_fragmentation(&self) -> bool {
        self.allow_fragmentation
    }

    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    pub fn max_pending_packets(&self) -> usize {
        self.max_pending_packets
    }

    /// pending 큐 길이
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 현재 패킷에 채워진 바이트
    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn is_overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn last_flush(&self) -> Instant {
        self.last_flush
    }

    pub fn stats(&self) -> &ChannelStats {
        &self.stats
    }

    pub(crate) fn assembler_mut(&mut self) -> &mut FragmentAssembler {
        &mut self.assembler
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // 남은 패킷은 전송하지 않고 풀로 반납
        let pending = std::mem::take(&mut self.pending);
        self.pool.pending_removed(pending.len());
        for packet in pending {
            self.pool.release(packet);
        }
        let current = std::mem::replace(&mut self.current, Packet::new(0, false));
        self.pool.release(current);
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("connection_id", &self.connection_id)
            .field("id", &self.id)
            .field("qos", &self.qos)
            .field("current_len", &self.current.len())
            .field("pending", &self.pending.len())
            .field("overflowed", &self.overflowed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::framer::Frames;
    use crate::transport::MemoryTransport;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const PACKET_SIZE: usize = 1200;

    fn setup(config: ChannelConfig) -> (Channel, Arc<MemoryTransport>, Arc<PacketPool>) {
        let transport = Arc::new(MemoryTransport::new(1300));
        let pool = Arc::new(PacketPool::new(64));
        let channel = Channel::new(
            1,
            0,
            &config,
            PACKET_SIZE,
            pool.clone(),
            transport.clone(),
            Instant::now(),
        )
        .unwrap();
        (channel, transport, pool)
    }

    fn slow_reliable(max_pending: usize) -> ChannelConfig {
        ChannelConfig::reliable_ordered()
            .with_batch_delay(Duration::from_secs(60))
            .with_max_pending_packets(max_pending)
    }

    /// 시퀀스 번호를 payload 앞에 넣은 메시지 (프레이밍 포함 `framed_len` 바이트)
    fn numbered(seq: u32, framed_len: usize) -> Vec<u8> {
        let mut payload = vec![0xAB; framed_len - crate::MESSAGE_HEADER_SIZE];
        payload[..4].copy_from_slice(&seq.to_le_bytes());
        framer::frame(1, &payload).unwrap().to_vec()
    }

    /// 전송 계층이 받은 순서대로 시퀀스 번호 추출
    fn received_sequence(transport: &MemoryTransport) -> Vec<u32> {
        transport
            .take_sent()
            .into_iter()
            .flat_map(|d| Frames::new(d.payload))
            .map(|frame| {
                let frame = frame.unwrap();
                u32::from_le_bytes(frame.payload[..4].try_into().unwrap())
            })
            .collect()
    }

    #[test]
    fn test_rejects_empty_and_oversized_messages() {
        let (mut channel, _, _) = setup(slow_reliable(8));
        assert!(matches!(
            channel.send(&[]),
            Err(Error::InvalidMessageSize { size: 0, .. })
        ));
        assert!(matches!(
            channel.send(&vec![1u8; MAX_MESSAGE_SIZE + 1]),
            Err(Error::InvalidMessageSize { size: 65536, .. })
        ));
        assert_eq!(channel.current_len(), 0);
    }

    #[test]
    fn test_oversized_on_unfragmented_channel() {
        let (mut channel, transport, _) = setup(ChannelConfig::unreliable());
        let result = channel.send(&vec![1u8; PACKET_SIZE + 1]);
        assert!(matches!(
            result,
            Err(Error::FragmentationNotAllowed {
                size: 1201,
                max_packet_size: 1200,
                ..
            })
        ));
        assert_eq!(transport.sent_count(), 0);

        let (mut channel, _, _) = setup(ChannelConfig::reliable().with_max_pending_packets(4));
        assert!(channel.send(&vec![1u8; 2000]).is_err());
    }

    #[test]
    fn test_new_rejects_fragmentation_on_unreliable() {
        let transport = Arc::new(MemoryTransport::new(1300));
        let pool = Arc::new(PacketPool::default());
        let config = ChannelConfig::unreliable().with_fragmentation(true);
        assert!(Channel::new(1, 0, &config, PACKET_SIZE, pool, transport, Instant::now()).is_err());
    }

    #[test]
    fn test_fourth_message_pushes_full_packet() {
        // MTU 1300, 여유분 100 -> 패킷 1200: 400바이트 3개가 딱 맞고 4번째가 넘친다
        let (mut channel, transport, pool) = setup(slow_reliable(8));
        transport.set_accepting(false);

        for seq in 0..3 {
            channel.send(&numbered(seq, 400)).unwrap();
        }
        assert_eq!(channel.current_len(), 1200);
        assert_eq!(channel.pending_len(), 0);

        channel.send(&numbered(3, 400)).unwrap();
        assert_eq!(channel.pending_len(), 1);
        assert_eq!(channel.current_len(), 400);
        assert_eq!(pool.pending_packets(), 1);
    }

    #[test]
    fn test_full_packet_goes_straight_out_when_transport_ready() {
        let (mut channel, transport, pool) = setup(slow_reliable(8));
        for seq in 0..4 {
            channel.send(&numbered(seq, 400)).unwrap();
        }
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(channel.current_len(), 400);
        assert_eq!(pool.pending_packets(), 0);
    }

    #[test]
    fn test_reliable_order_survives_flaky_transport() {
        let (mut channel, transport, _) = setup(slow_reliable(10_000));
        let mut rng = StdRng::seed_from_u64(7);
        let mut now = Instant::now();

        for seq in 0..2000u32 {
            transport.set_accepting(rng.gen_bool(0.4));
            let size = rng.gen_range(8..=PACKET_SIZE);
            channel.send(&numbered(seq, size)).unwrap();
            if seq % 17 == 0 {
                now += Duration::from_secs(61);
                channel.tick(now);
            }
        }

        transport.set_accepting(true);
        while channel.pending_len() > 0 || channel.current_len() > 0 {
            channel.flush();
        }

        let sequence = received_sequence(&transport);
        assert_eq!(sequence, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn test_backpressure_bound_and_queue_contents() {
        let (mut channel, transport, _) = setup(slow_reliable(4));
        transport.set_accepting(false);

        let mut accepted = Vec::new();
        let mut rejected = 0;
        for seq in 0..20u32 {
            match channel.send(&numbered(seq, 400)) {
                Ok(()) => accepted.push(seq),
                Err(Error::BackpressureExceeded {
                    pending,
                    max_pending,
                    ..
                }) => {
                    assert_eq!(pending, 4);
                    assert_eq!(max_pending, 4);
                    rejected += 1;
                }
                Err(e) => panic!("unexpected error: {e}"),
            }
            assert!(channel.pending_len() <= 4);
        }

        assert_eq!(accepted, (0..15).collect::<Vec<_>>());
        assert_eq!(rejected, 5);
        assert!(channel.is_overflowed());
        assert_eq!(channel.stats().backpressure_rejections, 5);

        transport.set_accepting(true);
        channel.flush();
        assert_eq!(channel.pending_len(), 0);
        assert!(!channel.is_overflowed());
        channel.flush();

        assert_eq!(received_sequence(&transport), accepted);
    }

    #[test]
    fn test_overflow_clears_only_below_half() {
        let (mut channel, transport, _) = setup(slow_reliable(4));
        transport.set_accepting(false);
        for seq in 0..16u32 {
            let _ = channel.send(&numbered(seq, 400));
        }
        assert_eq!(channel.pending_len(), 4);
        assert!(channel.is_overflowed());

        transport.set_accepting(true);
        transport.set_send_budget(Some(1));
        channel.flush();
        assert_eq!(channel.pending_len(), 3);
        assert!(channel.is_overflowed());

        transport.set_send_budget(Some(1));
        channel.flush();
        assert_eq!(channel.pending_len(), 2);
        assert!(channel.is_overflowed());

        transport.set_send_budget(Some(1));
        channel.flush();
        assert_eq!(channel.pending_len(), 1);
        assert!(!channel.is_overflowed());
    }

    #[test]
    fn test_unreliable_drops_full_packet_but_keeps_new_message() {
        let (mut channel, transport, _) = setup(
            ChannelConfig::unreliable().with_batch_delay(Duration::from_secs(60)),
        );
        transport.set_accepting(false);

        for seq in 0..3 {
            channel.send(&numbered(seq, 400)).unwrap();
        }
        let result = channel.send(&numbered(3, 400));
        assert!(matches!(
            result,
            Err(Error::TransportRejected {
                dropped_bytes: 1200,
                ..
            })
        ));
        assert!(result.unwrap_err().is_soft());
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.current_len(), 400);
        assert_eq!(channel.stats().packets_dropped, 1);

        transport.set_accepting(true);
        channel.flush();
        assert_eq!(received_sequence(&transport), vec![3]);
    }

    #[test]
    fn test_zero_batch_delay_flushes_every_write() {
        let (mut channel, transport, _) = setup(
            ChannelConfig::reliable_ordered().with_batch_delay(Duration::ZERO),
        );
        channel.send(&numbered(0, 50)).unwrap();
        channel.send(&numbered(1, 50)).unwrap();
        assert_eq!(transport.sent_count(), 2);
        assert_eq!(channel.current_len(), 0);
    }

    #[test]
    fn test_tick_waits_for_batch_delay() {
        let delay = Duration::from_millis(10);
        let (mut channel, transport, _) =
            setup(ChannelConfig::reliable_ordered().with_batch_delay(delay));
        let start = channel.last_flush();

        channel.send(&numbered(0, 100)).unwrap();
        channel.tick(start + Duration::from_millis(5));
        assert_eq!(transport.sent_count(), 0);

        channel.tick(start + Duration::from_millis(11));
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(channel.last_flush(), start + Duration::from_millis(11));
    }

    #[test]
    fn test_tick_drains_backlog_with_empty_current() {
        let (mut channel, transport, _) = setup(
            ChannelConfig::reliable_ordered().with_batch_delay(Duration::from_millis(10)),
        );
        transport.set_accepting(false);
        let start = channel.last_flush();

        // flush가 거부되면 current 패킷이 pending 큐로 넘어간다
        channel.send(&numbered(0, 100)).unwrap();
        channel.tick(start + Duration::from_millis(11));
        assert_eq!(channel.pending_len(), 1);
        assert_eq!(channel.current_len(), 0);

        transport.set_accepting(true);
        channel.tick(start + Duration::from_millis(22));
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(received_sequence(&transport), vec![0]);
    }

    #[test]
    fn test_fragmentation_round_trip() {
        for size in [PACKET_SIZE + 1, 2 * PACKET_SIZE, 2 * PACKET_SIZE + 1] {
            let (mut channel, transport, _) = setup(slow_reliable(64));
            let message: Vec<u8> = (0..size).map(|i| (i * 31 % 256) as u8).collect();

            channel.send(&message).unwrap();
            channel.flush();
            assert!(channel.stats().fragments_sent >= 3);

            let mut assembler = FragmentAssembler::new();
            let mut complete = None;
            for datagram in transport.take_sent() {
                assert!(datagram.payload.len() <= PACKET_SIZE);
                for frame in Frames::new(datagram.payload) {
                    let frame = frame.unwrap();
                    assert!(frame.is_fragment());
                    let flag = FragmentFlag::try_from(frame.payload[0]).unwrap();
                    if let Some(bytes) = assembler.on_fragment(flag, &frame.payload[1..]).unwrap() {
                        complete = Some(bytes);
                    }
                }
            }
            assert_eq!(complete.unwrap().as_ref(), message.as_slice());
        }
    }

    #[test]
    fn test_fragmented_send_rejected_when_backlog_cannot_absorb() {
        let (mut channel, transport, _) = setup(slow_reliable(2));
        transport.set_accepting(false);
        for seq in 0..4 {
            channel.send(&numbered(seq, 400)).unwrap();
        }
        assert_eq!(channel.pending_len(), 1);

        let result = channel.send(&vec![9u8; 3000]);
        assert!(matches!(result, Err(Error::BackpressureExceeded { .. })));
        assert_eq!(channel.current_len(), 400);
        assert_eq!(channel.pending_len(), 1);
        assert_eq!(channel.stats().fragments_sent, 0);
    }

    /// 전송 계층이 받은 데이터그램을 재조립해서 (일반 메시지, 완성된 단편 메시지) 순서로 반환
    fn reassemble(transport: &MemoryTransport) -> Vec<Vec<u8>> {
        let mut assembler = FragmentAssembler::new();
        let mut messages = Vec::new();
        for datagram in transport.take_sent() {
            for frame in Frames::new(datagram.payload) {
                let frame = frame.unwrap();
                if !frame.is_fragment() {
                    messages.push(frame.payload.to_vec());
                    continue;
                }
                let flag = FragmentFlag::try_from(frame.payload[0]).unwrap();
                if let Some(bytes) = assembler.on_fragment(flag, &frame.payload[1..]).unwrap() {
                    messages.push(bytes.to_vec());
                }
            }
        }
        assert!(!assembler.is_in_progress());
        messages
    }

    #[test]
    fn test_fragmented_send_from_empty_backlog_is_all_or_nothing() {
        let (mut channel, transport, _) = setup(slow_reliable(2));
        transport.set_accepting(false);
        let small = numbered(0, 9);
        channel.send(&small).unwrap();
        assert_eq!(channel.pending_len(), 0);

        // 열린 패킷 + 꽉 찬 조각 2개 = 큐 3칸 필요
        let big: Vec<u8> = (0..3000).map(|i| (i % 251) as u8).collect();
        assert!(matches!(
            channel.send(&big),
            Err(Error::BackpressureExceeded {
                pending: 0,
                max_pending: 2,
                ..
            })
        ));
        assert_eq!(channel.stats().fragments_sent, 0);
        assert_eq!(channel.pending_len(), 0);
        assert_eq!(channel.current_len(), 9);
        assert!(!channel.is_overflowed());

        transport.set_accepting(true);
        channel.flush();
        channel.send(&big).unwrap();
        channel.flush();

        let messages = reassemble(&transport);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], &small[crate::MESSAGE_HEADER_SIZE..]);
        assert_eq!(messages[1], big);
    }

    #[test]
    fn test_fragmented_send_fills_backlog_exactly_while_refused() {
        let (mut channel, transport, _) = setup(slow_reliable(2));
        transport.set_accepting(false);

        let big: Vec<u8> = (0..3000).map(|i| (i % 13) as u8).collect();
        channel.send(&big).unwrap();
        assert_eq!(channel.pending_len(), 2);
        assert_eq!(channel.stats().fragments_sent, 4);

        transport.set_accepting(true);
        while channel.pending_len() > 0 || channel.current_len() > 0 {
            channel.flush();
        }
        assert_eq!(reassemble(&transport), vec![big]);
    }

    #[test]
    fn test_zero_delay_unreliable_reports_refused_send() {
        let (mut channel, transport, _) = setup(
            ChannelConfig::unreliable().with_batch_delay(Duration::ZERO),
        );
        transport.set_accepting(false);

        let result = channel.send(&numbered(0, 64));
        assert!(matches!(
            result,
            Err(Error::TransportRejected {
                dropped_bytes: 64,
                ..
            })
        ));
        assert_eq!(channel.current_len(), 0);
        assert_eq!(channel.stats().packets_dropped, 1);

        transport.set_accepting(true);
        channel.send(&numbered(1, 64)).unwrap();
        assert_eq!(received_sequence(&transport), vec![1]);
    }

    #[test]
    fn test_drop_returns_packets_to_pool() {
        let (mut channel, transport, pool) = setup(slow_reliable(8));
        transport.set_accepting(false);
        for seq in 0..10 {
            channel.send(&numbered(seq, 400)).unwrap();
        }
        assert_eq!(pool.pending_packets(), 3);
        let free_before = pool.free_count();

        drop(channel);
        assert_eq!(pool.pending_packets(), 0);
        assert_eq!(pool.free_count(), free_before + 4);
        assert_eq!(transport.sent_count(), 0);
    }
}
