//! 연결: 채널 배열 + 수신 프레이밍/디스패치 루프 + pause 큐
//!
//! 디스패치 모드는 두 가지뿐이다:
//! - Immediate: 수신 즉시 핸들러 호출 (초기/기본 상태)
//! - Paused: `pause()` 이후 수신 메시지를 도착 순서대로 큐에 쌓음, `resume()`이 모두 전달한 뒤 Immediate로 복귀

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::fragment::FragmentFlag;
use crate::framer::{self, Frame, Frames};
use crate::pool::PacketPool;
use crate::stats::{ChannelStats, ConnectionStats};
use crate::transport::Transport;
use crate::{ChannelId, Config, ConnectionId, Error, MessageType, Result};

/// 수신 메시지
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub message_type: MessageType,
    pub payload: Bytes,
    pub connection_id: ConnectionId,
    pub channel_id: ChannelId,
}

impl Message {
    /// bincode payload 역직렬화
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(bincode::deserialize(&self.payload)?)
    }
}

/// 메시지 핸들러
///
/// 핸들러는 연결을 `&mut`로 받으므로 안에서 바로 응답을 보내거나 `pause()`를 호출할 수 있다.
pub type MessageHandler = Arc<dyn Fn(&mut Connection, &Message) -> Result<()> + Send + Sync>;

/// 피어 연결
pub struct Connection {
    /// 연결 ID
    id: ConnectionId,

    /// 원격 주소 (전송 계층이 알려준 경우)
    address: Option<SocketAddr>,

    /// 세션 계층이 설정하는 준비 완료 플래그
    ready: bool,

    /// 채널 목록 (인덱스 = 채널 ID)
    channels: Vec<Channel>,

    /// 메시지 타입 -> 핸들러
    handlers: HashMap<MessageType, MessageHandler>,

    /// pause 중일 때만 존재
    pause_queue: Option<VecDeque<Message>>,

    /// 마지막 수신 시각
    last_activity: Instant,

    stats: ConnectionStats,
}

impl Connection {
    /// 새 연결 생성 (설정된 채널마다 Channel 하나)
    pub fn new(
        id: ConnectionId,
        address: Option<SocketAddr>,
        config: &Config,
        pool: Arc<PacketPool>,
        transport: Arc<dyn Transport>,
        now: Instant,
    ) -> Result<Self> {
        config.validate()?;
        let mtu = config.mtu.unwrap_or_else(|| transport.mtu());
        let max_packet_size = config.max_packet_size(mtu)?;

        let channels = config
            .channels
            .iter()
            .enumerate()
            .map(|(index, channel)| {
                Channel::new(
                    id,
                    index as ChannelId,
                    channel,
                    max_packet_size,
                    pool.clone(),
                    transport.clone(),
                    now,
                )
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            connection_id = id,
            channels = channels.len(),
            max_packet_size,
            "연결 생성"
        );

        Ok(Self {
            id,
            address,
            ready: false,
            channels,
            handlers: HashMap::new(),
            pause_queue: None,
            last_activity: now,
            stats: ConnectionStats::new(),
        })
    }

    /// 핸들러 등록 (같은 타입이면 교체)
    pub fn register_handler<F>(&mut self, message_type: MessageType, handler: F) -> Result<()>
    where
        F: Fn(&mut Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        self.register_shared_handler(message_type, Arc::new(handler))
    }

    /// 여러 연결이 공유하는 핸들러 등록
    pub fn register_shared_handler(
        &mut self,
        message_type: MessageType,
        handler: MessageHandler,
    ) -> Result<()> {
        if message_type < 0 {
            return Err(Error::ReservedMessageType { message_type });
        }
        self.handlers.insert(message_type, handler);
        Ok(())
    }

    /// 핸들러 제거
    pub fn unregister_handler(&mut self, message_type: MessageType) -> bool {
        self.handlers.remove(&message_type).is_some()
    }

    pub fn has_handler(&self, message_type: MessageType) -> bool {
        self.handlers.contains_key(&message_type)
    }

    /// 메시지 송신: 프레이밍 후 채널로 넘김
    pub fn send(
        &mut self,
        channel_id: ChannelId,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<()> {
        if message_type < 0 {
            return Err(Error::ReservedMessageType { message_type });
        }
        let bytes = framer::frame(message_type, payload)?;
        self.channel_mut(channel_id)?.send(&bytes)
    }

    /// 타입 있는 메시지 송신 (bincode 직렬화)
    pub fn send_message<T: Serialize>(
        &mut self,
        channel_id: ChannelId,
        message_type: MessageType,
        message: &T,
    ) -> Result<()> {
        let payload = bincode::serialize(message)?;
        self.send(channel_id, message_type, &payload)
    }

    /// 모든 채널 tick
    pub fn tick(&mut self, now: Instant) {
        for channel in &mut self.channels {
            channel.tick(now);
        }
    }

    /// 모든 채널 즉시 flush
    pub fn flush(&mut self) {
        for channel in &mut self.channels {
            channel.flush();
        }
    }

    /// 데이터그램 하나 처리
    ///
    /// 전달(또는 pause 큐 적재)한 메시지 수를 반환한다.
    /// 파싱 실패나 미등록 타입을 만나면 그 앞까지 전달된 메시지는 유지되고
    /// 나머지 바이트는 버린 뒤 에러를 반환한다. 연결 자체는 끊지 않는다.
    pub fn on_datagram_received(
        &mut self,
        channel_id: ChannelId,
        datagram: Bytes,
        now: Instant,
    ) -> Result<usize> {
        self.last_activity = now;
        self.stats.datagrams_received += 1;
        self.stats.bytes_received += datagram.len() as u64;

        if channel_id as usize >= self.channels.len() {
            return Err(self.reject_datagram(Error::InvalidChannel { channel_id }));
        }

        let mut delivered = 0;
        let mut offset = 0;
        while offset < datagram.len() {
            let frame_offset = offset;
            let frame = match framer::parse_one(&datagram, offset) {
                Ok((frame, next)) => {
                    offset = next;
                    frame
                }
                Err(e) => return Err(self.reject_datagram(e)),
            };

            let result = if frame.is_fragment() {
                self.receive_fragment(channel_id, frame_offset, &frame.payload)
            } else {
                self.deliver(channel_id, frame, frame_offset).map(|()| 1)
            };

            match result {
                Ok(count) => delivered += count,
                Err(e) => return Err(self.reject_datagram(e)),
            }
        }

        Ok(delivered)
    }

    /// 단편 처리. 메시지가 완성되면 그 안의 메시지들을 전달
    fn receive_fragment(
        &mut self,
        channel_id: ChannelId,
        offset: usize,
        payload: &[u8],
    ) -> Result<usize> {
        let (&flag_byte, chunk) = payload
            .split_first()
            .ok_or_else(|| Error::malformed(offset, "빈 단편 payload"))?;
        let flag = FragmentFlag::try_from(flag_byte).map_err(|byte| {
            Error::malformed(offset, format!("잘못된 continuation 바이트 {}", byte))
        })?;
        if flag == FragmentFlag::End && !chunk.is_empty() {
            return Err(Error::malformed(offset, "fragment-end 뒤에 payload가 있음"));
        }

        let channel = self
            .channels
            .get_mut(channel_id as usize)
            .ok_or(Error::InvalidChannel { channel_id })?;
        let complete = channel
            .assembler_mut()
            .on_fragment(flag, chunk)
            .map_err(|e| match e {
                Error::MalformedFrame { reason, .. } => Error::MalformedFrame { offset, reason },
                other => other,
            })?;

        let Some(message_bytes) = complete else {
            return Ok(0);
        };
        self.stats.messages_reassembled += 1;

        let mut delivered = 0;
        for frame in Frames::new(message_bytes) {
            let frame = frame?;
            if frame.is_fragment() {
                return Err(Error::malformed(offset, "재조립된 메시지 안에 단편이 있음"));
            }
            self.deliver(channel_id, frame, offset)?;
            delivered += 1;
        }
        Ok(delivered)
    }

    /// 등록된 타입이면 전달, 아니면 에러
    fn deliver(&mut self, channel_id: ChannelId, frame: Frame, offset: usize) -> Result<()> {
        if !self.handlers.contains_key(&frame.message_type) {
            return Err(Error::malformed(
                offset,
                format!("핸들러 없는 메시지 타입 {}", frame.message_type),
            ));
        }

        self.dispatch(Message {
            message_type: frame.message_type,
            payload: frame.payload,
            connection_id: self.id,
            channel_id,
        });
        Ok(())
    }

    fn dispatch(&mut self, message: Message) {
        if let Some(queue) = self.pause_queue.as_mut() {
            queue.push_back(message);
            self.stats.messages_deferred += 1;
            return;
        }

        let Some(handler) = self.handlers.get(&message.message_type).cloned() else {
            warn!(
                connection_id = self.id,
                message_type = message.message_type,
                "pause 중 핸들러가 제거됨, 메시지 버림"
            );
            return;
        };

        self.stats.messages_dispatched += 1;
        if let Err(e) = handler(self, &message) {
            self.stats.handler_errors += 1;
            warn!(
                connection_id = self.id,
                message_type = message.message_type,
                "핸들러 에러: {}",
                e
            );
        }
    }

    fn reject_datagram(&mut self, error: Error) -> Error {
        self.stats.malformed_datagrams += 1;
        warn!(
            connection_id = self.id,
            "데이터그램 처리 중단, 나머지 바이트 폐기: {}", error
        );
        error
    }

    /// 디스패치 일시 정지 (이미 pause 상태면 아무것도 안 함)
    pub fn pause(&mut self) {
        if self.pause_queue.is_none() {
            self.pause_queue = Some(VecDeque::new());
            debug!(connection_id = self.id, "디스패치 pause");
        }
    }

    /// pause 큐를 도착 순서대로 모두 전달하고 즉시 디스패치로 복귀
    ///
    /// 전달 도중 핸들러가 다시 `pause()`하면 남은 메시지는 순서대로 새 큐에 들어간다.
    pub fn resume(&mut self) -> usize {
        let Some(mut queue) = self.pause_queue.take() else {
            return 0;
        };

        let count = queue.len();
        while let Some(message) = queue.pop_front() {
            self.dispatch(message);
        }
        debug!(connection_id = self.id, count, "디스패치 resume");
        count
    }

    pub fn is_paused(&self) -> bool {
        self.pause_queue.is_some()
    }

    /// pause 큐에 쌓인 메시지 수
    pub fn paused_len(&self) -> usize {
        self.pause_queue.as_ref().map_or(0, VecDeque::len)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self, ready: bool) {
        if ready != self.ready {
            info!(connection_id = self.id, ready, "연결 준비 상태 변경");
        }
        self.ready = ready;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// 마지막 수신 이후 경과 시간
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn channel(&self, channel_id: ChannelId) -> Option<&Channel> {
        self.channels.get(channel_id as usize)
    }

    fn channel_mut(&mut self, channel_id: ChannelId) -> Result<&mut Channel> {
        self.channels
            .get_mut(channel_id as usize)
            .ok_or(Error::InvalidChannel { channel_id })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// 전 채널 pending 패킷 수
    pub fn pending_packets(&self) -> usize {
        self.channels.iter().map(Channel::pending_len).sum()
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn channel_stats(&self, channel_id: ChannelId) -> Option<&ChannelStats> {
        self.channel(channel_id).map(Channel::stats)
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("ready", &self.ready)
            .field("channels", &self.channels)
            .field("handlers", &self.handlers.len())
            .field("paused", &self.paused_len())
            .finish()
    }
}
