//! 송신 패킷
//!
//! 고정 용량 버퍼 하나 = 전송 계층에 넘기는 데이터그램 하나.
//! 프레이밍된 메시지 여러 개가 앞에서부터 채워진다.

use bytes::BytesMut;
use tracing::trace;

use crate::transport::Transport;
use crate::{ChannelId, ConnectionId, Error, Result};

/// 송신 패킷
#[derive(Debug)]
pub struct Packet {
    /// 채워진 바이트
    buf: BytesMut,

    /// 최대 용량 (MTU - 헤더 여유분)
    capacity: usize,

    /// reliable 채널용 여부
    reliable: bool,
}

impl Packet {
    /// 새 패킷 할당
    pub fn new(capacity: usize, reliable: bool) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            capacity,
            reliable,
        }
    }

    /// `n` 바이트를 더 쓸 수 있는지
    pub fn has_space(&self, n: usize) -> bool {
        self.buf.len() + n <= self.capacity
    }

    /// 바이트 추가. 공간이 없으면 아무것도 쓰지 않고 `PacketOverflow`
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if !self.has_space(bytes.len()) {
            return Err(Error::PacketOverflow {
                needed: bytes.len(),
                available: self.remaining(),
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// 비우기 (풀에서 재사용할 때)
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// 풀에서 꺼낸 패킷을 새 용도에 맞게 재설정
    pub(crate) fn recycle(&mut self, capacity: usize, reliable: bool) {
        self.buf.clear();
        if self.buf.capacity() < capacity {
            self.buf.reserve(capacity);
        }
        self.capacity = capacity;
        self.reliable = reliable;
    }

    /// 전송 계층으로 넘김
    ///
    /// `false`는 에러가 아니라 "지금은 못 받으니 다음 tick에 다시" 신호.
    pub fn send_to_transport(
        &self,
        transport: &dyn Transport,
        connection_id: ConnectionId,
        channel_id: ChannelId,
    ) -> bool {
        let accepted = transport.try_send(connection_id, channel_id, &self.buf);
        trace!(
            connection_id,
            channel_id,
            len = self.buf.len(),
            accepted,
            "packet -> transport"
        );
        accepted
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn remaining(&self) -> usize {
        self.capacity - self.buf.len()
    }

    pub fn is_reliable(&self) -> bool {
        self.reliable
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }
}
