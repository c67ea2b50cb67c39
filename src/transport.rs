//! 전송 계층 경계
//!
//! 실제로 바이트를 내보내는 쪽은 외부 구현이다. 이 계층은 두 가지만 요구한다:
//! - `try_send`: 논블로킹, `false`면 나중에 다시
//! - `poll_next_datagram`: 논블로킹, 더 없으면 `None`

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{ChannelId, ConnectionId};

/// 수신/송신 데이터그램
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub connection_id: ConnectionId,
    pub channel_id: ChannelId,
    pub payload: Bytes,
}

impl Datagram {
    pub fn new(connection_id: ConnectionId, channel_id: ChannelId, payload: impl Into<Bytes>) -> Self {
        Self {
            connection_id,
            channel_id,
            payload: payload.into(),
        }
    }
}

/// 데이터그램 전송 계층
///
/// 모든 연결과 채널이 하나의 전송 계층을 공유하므로 `&self`로 동작한다.
pub trait Transport: Send + Sync {
    /// 논블로킹 송신. `false`는 에러가 아니라 "지금은 받을 수 없음"
    fn try_send(&self, connection_id: ConnectionId, channel_id: ChannelId, bytes: &[u8]) -> bool;

    /// 논블로킹 수신
    fn poll_next_datagram(&self) -> Option<Datagram>;

    /// 전송 가능한 최대 데이터그램 크기
    fn mtu(&self) -> usize;

    /// 연결의 원격 주소 (있다면)
    fn peer_address(&self, _connection_id: ConnectionId) -> Option<SocketAddr> {
        None
    }
}

/// 프로세스 내부 전송 계층
///
/// 보낸 데이터그램을 기록하고, 수신 큐에 넣은 데이터그램을 돌려준다.
/// 송신 거부를 켜거나 남은 송신 횟수를 제한해서 백프레셔를 흉내낼 수 있다.
#[derive(Debug)]
pub struct MemoryTransport {
    mtu: usize,
    accepting: AtomicBool,
    send_budget: Mutex<Option<usize>>,
    sent: Mutex<Vec<Datagram>>,
    inbox: Mutex<VecDeque<Datagram>>,
}

impl MemoryTransport {
    pub fn new(mtu: usize) -> Self {
        Self {
            mtu,
            accepting: AtomicBool::new(true),
            send_budget: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            inbox: Mutex::new(VecDeque::new()),
        }
    }

    /// 송신 수락 on/off
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::SeqCst);
    }

    /// 앞으로 수락할 송신 횟수 (None이면 무제한)
    pub fn set_send_budget(&self, budget: Option<usize>) {
        *self.send_budget.lock() = budget;
    }

    /// 지금까지 수락된 데이터그램을 꺼냄
    pub fn take_sent(&self) -> Vec<Datagram> {
        std::mem::take(&mut *self.sent.lock())
    }

    /// 수락된 데이터그램 수
    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }

    /// 수신 큐에 데이터그램 추가
    pub fn push_inbound(&self, datagram: Datagram) {
        self.inbox.lock().push_back(datagram);
    }

    /// 이 전송 계층이 보낸 데이터그램을 `other`의 수신 큐로 옮김
    ///
    /// `connection_id`는 수신측에서 보이는 송신자 연결 ID로 바뀐다.
    pub fn deliver_to(&self, other: &MemoryTransport, connection_id: ConnectionId) -> usize {
        let sent = self.take_sent();
        let count = sent.len();
        let mut inbox = other.inbox.lock();
        inbox.extend(sent.into_iter().map(|d| Datagram {
            connection_id,
            ..d
        }));
        count
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new(crate::DEFAULT_MTU)
    }
}

impl Transport for MemoryTransport {
    fn try_send(&self, connection_id: ConnectionId, channel_id: ChannelId, bytes: &[u8]) -> bool {
        if !self.accepting.load(Ordering::SeqCst) || bytes.len() > self.mtu {
            return false;
        }

        {
            let mut budget = self.send_budget.lock();
            match budget.as_mut() {
                Some(0) => return false,
                Some(n) => *n -= 1,
                None => {}
            }
        }

        self.sent
            .lock()
            .push(Datagram::new(connection_id, channel_id, Bytes::copy_from_slice(bytes)));
        true
    }

    fn poll_next_datagram(&self) -> Option<Datagram> {
        self.inbox.lock().pop_front()
    }

    fn mtu(&self) -> usize {
        self.mtu
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_accepted_sends() {
        let transport = MemoryTransport::new(100);
        assert!(transport.try_send(1, 0, b"a"));
        assert!(transport.try_send(2, 3, b"bc"));
        assert_eq!(transport.sent_count(), 2);

        let sent = transport.take_sent();
        assert_eq!(sent[1], Datagram::new(2, 3, Bytes::from_static(b"bc")));
        assert_eq!(transport.sent_count(), 0);
    }

    #[test]
    fn test_refuses_when_not_accepting_or_oversized() {
        let transport = MemoryTransport::new(4);
        assert!(!transport.try_send(1, 0, b"12345"));
        transport.set_accepting(false);
        assert!(!transport.try_send(1, 0, b"1"));
        transport.set_accepting(true);
        assert!(transport.try_send(1, 0, b"1"));
    }

    #[test]
    fn test_send_budget() {
        let transport = MemoryTransport::new(100);
        transport.set_send_budget(Some(2));
        assert!(transport.try_send(1, 0, b"a"));
        assert!(transport.try_send(1, 0, b"b"));
        assert!(!transport.try_send(1, 0, b"c"));
        transport.set_send_budget(None);
        assert!(transport.try_send(1, 0, b"d"));
        assert_eq!(transport.sent_count(), 3);
    }

    #[test]
    fn test_deliver_to_rewrites_connection_id() {
        let a = MemoryTransport::new(100);
        let b = MemoryTransport::new(100);
        a.try_send(42, 1, b"x");
        assert_eq!(a.deliver_to(&b, 7), 1);

        let datagram = b.poll_next_datagram().unwrap();
        assert_eq!(datagram.connection_id, 7);
        assert_eq!(datagram.channel_id, 1);
        assert!(b.poll_next_datagram().is_none());
    }
}
