//! 공유 패킷 풀
//!
//! 모든 연결/채널이 하나의 풀을 공유해서 연결 수와 무관하게 버퍼 메모리 상한을 둔다.
//! 프로세스 전체 pending 패킷 수도 여기서 센다.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::packet::Packet;
use crate::DEFAULT_MAX_FREE_PACKETS;

/// 패킷 free list
#[derive(Debug)]
pub struct PacketPool {
    /// 재사용 대기 패킷
    free: Mutex<Vec<Packet>>,

    /// free list 최대 길이
    max_free: usize,

    /// 전 채널 pending 큐에 들어 있는 패킷 수
    pending: AtomicUsize,
}

impl PacketPool {
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(max_free.min(64))),
            max_free,
            pending: AtomicUsize::new(0),
        }
    }

    /// 패킷 꺼내기 (비어 있으면 새로 할당)
    pub fn acquire(&self, capacity: usize, reliable: bool) -> Packet {
        match self.free.lock().pop() {
            Some(mut packet) => {
                packet.recycle(capacity, reliable);
                packet
            }
            None => Packet::new(capacity, reliable),
        }
    }

    /// 패킷 반납. free list가 가득 차 있으면 그냥 버림
    pub fn release(&self, mut packet: Packet) {
        let mut free = self.free.lock();
        if free.len() < self.max_free {
            packet.reset();
            free.push(packet);
        }
    }

    /// 현재 free 패킷 수
    pub fn free_count(&self) -> usize {
        self.free.lock().len()
    }

    pub fn max_free(&self) -> usize {
        self.max_free
    }

    /// 전 채널 pending 패킷 수
    pub fn pending_packets(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_added(&self, count: usize) {
        self.pending.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn pending_removed(&self, count: usize) {
        // 카운터가 0 아래로 내려가지 않도록
        let _ = self
            .pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(count))
            });
    }
}

impl Default for PacketPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FREE_PACKETS)
    }
}
