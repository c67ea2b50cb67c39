//! UDP 전송 계층
//!
//! 데이터그램 = `[channel_id(1)][패킷 바이트]`
//!
//! 피어 주소마다 연결 ID를 하나씩 배정한다. 송신 대상은 `register_peer()`로 미리 등록하거나,
//! 처음 수신한 주소에 자동으로 배정된다.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, warn};

use crate::transport::{Datagram, Transport};
use crate::{ChannelId, ConnectionId, Result, DEFAULT_MTU, MAX_MESSAGE_SIZE};

/// tokio UdpSocket 위의 논블로킹 전송 계층
pub struct UdpTransport {
    socket: UdpSocket,

    /// 연결 ID -> 주소
    peers: RwLock<HashMap<ConnectionId, SocketAddr>>,

    /// 주소 -> 연결 ID
    ids: RwLock<HashMap<SocketAddr, ConnectionId>>,

    next_id: AtomicU64,

    /// 수신 버퍼 재사용
    recv_buf: Mutex<Vec<u8>>,

    mtu: usize,
}

impl UdpTransport {
    /// 소켓 바인딩
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(local = ?socket.local_addr().ok(), "UDP 소켓 바인딩");
        Ok(Self {
            socket,
            peers: RwLock::new(HashMap::new()),
            ids: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            recv_buf: Mutex::new(vec![0u8; MAX_MESSAGE_SIZE + 1]),
            mtu: DEFAULT_MTU,
        })
    }

    /// 패킷 MTU 변경 (channel 바이트 제외)
    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.mtu = mtu;
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 피어 주소 등록 (이미 있으면 기존 ID)
    pub fn register_peer(&self, addr: SocketAddr) -> ConnectionId {
        if let Some(&id) = self.ids.read().get(&addr) {
            return id;
        }

        let mut ids = self.ids.write();
        if let Some(&id) = ids.get(&addr) {
            return id;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        ids.insert(addr, id);
        self.peers.write().insert(id, addr);
        debug!(connection_id = id, %addr, "피어 등록");
        id
    }

    /// 주소로 연결 ID 조회
    pub fn peer_id(&self, addr: &SocketAddr) -> Option<ConnectionId> {
        self.ids.read().get(addr).copied()
    }

    /// 피어 제거
    pub fn remove_peer(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        let addr = self.peers.write().remove(&connection_id)?;
        self.ids.write().remove(&addr);
        Some(addr)
    }

    /// 수신 가능할 때까지 대기
    pub async fn readable(&self) -> Result<()> {
        Ok(self.socket.readable().await?)
    }

    /// 송신 가능할 때까지 대기
    pub async fn writable(&self) -> Result<()> {
        Ok(self.socket.writable().await?)
    }
}

impl Transport for UdpTransport {
    fn try_send(&self, connection_id: ConnectionId, channel_id: ChannelId, bytes: &[u8]) -> bool {
        let Some(addr) = self.peers.read().get(&connection_id).copied() else {
            debug!(connection_id, "등록되지 않은 연결로 송신 시도");
            return false;
        };

        let mut datagram = Vec::with_capacity(bytes.len() + 1);
        datagram.push(channel_id);
        datagram.extend_from_slice(bytes);

        match self.socket.try_send_to(&datagram, addr) {
            Ok(sent) => sent == datagram.len(),
            Err(e) if e.kind() == ErrorKind::WouldBlock => false,
            Err(e) => {
                warn!(connection_id, %addr, "UDP 송신 실패: {}", e);
                false
            }
        }
    }

    fn poll_next_datagram(&self) -> Option<Datagram> {
        let mut buf = self.recv_buf.lock();
        loop {
            match self.socket.try_recv_from(&mut buf) {
                Ok((0, addr)) => {
                    debug!(%addr, "빈 데이터그램 무시");
                }
                Ok((len, addr)) => {
                    let connection_id = self.register_peer(addr);
                    return Some(Datagram::new(
                        connection_id,
                        buf[0],
                        Bytes::copy_from_slice(&buf[1..len]),
                    ));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
                Err(e) => {
                    // ICMP port unreachable 등은 다음 데이터그램에 영향 없음
                    warn!("UDP 수신 실패: {}", e);
                    return None;
                }
            }
        }
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn peer_address(&self, connection_id: ConnectionId) -> Option<SocketAddr> {
        self.peers.read().get(&connection_id).copied()
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("peers", &self.peers.read().len())
            .field("mtu", &self.mtu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn receive(transport: &UdpTransport) -> Datagram {
        timeout(Duration::from_secs(2), async {
            loop {
                transport.readable().await.unwrap();
                if let Some(datagram) = transport.poll_next_datagram() {
                    return datagram;
                }
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_loopback_round_trip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();
        let a_addr = a.local_addr().unwrap();

        let id = a.register_peer(b_addr);
        assert_eq!(a.register_peer(b_addr), id);
        assert_eq!(a.peer_address(id), Some(b_addr));

        a.writable().await.unwrap();
        assert!(a.try_send(id, 3, b"hello"));

        let datagram = receive(&b).await;
        assert_eq!(datagram.channel_id, 3);
        assert_eq!(datagram.payload, Bytes::from_static(b"hello"));
        assert_eq!(b.peer_address(datagram.connection_id), Some(a_addr));

        // 수신으로 배정된 ID로 바로 응답 가능
        b.writable().await.unwrap();
        assert!(b.try_send(datagram.connection_id, 0, b"reply"));
        let reply = receive(&a).await;
        assert_eq!(reply.connection_id, id);
        assert_eq!(reply.payload, Bytes::from_static(b"reply"));
    }

    #[tokio::test]
    async fn test_unknown_connection_refused() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        assert!(!transport.try_send(99, 0, b"x"));
        assert!(transport.poll_next_datagram().is_none());
    }

    #[tokio::test]
    async fn test_remove_peer() {
        let transport = UdpTransport::bind("127.0.0.1:0").await.unwrap().with_mtu(500);
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let id = transport.register_peer(addr);
        assert_eq!(transport.mtu(), 500);
        assert_eq!(transport.remove_peer(id), Some(addr));
        assert_eq!(transport.peer_id(&addr), None);
        assert_ne!(transport.register_peer(addr), id);
    }
}
