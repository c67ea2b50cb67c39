//! 호스트: 전송 계층 하나 위의 연결 테이블
//!
//! `update()` 한 번이 한 틱이다. 수신 데이터그램을 연결별로 라우팅하고,
//! 모든 채널을 tick 하고, 타임아웃된 연결을 정리한다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Message, MessageHandler};
use crate::pool::PacketPool;
use crate::stats::ConnectionStats;
use crate::transport::Transport;
use crate::{ChannelId, Config, ConnectionId, Error, MessageType, Result};

/// 연결 종료 사유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// `connection_timeout` 동안 수신 없음
    Timeout,
    /// `disconnect()` 호출
    Requested,
}

/// `update()`가 돌려주는 이벤트
#[derive(Debug)]
pub enum HostEvent {
    /// 새 피어 수락
    Connected(ConnectionId),

    /// 연결 종료
    Disconnected {
        connection_id: ConnectionId,
        reason: DisconnectReason,
    },

    /// 데이터그램 일부가 버려짐 (연결은 유지)
    DatagramError {
        connection_id: ConnectionId,
        error: Error,
    },
}

/// 연결 관리자
pub struct Host {
    config: Config,
    transport: Arc<dyn Transport>,
    pool: Arc<PacketPool>,
    connections: HashMap<ConnectionId, Connection>,

    /// 새 연결마다 설치되는 핸들러
    handlers: HashMap<MessageType, MessageHandler>,
}

impl Host {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let mtu = config.mtu.unwrap_or_else(|| transport.mtu());
        let max_packet_size = config.max_packet_size(mtu)?;
        let pool = Arc::new(PacketPool::new(config.max_free_packets));

        info!(
            mtu,
            max_packet_size,
            channels = config.channels.len(),
            "호스트 생성"
        );

        Ok(Self {
            config,
            transport,
            pool,
            connections: HashMap::new(),
            handlers: HashMap::new(),
        })
    }

    /// 모든 연결(기존 + 이후 생성)에 핸들러 등록
    pub fn register_handler<F>(&mut self, message_type: MessageType, handler: F) -> Result<()>
    where
        F: Fn(&mut Connection, &Message) -> Result<()> + Send + Sync + 'static,
    {
        if message_type < 0 {
            return Err(Error::ReservedMessageType { message_type });
        }
        let handler: MessageHandler = Arc::new(handler);
        for connection in self.connections.values_mut() {
            connection.register_shared_handler(message_type, handler.clone())?;
        }
        self.handlers.insert(message_type, handler);
        Ok(())
    }

    /// 피어 연결 생성 (이미 있으면 기존 연결)
    pub fn connect(&mut self, connection_id: ConnectionId, now: Instant) -> Result<&mut Connection> {
        if !self.connections.contains_key(&connection_id) {
            let connection = self.create_connection(connection_id, now)?;
            self.connections.insert(connection_id, connection);
        }
        self.connection_mut(connection_id)
            .ok_or(Error::ConnectionNotFound { connection_id })
    }

    fn create_connection(&self, connection_id: ConnectionId, now: Instant) -> Result<Connection> {
        let address = self.transport.peer_address(connection_id);
        let mut connection = Connection::new(
            connection_id,
            address,
            &self.config,
            self.pool.clone(),
            self.transport.clone(),
            now,
        )?;
        for (&message_type, handler) in &self.handlers {
            connection.register_shared_handler(message_type, handler.clone())?;
        }
        connection.set_ready(true);
        Ok(connection)
    }

    /// 연결 종료. 남은 패킷은 전송하지 않고 풀로 반납하고, 최종 수신 통계를 돌려줌
    pub fn disconnect(&mut self, connection_id: ConnectionId) -> Option<ConnectionStats> {
        let connection = self.connections.remove(&connection_id)?;
        info!(
            connection_id,
            discarded_packets = connection.pending_packets(),
            "연결 종료 요청"
        );
        Some(connection.stats().clone())
    }

    /// 한 틱 처리
    pub fn update(&mut self, now: Instant) -> Vec<HostEvent> {
        let mut events = Vec::new();

        while let Some(datagram) = self.transport.poll_next_datagram() {
            let connection_id = datagram.connection_id;

            if !self.connections.contains_key(&connection_id) {
                if !self.config.auto_accept {
                    debug!(connection_id, "알 수 없는 피어, 데이터그램 무시");
                    continue;
                }
                match self.create_connection(connection_id, now) {
                    Ok(connection) => {
                        info!(connection_id, address = ?connection.address(), "새 연결 수락");
                        self.connections.insert(connection_id, connection);
                        events.push(HostEvent::Connected(connection_id));
                    }
                    Err(error) => {
                        warn!(connection_id, "연결 생성 실패: {}", error);
                        events.push(HostEvent::DatagramError {
                            connection_id,
                            error,
                        });
                        continue;
                    }
                }
            }

            let Some(connection) = self.connections.get_mut(&connection_id) else {
                continue;
            };
            if let Err(error) =
                connection.on_datagram_received(datagram.channel_id, datagram.payload, now)
            {
                events.push(HostEvent::DatagramError {
                    connection_id,
                    error,
                });
            }
        }

        for connection in self.connections.values_mut() {
            connection.tick(now);
        }

        if let Some(timeout) = self.config.connection_timeout {
            let expired: Vec<ConnectionId> = self
                .connections
                .values()
                .filter(|c| c.idle_time(now) > timeout)
                .map(Connection::id)
                .collect();

            for connection_id in expired {
                self.connections.remove(&connection_id);
                warn!(connection_id, timeout_ms = timeout.as_millis() as u64, "연결 타임아웃");
                events.push(HostEvent::Disconnected {
                    connection_id,
                    reason: DisconnectReason::Timeout,
                });
            }
        }

        events
    }

    /// 특정 연결로 송신
    pub fn send(
        &mut self,
        connection_id: ConnectionId,
        channel_id: ChannelId,
        message_type: MessageType,
        payload: &[u8],
    ) -> Result<()> {
        self.connections
            .get_mut(&connection_id)
            .ok_or(Error::ConnectionNotFound { connection_id })?
            .send(channel_id, message_type, payload)
    }

    /// 특정 연결로 타입 있는 메시지 송신
    pub fn send_message<T: Serialize>(
        &mut self,
        connection_id: ConnectionId,
        channel_id: ChannelId,
        message_type: MessageType,
        message: &T,
    ) -> Result<()> {
        self.connections
            .get_mut(&connection_id)
            .ok_or(Error::ConnectionNotFound { connection_id })?
            .send_message(channel_id, message_type, message)
    }

    /// ready 상태인 모든 연결로 송신. 수락된 연결 수 반환
    pub fn broadcast(
        &mut self,
        channel_id: ChannelId,
        message_type: MessageType,
        payload: &[u8],
    ) -> usize {
        let mut accepted = 0;
        for connection in self.connections.values_mut().filter(|c| c.is_ready()) {
            match connection.send(channel_id, message_type, payload) {
                Ok(()) => accepted += 1,
                Err(e) => debug!(connection_id = connection.id(), "broadcast 송신 실패: {}", e),
            }
        }
        accepted
    }

    /// 모든 연결 즉시 flush
    pub fn flush(&mut self) {
        for connection in self.connections.values_mut() {
            connection.flush();
        }
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    pub fn connection_mut(&mut self, connection_id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&connection_id)
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<PacketPool> {
        &self.pool
    }
}
