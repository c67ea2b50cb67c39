//! 메시지 프레이밍
//!
//! 데이터그램 하나에 여러 메시지가 연속으로 들어간다:
//!
//! ```text
//! +------------------+----------------+---------------------+
//! | length (u16, LE) | type (i16, LE) | payload (length B)  |
//! +------------------+----------------+---------------------+
//! ```
//!
//! length는 payload 바이트 수이며 헤더 4바이트는 포함하지 않는다.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::fragment::FragmentFlag;
use crate::{Error, MessageType, Result, FRAGMENT_MESSAGE_TYPE, MESSAGE_HEADER_SIZE};

/// 파싱된 메시지 하나
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub payload: Bytes,
}

impl Frame {
    /// 단편 봉투 여부
    pub fn is_fragment(&self) -> bool {
        self.message_type == FRAGMENT_MESSAGE_TYPE
    }

    /// 봉투 포함 전체 크기
    pub fn framed_len(&self) -> usize {
        MESSAGE_HEADER_SIZE + self.payload.len()
    }
}

/// `[length][type][payload]` 봉투를 버퍼에 기록
pub fn write_frame(buf: &mut BytesMut, message_type: MessageType, payload: &[u8]) -> Result<()> {
    if payload.len() > u16::MAX as usize {
        return Err(Error::InvalidMessageSize {
            size: payload.len(),
            max: u16::MAX as usize,
        });
    }

    buf.reserve(MESSAGE_HEADER_SIZE + payload.len());
    buf.put_u16_le(payload.len() as u16);
    buf.put_i16_le(message_type);
    buf.put_slice(payload);
    Ok(())
}

/// 메시지 하나를 봉투로 감싼 바이트 생성
pub fn frame(message_type: MessageType, payload: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + payload.len());
    write_frame(&mut buf, message_type, payload)?;
    Ok(buf.freeze())
}

/// 단편 봉투 생성: payload = continuation 바이트 + chunk
pub fn frame_fragment(flag: FragmentFlag, chunk: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::with_capacity(MESSAGE_HEADER_SIZE + 1 + chunk.len());
    let payload_len = chunk.len() + 1;
    if payload_len > u16::MAX as usize {
        return Err(Error::InvalidMessageSize {
            size: payload_len,
            max: u16::MAX as usize,
        });
    }

    buf.put_u16_le(payload_len as u16);
    buf.put_i16_le(FRAGMENT_MESSAGE_TYPE);
    buf.put_u8(flag as u8);
    buf.put_slice(chunk);
    Ok(buf.freeze())
}

/// `offset` 위치의 메시지 하나를 파싱
///
/// 성공 시 (메시지, 다음 offset)을 반환한다. payload는 `buf`를 복사하지 않고 slice로 공유.
/// 헤더 4바이트가 안 남았거나 선언된 길이가 남은 버퍼보다 크면 `MalformedFrame`.
pub fn parse_one(buf: &Bytes, offset: usize) -> Result<(Frame, usize)> {
    let remaining = buf.len().saturating_sub(offset);
    if remaining < MESSAGE_HEADER_SIZE {
        return Err(Error::malformed(
            offset,
            format!("헤더 {}바이트 필요, 남은 바이트 {}", MESSAGE_HEADER_SIZE, remaining),
        ));
    }

    let mut header = &buf[offset..offset + MESSAGE_HEADER_SIZE];
    let length = header.get_u16_le() as usize;
    let message_type = header.get_i16_le();

    let start = offset + MESSAGE_HEADER_SIZE;
    if length > remaining - MESSAGE_HEADER_SIZE {
        return Err(Error::malformed(
            offset,
            format!(
                "선언된 길이 {} 가 남은 버퍼 {} 보다 큼",
                length,
                remaining - MESSAGE_HEADER_SIZE
            ),
        ));
    }

    let frame = Frame {
        message_type,
        payload: buf.slice(start..start + length),
    };
    Ok((frame, start + length))
}

/// 데이터그램 안의 메시지들을 순서대로 꺼내는 iterator
///
/// 파싱 에러를 한 번 내보낸 뒤에는 남은 바이트를 버리고 끝난다.
pub struct Frames {
    buf: Bytes,
    offset: usize,
    failed: bool,
}

impl Frames {
    pub fn new(buf: Bytes) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }

    /// 다음에 읽을 offset
    pub fn offset(&self) -> usize {
        self.offset
    }
}

impl Iterator for Frames {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        match parse_one(&self.buf, self.offset) {
            Ok((frame, next)) => {
                self.offset = next;
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
