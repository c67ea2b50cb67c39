//! 단편 재조립 (수신측)
//!
//! - 송신측은 큰 메시지를 `FragmentFlag::Continue` 조각들로 보내고 마지막에 `End` 하나를 보낸다
//! - 단편에는 메시지 ID가 없으므로 채널당 진행 중인 단편 메시지는 최대 하나

use bytes::{Bytes, BytesMut};

use crate::{Error, Result, MAX_MESSAGE_SIZE};

/// 단편 continuation 바이트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FragmentFlag {
    /// 뒤에 조각이 더 있음
    Continue = 0,

    /// 메시지 끝 (payload 없음)
    End = 1,
}

impl TryFrom<u8> for FragmentFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, u8> {
        match value {
            0 => Ok(FragmentFlag::Continue),
            1 => Ok(FragmentFlag::End),
            other => Err(other),
        }
    }
}

/// 채널별 단편 재조립 상태
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    buffer: BytesMut,
    in_progress: bool,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// 조각 하나 처리
    ///
    /// 메시지가 완성되면 `Some(재조립된 바이트)`, 아직이면 `None`.
    /// 진행 중인 단편 없이 `End`가 오거나 누적 크기가 프로토콜 상한을 넘으면
    /// 상태를 초기화하고 `MalformedFrame`을 반환한다.
    pub fn on_fragment(&mut self, flag: FragmentFlag, chunk: &[u8]) -> Result<Option<Bytes>> {
        match flag {
            FragmentFlag::Continue => {
                if !self.in_progress {
                    self.buffer.clear();
                    self.in_progress = true;
                }

                if self.buffer.len() + chunk.len() > MAX_MESSAGE_SIZE {
                    let accumulated = self.buffer.len() + chunk.len();
                    self.reset();
                    return Err(Error::malformed(
                        0,
                        format!(
                            "단편 누적 크기 {} 가 상한 {} 초과",
                            accumulated, MAX_MESSAGE_SIZE
                        ),
                    ));
                }

                self.buffer.extend_from_slice(chunk);
                Ok(None)
            }
            FragmentFlag::End => {
                if !self.in_progress {
                    return Err(Error::malformed(0, "진행 중인 단편 없이 fragment-end 수신"));
                }

                self.in_progress = false;
                Ok(Some(self.buffer.split().freeze()))
            }
        }
    }

    /// 진행 중인 단편 메시지 여부
    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// 지금까지 누적된 바이트 수
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// 진행 중인 조립 폐기
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_progress = false;
    }
}
