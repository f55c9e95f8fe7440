use crate::FrameError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use cereal_core::{Grain, Timeout};
use std::time::{Duration, UNIX_EPOCH};

const OP_LOCK: u8 = 1;
const OP_RELEASE: u8 = 2;

const STATUS_GRANTED: u8 = 0;
const STATUS_TIMED_OUT: u8 = 1;
const STATUS_RELEASED: u8 = 2;
const STATUS_DEADLOCK: u8 = 3;
const STATUS_REJECTED: u8 = 4;

/// A decoded frame payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Lock {
        subject: String,
        resource: String,
        timeout: Timeout,
        duration: Duration,
    },
    Release(Grain),
}

/// What the server answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Granted(Grain),
    TimedOut,
    Released,
    Deadlock(String),
    Rejected(String),
}

impl Request {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut out = BytesMut::new();
        match self {
            Request::Lock {
                subject,
                resource,
                timeout,
                duration,
            } => {
                out.put_u8(OP_LOCK);
                put_str(&mut out, subject)?;
                put_str(&mut out, resource)?;
                out.put_i32(timeout.as_millis());
                out.put_u32(duration.as_millis().min(u32::MAX as u128) as u32);
            }
            Request::Release(grain) => {
                out.put_u8(OP_RELEASE);
                put_grain(&mut out, grain)?;
            }
        }
        Ok(out.freeze())
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, FrameError> {
        let request = match take_u8(&mut payload)? {
            OP_LOCK => {
                let subject = take_str(&mut payload)?;
                let resource = take_str(&mut payload)?;
                need(&payload, 8)?;
                let timeout = Timeout::from_millis(payload.get_i32() as i64);
                let duration = Duration::from_millis(payload.get_u32() as u64);
                Request::Lock {
                    subject,
                    resource,
                    timeout,
                    duration,
                }
            }
            OP_RELEASE => Request::Release(take_grain(&mut payload)?),
            op => return Err(FrameError::UnknownOperation(op)),
        };
        finished(&payload)?;
        Ok(request)
    }
}

impl Response {
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        let mut out = BytesMut::new();
        match self {
            Response::Granted(grain) => {
                out.put_u8(STATUS_GRANTED);
                put_grain(&mut out, grain)?;
            }
            Response::TimedOut => out.put_u8(STATUS_TIMED_OUT),
            Response::Released => out.put_u8(STATUS_RELEASED),
            Response::Deadlock(message) => {
                out.put_u8(STATUS_DEADLOCK);
                put_str(&mut out, message)?;
            }
            Response::Rejected(message) => {
                out.put_u8(STATUS_REJECTED);
                put_str(&mut out, message)?;
            }
        }
        Ok(out.freeze())
    }

    pub fn decode(mut payload: Bytes) -> Result<Self, FrameError> {
        let response = match take_u8(&mut payload)? {
            STATUS_GRANTED => Response::Granted(take_grain(&mut payload)?),
            STATUS_TIMED_OUT => Response::TimedOut,
            STATUS_RELEASED => Response::Released,
            STATUS_DEADLOCK => Response::Deadlock(take_str(&mut payload)?),
            STATUS_REJECTED => Response::Rejected(take_str(&mut payload)?),
            status => return Err(FrameError::UnknownStatus(status)),
        };
        finished(&payload)?;
        Ok(response)
    }
}

fn put_str(out: &mut BytesMut, value: &str) -> Result<(), FrameError> {
    let len = u16::try_from(value.len()).map_err(|_| FrameError::Malformed("string too long"))?;
    out.put_u16(len);
    out.put_slice(value.as_bytes());
    Ok(())
}

fn put_grain(out: &mut BytesMut, grain: &Grain) -> Result<(), FrameError> {
    put_str(out, grain.id())?;
    put_str(out, grain.subject())?;
    put_str(out, grain.resource())?;
    let micros = grain
        .granted_at()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros().min(u64::MAX as u128) as u64)
        .unwrap_or_default();
    out.put_u64(micros);
    out.put_u64(grain.duration().as_millis().min(u64::MAX as u128) as u64);
    Ok(())
}

fn need(payload: &Bytes, len: usize) -> Result<(), FrameError> {
    if payload.remaining() < len {
        return Err(FrameError::Malformed("payload ends early"));
    }
    Ok(())
}

fn finished(payload: &Bytes) -> Result<(), FrameError> {
    if payload.has_remaining() {
        return Err(FrameError::Malformed("trailing bytes after payload"));
    }
    Ok(())
}

fn take_u8(payload: &mut Bytes) -> Result<u8, FrameError> {
    need(payload, 1)?;
    Ok(payload.get_u8())
}

fn take_str(payload: &mut Bytes) -> Result<String, FrameError> {
    need(payload, 2)?;
    let len = payload.get_u16() as usize;
    need(payload, len)?;
    let raw = payload.split_to(len);
    String::from_utf8(raw.to_vec()).map_err(|_| FrameError::Malformed("string is not UTF-8"))
}

fn take_grain(payload: &mut Bytes) -> Result<Grain, FrameError> {
    let id = take_str(payload)?;
    let subject = take_str(payload)?;
    let resource = take_str(payload)?;
    need(payload, 16)?;
    let granted_at = UNIX_EPOCH + Duration::from_micros(payload.get_u64());
    let duration = Duration::from_millis(payload.get_u64());
    Ok(Grain::new(id, subject, resource, granted_at, duration))
}
