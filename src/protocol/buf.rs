use bytes::Buf;

use crate::error::{ReplicationError, Result};

/// Bounds-checked little-endian reader over a packet payload.
///
/// `bytes::Buf` panics on underflow; every accessor here checks `remaining()`
/// first and reports a short packet as a protocol error instead.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn need(&self, n: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < n {
            return Err(ReplicationError::protocol(format!(
                "packet too short reading {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn u8(&mut self) -> Result<u8> {
        self.need(1, "u8")?;
        Ok(self.buf.get_u8())
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        self.need(2, "u16")?;
        Ok(self.buf.get_u16_le())
    }

    pub fn u24_le(&mut self) -> Result<u32> {
        self.need(3, "u24")?;
        Ok(self.buf.get_uint_le(3) as u32)
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        self.need(4, "u32")?;
        Ok(self.buf.get_u32_le())
    }

    pub fn u48_le(&mut self) -> Result<u64> {
        self.need(6, "u48")?;
        Ok(self.buf.get_uint_le(6))
    }

    pub fn u64_le(&mut self) -> Result<u64> {
        self.need(8, "u64")?;
        Ok(self.buf.get_u64_le())
    }

    /// Unsigned little-endian integer of `width` bytes (1..=8).
    pub fn uint_le(&mut self, width: usize) -> Result<u64> {
        self.need(width, "uint")?;
        Ok(self.buf.get_uint_le(width))
    }

    /// Unsigned big-endian integer of `width` bytes (1..=8).
    pub fn uint_be(&mut self, width: usize) -> Result<u64> {
        self.need(width, "uint")?;
        Ok(self.buf.get_uint(width))
    }

    pub fn f32_le(&mut self) -> Result<f32> {
        self.need(4, "float")?;
        Ok(self.buf.get_f32_le())
    }

    pub fn f64_le(&mut self) -> Result<f64> {
        self.need(8, "double")?;
        Ok(self.buf.get_f64_le())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.need(n, "bytes")?;
        let buf = self.buf;
        let (head, tail) = buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.bytes(n).map(|_| ())
    }

    /// Everything left in the payload.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = self.buf;
        self.buf = &[];
        rest
    }

    /// Null-terminated string; the terminator is consumed.
    pub fn cstr(&mut self) -> Result<&'a [u8]> {
        let buf = self.buf;
        let pos = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ReplicationError::protocol("unterminated string"))?;
        self.buf = &buf[pos + 1..];
        Ok(&buf[..pos])
    }

    /// Expect a 0x00 terminator byte.
    pub fn terminator(&mut self, what: &str) -> Result<()> {
        match self.u8()? {
            0 => Ok(()),
            b => Err(ReplicationError::protocol(format!(
                "unexpected terminator byte 0x{b:02x} after {what}"
            ))),
        }
    }

    /// Length-encoded integer. Returns `None` for the NULL marker (0xFB).
    pub fn lenenc_int(&mut self) -> Result<Option<u64>> {
        let first = self.u8()?;
        match first {
            0..=0xFA => Ok(Some(first as u64)),
            0xFB => Ok(None),
            0xFC => Ok(Some(self.u16_le()? as u64)),
            0xFD => Ok(Some(self.u24_le()? as u64)),
            0xFE => Ok(Some(self.u64_le()?)),
            0xFF => Err(ReplicationError::protocol(
                "invalid length-encoded integer prefix 0xff",
            )),
        }
    }

    /// Length-encoded string. Returns `None` for the NULL marker.
    pub fn lenenc_bytes(&mut self) -> Result<Option<&'a [u8]>> {
        match self.lenenc_int()? {
            Some(len) => {
                let len = usize::try_from(len)
                    .map_err(|_| ReplicationError::protocol("length-encoded string too large"))?;
                Ok(Some(self.bytes(len)?))
            }
            None => Ok(None),
        }
    }
}
