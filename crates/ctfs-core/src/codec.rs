//! Checked binary framing for persisted structures.
//!
//! Writers go through `bytes::BufMut`; readers go through [`Decoder`], which
//! bounds-checks every read so truncated input is a structural error instead
//! of a panic inside `bytes::Buf`.
//!
//! Variable-length fields are prefixed with a big-endian `u32` length; optional
//! fields with a presence byte (0 or 1).

use bytes::{Buf, BufMut};

use crate::error::{CtfsError, CtfsResult};

pub fn put_var_bytes(buf: &mut impl BufMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.put_slice(data);
}

pub fn put_presence(buf: &mut impl BufMut, present: bool) {
    buf.put_u8(u8::from(present));
}

pub struct Decoder<'a> {
    buf: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn need(&self, n: usize, what: &str) -> CtfsResult<()> {
        if self.buf.remaining() < n {
            return Err(CtfsError::structural(format!(
                "truncated input reading {what}: need {n} bytes, have {}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_u8(&mut self, what: &str) -> CtfsResult<u8> {
        self.need(1, what)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_u16(&mut self, what: &str) -> CtfsResult<u16> {
        self.need(2, what)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_u32(&mut self, what: &str) -> CtfsResult<u32> {
        self.need(4, what)?;
        Ok(self.buf.get_u32())
    }

    pub fn read_u64(&mut self, what: &str) -> CtfsResult<u64> {
        self.need(8, what)?;
        Ok(self.buf.get_u64())
    }

    pub fn read_i64(&mut self, what: &str) -> CtfsResult<i64> {
        self.need(8, what)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_bool(&mut self, what: &str) -> CtfsResult<bool> {
        match self.read_u8(what)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CtfsError::structural(format!(
                "invalid boolean {other} for {what}"
            ))),
        }
    }

    pub fn read_slice(&mut self, n: usize, what: &str) -> CtfsResult<&'a [u8]> {
        self.need(n, what)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn read_array<const N: usize>(&mut self, what: &str) -> CtfsResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N, what)?);
        Ok(out)
    }

    pub fn read_var_bytes(&mut self, what: &str) -> CtfsResult<&'a [u8]> {
        let len = self.read_u32(what)? as usize;
        self.read_slice(len, what)
    }

    /// Read an optional field written with [`put_presence`].
    pub fn read_option<T>(
        &mut self,
        what: &str,
        read: impl FnOnce(&mut Self) -> CtfsResult<T>,
    ) -> CtfsResult<Option<T>> {
        if self.read_bool(what)? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Fail if any bytes are left over.
    pub fn finish(self, what: &str) -> CtfsResult<()> {
        if self.buf.has_remaining() {
            return Err(CtfsError::structural(format!(
                "{} trailing bytes after {what}",
                self.buf.remaining()
            )));
        }
        Ok(())
    }
}
