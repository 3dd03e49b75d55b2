//! Tagged binary reader.
//!
//! All multi-byte primitives are little-endian. Never indexes past the
//! buffer: every read checks the remaining length first, and what happens
//! on a short read depends on the policy: strict fails, lenient records a
//! diagnostic and substitutes a zero-valued default so truncated frames
//! from sloppy producers still decode.

use crate::codec::{DecodeDiagnostic, DecodePolicy};
use crate::envelope::Envelope;
use crate::value::{Quat, Value, ValueMap, Vec3};

/// Recursion ceiling for nested arrays/maps, to bound hostile input.
const MAX_DEPTH: usize = 128;

pub struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
    policy: DecodePolicy,
    diagnostics: Vec<DecodeDiagnostic>,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8], policy: DecodePolicy) -> Self {
        Self {
            buf,
            offset: 0,
            policy,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    /// Diagnostics collected so far (lenient mode only).
    #[must_use]
    pub fn into_diagnostics(self) -> Vec<DecodeDiagnostic> {
        self.diagnostics
    }

    /// Record a degradation, or abort under the strict policy.
    fn degrade(&mut self, diag: DecodeDiagnostic) -> Result<(), DecodeDiagnostic> {
        match self.policy {
            DecodePolicy::Strict => Err(diag),
            DecodePolicy::Lenient => {
                self.diagnostics.push(diag);
                Ok(())
            }
        }
    }

    /// Take `n` bytes, or degrade. `None` means the caller should use the
    /// primitive's zero default.
    fn take(
        &mut self,
        n: usize,
        what: &'static str,
    ) -> Result<Option<&'a [u8]>, DecodeDiagnostic> {
        if self.remaining() >= n {
            let slice = &self.buf[self.offset..self.offset + n];
            self.offset += n;
            Ok(Some(slice))
        } else {
            self.degrade(DecodeDiagnostic::Truncated {
                what,
                needed: n,
                remaining: self.remaining(),
            })?;
            self.offset = self.buf.len();
            Ok(None)
        }
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeDiagnostic> {
        Ok(self.take(1, "byte")?.map_or(0, |s| s[0]))
    }

    pub fn read_bool(&mut self) -> Result<bool, DecodeDiagnostic> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeDiagnostic> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeDiagnostic> {
        Ok(self
            .take(2, "i16")?
            .map_or(0, |s| i16::from_le_bytes([s[0], s[1]])))
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeDiagnostic> {
        Ok(self
            .take(4, "i32")?
            .map_or(0, |s| i32::from_le_bytes([s[0], s[1], s[2], s[3]])))
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeDiagnostic> {
        Ok(self.take(8, "i64")?.map_or(0, |s| {
            i64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
        }))
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeDiagnostic> {
        Ok(self
            .take(4, "f32")?
            .map_or(0.0, |s| f32::from_le_bytes([s[0], s[1], s[2], s[3]])))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeDiagnostic> {
        Ok(self.take(8, "f64")?.map_or(0.0, |s| {
            f64::from_le_bytes([s[0], s[1], s[2], s[3], s[4], s[5], s[6], s[7]])
        }))
    }

    /// Read a 4-byte-length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeDiagnostic> {
        let len = self.read_i32()?;
        if len == 0 {
            return Ok(String::new());
        }
        if len < 0 {
            self.degrade(DecodeDiagnostic::NegativeLength(len, "string"))?;
            return Ok(String::new());
        }
        let Some(bytes) = self.take(len as usize, "string bytes")? else {
            return Ok(String::new());
        };
        match std::str::from_utf8(bytes) {
            Ok(s) => Ok(s.to_string()),
            Err(_) => {
                self.degrade(DecodeDiagnostic::InvalidUtf8)?;
                Ok(String::from_utf8_lossy(bytes).into_owned())
            }
        }
    }

    pub fn read_vec3(&mut self) -> Result<Vec3, DecodeDiagnostic> {
        Ok(Vec3::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_quat(&mut self) -> Result<Quat, DecodeDiagnostic> {
        Ok(Quat::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    /// Read a 4-byte count, validated and clamped against the remaining
    /// buffer (each element costs at least one tag byte).
    fn read_count(&mut self, what: &'static str) -> Result<usize, DecodeDiagnostic> {
        let raw = self.read_i32()?;
        if raw < 0 {
            self.degrade(DecodeDiagnostic::NegativeLength(raw, what))?;
            return Ok(0);
        }
        let count = raw as usize;
        if count > self.remaining() {
            self.degrade(DecodeDiagnostic::CountOverflow {
                what,
                count,
                remaining: self.remaining(),
            })?;
            return Ok(self.remaining());
        }
        Ok(count)
    }

    fn read_array(&mut self, depth: usize) -> Result<Vec<Value>, DecodeDiagnostic> {
        let count = self.read_count("array")?;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(self.read_value_at(depth)?);
        }
        Ok(items)
    }

    fn read_map(&mut self, depth: usize) -> Result<ValueMap, DecodeDiagnostic> {
        let count = self.read_count("map")?;
        let mut map = ValueMap::new();
        for _ in 0..count {
            let key = self.read_string()?;
            let value = self.read_value_at(depth)?;
            map.insert(key, value);
        }
        Ok(map)
    }

    /// Read one tagged value.
    pub fn read_value(&mut self) -> Result<Value, DecodeDiagnostic> {
        self.read_value_at(0)
    }

    fn read_value_at(&mut self, depth: usize) -> Result<Value, DecodeDiagnostic> {
        if depth >= MAX_DEPTH {
            self.degrade(DecodeDiagnostic::DepthExceeded)?;
            return Ok(Value::Null);
        }
        let tag = self.read_u8()?;
        match tag {
            0 => Ok(Value::Null),
            1 => Ok(Value::Bool(self.read_bool()?)),
            2 => Ok(Value::Int8(self.read_i8()?)),
            3 => Ok(Value::Int16(self.read_i16()?)),
            4 => Ok(Value::Int32(self.read_i32()?)),
            5 => Ok(Value::Int64(self.read_i64()?)),
            6 => Ok(Value::Float32(self.read_f32()?)),
            7 => Ok(Value::Float64(self.read_f64()?)),
            8 => Ok(Value::Str(self.read_string()?)),
            9 => Ok(Value::Vec3(self.read_vec3()?)),
            10 => Ok(Value::Quat(self.read_quat()?)),
            11 => Ok(Value::Array(self.read_array(depth + 1)?)),
            12 => Ok(Value::Map(self.read_map(depth + 1)?)),
            other => {
                self.degrade(DecodeDiagnostic::UnknownTag(other))?;
                Ok(Value::Null)
            }
        }
    }

    /// Read a full binary envelope: `[kind:u8][timestamp:i64][payload]`.
    pub fn read_envelope(&mut self) -> Result<Envelope, DecodeDiagnostic> {
        let kind = self.read_u8()?;
        let timestamp = self.read_i64()?;
        let payload = self.read_value()?;
        Ok(Envelope {
            kind,
            timestamp,
            payload,
        })
    }
}
