//! Tagged binary writer.
//!
//! All multi-byte primitives are little-endian. The integer family
//! (Int8/Int16/Int32) narrows to the smallest fitting tag on encode;
//! Int64 and Float64 keep their own tags, since they only appear when a
//! caller constructed them deliberately (timestamps and the like).

use bytes::{BufMut, Bytes, BytesMut};

use crate::envelope::Envelope;
use crate::value::{Quat, Value, ValueMap, Vec3};

#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Finish writing and take the encoded bytes.
    #[must_use]
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    pub fn put_i16(&mut self, value: i16) {
        self.buf.put_i16_le(value);
    }

    pub fn put_i32(&mut self, value: i32) {
        self.buf.put_i32_le(value);
    }

    pub fn put_i64(&mut self, value: i64) {
        self.buf.put_i64_le(value);
    }

    pub fn put_f32(&mut self, value: f32) {
        self.buf.put_f32_le(value);
    }

    pub fn put_f64(&mut self, value: f64) {
        self.buf.put_f64_le(value);
    }

    /// Write a string as a 4-byte little-endian byte count plus UTF-8 bytes.
    pub fn put_string(&mut self, value: &str) {
        self.put_i32(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Three untagged consecutive floats; the outer tag identifies the shape.
    pub fn put_vec3(&mut self, value: Vec3) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
    }

    pub fn put_quat(&mut self, value: Quat) {
        self.put_f32(value.x);
        self.put_f32(value.y);
        self.put_f32(value.z);
        self.put_f32(value.w);
    }

    /// Write the smallest-fitting integer tag and body.
    fn put_narrowed_int(&mut self, n: i32) {
        if (-128..=127).contains(&n) {
            self.put_u8(2);
            self.put_u8(n as i8 as u8);
        } else if (-32_768..=32_767).contains(&n) {
            self.put_u8(3);
            self.put_i16(n as i16);
        } else {
            self.put_u8(4);
            self.put_i32(n);
        }
    }

    /// Write one tagged value.
    pub fn put_value(&mut self, value: &Value) {
        match value {
            Value::Null => self.put_u8(0),
            Value::Bool(b) => {
                self.put_u8(1);
                self.put_bool(*b);
            }
            Value::Int8(n) => self.put_narrowed_int(i32::from(*n)),
            Value::Int16(n) => self.put_narrowed_int(i32::from(*n)),
            Value::Int32(n) => self.put_narrowed_int(*n),
            Value::Int64(n) => {
                self.put_u8(5);
                self.put_i64(*n);
            }
            Value::Float32(n) => {
                self.put_u8(6);
                self.put_f32(*n);
            }
            Value::Float64(n) => {
                self.put_u8(7);
                self.put_f64(*n);
            }
            Value::Str(s) => {
                self.put_u8(8);
                self.put_string(s);
            }
            Value::Vec3(v) => {
                self.put_u8(9);
                self.put_vec3(*v);
            }
            Value::Quat(q) => {
                self.put_u8(10);
                self.put_quat(*q);
            }
            Value::Array(items) => {
                self.put_u8(11);
                self.put_i32(items.len() as i32);
                for item in items {
                    self.put_value(item);
                }
            }
            Value::Map(map) => {
                self.put_u8(12);
                self.put_map(map);
            }
        }
    }

    fn put_map(&mut self, map: &ValueMap) {
        self.put_i32(map.len() as i32);
        for (key, value) in map.iter() {
            self.put_string(key);
            self.put_value(value);
        }
    }

    /// Write a full binary envelope: `[kind:u8][timestamp:i64][payload]`.
    pub fn put_envelope(&mut self, envelope: &Envelope) {
        self.put_u8(envelope.kind);
        self.put_i64(envelope.timestamp);
        self.put_value(&envelope.payload);
    }
}
