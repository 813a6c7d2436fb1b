//! Byte queue for converting between 9P messages and bytes

use super::{de, ser};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Error {
    Unimplemented,
    UnexpectedEnd,
    BufferFull,
    InvalidValue,
    Serialize,
    Deserialize,
    UnknownMessageType(u8),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Default, Debug, Clone)]
pub struct MessageBuffer {
    bytes: Vec<u8>,
    pos: usize,
}

impl MessageBuffer {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        MessageBuffer {
            bytes: bytes.to_vec(),
            pos: 0,
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[self.pos..]
    }

    pub fn len(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_vec(mut self) -> Vec<u8> {
        self.bytes.drain(..self.pos);
        self.bytes
    }

    pub fn push_back<T: Serialize>(&mut self, message: &T) -> Result<()> {
        let saved_len = self.bytes.len();
        let mut serializer = ser::WireSerializer::new(self);
        let result = message.serialize(&mut serializer);
        if result.is_err() {
            self.bytes.truncate(saved_len);
        }
        result
    }

    pub fn pop_front<T: DeserializeOwned>(&mut self) -> Result<T> {
        let saved_pos = self.pos;
        let mut deserializer = de::WireDeserializer::new(self);
        let result = T::deserialize(&mut deserializer);
        if result.is_err() {
            // Rewind the pop on error, to recover after a partial read
            self.pos = saved_pos;
        }
        result
    }

    pub fn extend_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    pub fn push_back_byte(&mut self, data: u8) -> Result<()> {
        self.bytes.push(data);
        Ok(())
    }

    pub fn front_bytes(&self, len: usize) -> Result<&[u8]> {
        let slice = self.as_slice();
        if len <= slice.len() {
            Ok(&slice[..len])
        } else {
            Err(Error::UnexpectedEnd)
        }
    }

    pub fn pop_front_bytes(&mut self, len: usize) {
        self.pos += len;
        assert!(self.pos <= self.bytes.len());
    }

    pub fn pop_front_byte(&mut self) -> Result<u8> {
        let result = self.front_bytes(1)?[0];
        self.pop_front_bytes(1);
        Ok(result)
    }

    pub fn pop_front_vec(&mut self, len: usize) -> Result<Vec<u8>> {
        let result = self.front_bytes(len)?.to_vec();
        self.pop_front_bytes(len);
        Ok(result)
    }
}
