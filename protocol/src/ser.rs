//! Special purpose serialization for 9P messages
//!
//! Integers are little-endian, strings carry a 16-bit length, sequences a
//! 16-bit element count, and byte blobs a 32-bit length.

use super::buffer::{Error, MessageBuffer, Result};
use core::{convert::TryFrom, fmt::Display};
use serde::ser;

pub struct WireSerializer<'a> {
    output: &'a mut MessageBuffer,
}

impl<'a> WireSerializer<'a> {
    pub fn new(output: &'a mut MessageBuffer) -> Self {
        WireSerializer { output }
    }
}

impl ser::Error for Error {
    fn custom<T: Display>(_msg: T) -> Self {
        Error::Serialize
    }
}

macro_rules! to_le_bytes {
    ($gen_fn:ident, $num:ty ) => {
        fn $gen_fn(self, v: $num) -> Result<()> {
            self.output.extend_bytes(&v.to_le_bytes())
        }
    };
}

impl<'a, 'b> ser::Serializer for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;
    type SerializeSeq = Self;
    type SerializeTuple = Self;
    type SerializeTupleStruct = Self;
    type SerializeTupleVariant = Self;
    type SerializeMap = Self;
    type SerializeStruct = Self;
    type SerializeStructVariant = Self;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn collect_str<T: ?Sized + Display>(self, _v: &T) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_bool(self, v: bool) -> Result<()> {
        self.output.push_back_byte(v as u8)
    }

    fn serialize_f32(self, _v: f32) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_f64(self, _v: f64) -> Result<()> {
        Err(Error::Unimplemented)
    }

    to_le_bytes!(serialize_u16, u16);
    to_le_bytes!(serialize_i16, i16);
    to_le_bytes!(serialize_u32, u32);
    to_le_bytes!(serialize_i32, i32);
    to_le_bytes!(serialize_u64, u64);
    to_le_bytes!(serialize_i64, i64);

    fn serialize_none(self) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_some<T: ?Sized + ser::Serialize>(self, _v: &T) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_i8(self, v: i8) -> Result<()> {
        self.output.push_back_byte(v as u8)
    }

    fn serialize_u8(self, v: u8) -> Result<()> {
        self.output.push_back_byte(v)
    }

    fn serialize_unit(self) -> Result<()> {
        Ok(())
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<()> {
        self.serialize_unit()
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        variant_index: u32,
        _var: &'static str,
    ) -> Result<()> {
        match u8::try_from(variant_index) {
            Ok(byte) => self.output.push_back_byte(byte),
            Err(_) => Err(Error::InvalidValue),
        }
    }

    fn serialize_char(self, _v: char) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_str(self, v: &str) -> Result<()> {
        let len = u16::try_from(v.len()).map_err(|_| Error::BufferFull)?;
        self.output.extend_bytes(&len.to_le_bytes())?;
        self.output.extend_bytes(v.as_bytes())
    }

    fn serialize_bytes(self, v: &[u8]) -> Result<()> {
        let len = u32::try_from(v.len()).map_err(|_| Error::BufferFull)?;
        self.output.extend_bytes(&len.to_le_bytes())?;
        self.output.extend_bytes(v)
    }

    fn serialize_newtype_struct<T>(self, _: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(self)
    }

    fn serialize_newtype_variant<T>(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        self.serialize_unit_variant(name, variant_index, variant)?;
        value.serialize(self)
    }

    fn serialize_tuple_struct(self, _name: &'static str, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self> {
        let len = len.ok_or(Error::Unimplemented)?;
        let count = u16::try_from(len).map_err(|_| Error::BufferFull)?;
        self.output.extend_bytes(&count.to_le_bytes())?;
        Ok(self)
    }

    fn serialize_tuple(self, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self> {
        Err(Error::Unimplemented)
    }

    fn serialize_struct(self, _name: &'static str, _len: usize) -> Result<Self> {
        Ok(self)
    }

    fn serialize_tuple_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self> {
        self.serialize_unit_variant(name, variant_index, variant)?;
        Ok(self)
    }

    fn serialize_struct_variant(
        self,
        name: &'static str,
        variant_index: u32,
        variant: &'static str,
        _len: usize,
    ) -> Result<Self> {
        self.serialize_unit_variant(name, variant_index, variant)?;
        Ok(self)
    }
}

impl<'a, 'b> ser::SerializeSeq for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b> ser::SerializeTuple for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_element<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b> ser::SerializeTupleStruct for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b> ser::SerializeTupleVariant for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T: ?Sized + ser::Serialize>(&mut self, value: &T) -> Result<()> {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b> ser::SerializeMap for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_key<T: ?Sized + ser::Serialize>(&mut self, _key: &T) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn serialize_value<T: ?Sized + ser::Serialize>(&mut self, _value: &T) -> Result<()> {
        Err(Error::Unimplemented)
    }

    fn end(self) -> Result<()> {
        Err(Error::Unimplemented)
    }
}

impl<'a, 'b> ser::SerializeStruct for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _name: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}

impl<'a, 'b> ser::SerializeStructVariant for &'b mut WireSerializer<'a> {
    type Ok = ();
    type Error = Error;

    fn serialize_field<T>(&mut self, _name: &'static str, value: &T) -> Result<()>
    where
        T: ?Sized + ser::Serialize,
    {
        value.serialize(&mut **self)
    }

    fn end(self) -> Result<()> {
        Ok(())
    }
}
