//! Special purpose de-serialization for 9P messages

use super::buffer::{Error, MessageBuffer, Result};
use core::fmt::Display;
use serde::{de, de::IntoDeserializer};

pub struct WireDeserializer<'d> {
    input: &'d mut MessageBuffer,
}

impl<'a> WireDeserializer<'a> {
    pub fn new(input: &'a mut MessageBuffer) -> Self {
        WireDeserializer { input }
    }
}

impl de::Error for Error {
    fn custom<T: Display>(_msg: T) -> Self {
        Error::Deserialize
    }
}

macro_rules! take_le_bytes {
    ($input:expr, $num:ty, $len:expr) => {{
        let mut bytes = [0u8; $len];
        bytes[..].copy_from_slice($input.front_bytes($len)?);
        $input.pop_front_bytes($len);
        Ok::<$num, Error>(<$num>::from_le_bytes(bytes))
    }};
}

impl<'d> WireDeserializer<'d> {
    fn take_u16(&mut self) -> Result<u16> {
        take_le_bytes!(self.input, u16, 2)
    }

    fn take_u32(&mut self) -> Result<u32> {
        take_le_bytes!(self.input, u32, 4)
    }

    fn take_string(&mut self) -> Result<String> {
        let len = self.take_u16()? as usize;
        let bytes = self.input.pop_front_vec(len)?;
        String::from_utf8(bytes).map_err(|_| Error::InvalidValue)
    }

    fn take_blob(&mut self) -> Result<Vec<u8>> {
        let len = self.take_u32()? as usize;
        self.input.pop_front_vec(len)
    }
}

struct SeqAccess<'d, 'a> {
    deserializer: &'a mut WireDeserializer<'d>,
    len: usize,
}

impl<'d, 'a> de::SeqAccess<'d> for SeqAccess<'d, 'a> {
    type Error = Error;

    fn size_hint(&self) -> Option<usize> {
        Some(self.len)
    }

    fn next_element_seed<S>(&mut self, seed: S) -> Result<Option<S::Value>>
    where
        S: de::DeserializeSeed<'d>,
    {
        if self.len > 0 {
            self.len -= 1;
            Ok(Some(de::DeserializeSeed::deserialize(
                seed,
                &mut *self.deserializer,
            )?))
        } else {
            Ok(None)
        }
    }
}

impl<'d, 'a> de::Deserializer<'d> for &'a mut WireDeserializer<'d> {
    type Error = Error;

    fn is_human_readable(&self) -> bool {
        false
    }

    fn deserialize_any<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_byte_buf<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_byte_buf(self.take_blob()?)
    }

    fn deserialize_bytes<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_byte_buf(self.take_blob()?)
    }

    fn deserialize_char<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_f32<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_f64<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_identifier<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_ignored_any<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_str<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_string(self.take_string()?)
    }

    fn deserialize_string<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_string(self.take_string()?)
    }

    fn deserialize_u16<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u16(take_le_bytes!(self.input, u16, 2)?)
    }

    fn deserialize_i16<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i16(take_le_bytes!(self.input, i16, 2)?)
    }

    fn deserialize_u32<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u32(take_le_bytes!(self.input, u32, 4)?)
    }

    fn deserialize_i32<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i32(take_le_bytes!(self.input, i32, 4)?)
    }

    fn deserialize_u64<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u64(take_le_bytes!(self.input, u64, 8)?)
    }

    fn deserialize_i64<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i64(take_le_bytes!(self.input, i64, 8)?)
    }

    fn deserialize_u8<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_u8(self.input.pop_front_byte()?)
    }

    fn deserialize_i8<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_i8(self.input.pop_front_byte()? as i8)
    }

    fn deserialize_bool<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        match self.input.pop_front_byte()? {
            0 => visitor.visit_bool(false),
            1 => visitor.visit_bool(true),
            _ => Err(Error::InvalidValue),
        }
    }

    fn deserialize_option<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_unit<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_unit_struct<V: de::Visitor<'d>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_unit()
    }

    fn deserialize_map<V: de::Visitor<'d>>(self, _visitor: V) -> Result<V::Value> {
        Err(Error::Unimplemented)
    }

    fn deserialize_seq<V: de::Visitor<'d>>(self, visitor: V) -> Result<V::Value> {
        let len = self.take_u16()? as usize;
        visitor.visit_seq(SeqAccess {
            deserializer: self,
            len,
        })
    }

    fn deserialize_tuple<V: de::Visitor<'d>>(self, len: usize, visitor: V) -> Result<V::Value> {
        visitor.visit_seq(SeqAccess {
            deserializer: self,
            len,
        })
    }

    fn deserialize_tuple_struct<V: de::Visitor<'d>>(
        self,
        _name: &'static str,
        len: usize,
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_tuple(len, visitor)
    }

    fn deserialize_enum<V: de::Visitor<'d>>(
        self,
        _name: &'static str,
        _variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_enum(self)
    }

    fn deserialize_newtype_struct<V: de::Visitor<'d>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_struct<V: de::Visitor<'d>>(
        self,
        _name: &'static str,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        self.deserialize_tuple(fields.len(), visitor)
    }
}

impl<'d, 'a> de::VariantAccess<'d> for &'a mut WireDeserializer<'d> {
    type Error = Error;

    fn unit_variant(self) -> Result<()> {
        Ok(())
    }

    fn newtype_variant_seed<V: de::DeserializeSeed<'d>>(self, seed: V) -> Result<V::Value> {
        de::DeserializeSeed::deserialize(seed, self)
    }

    fn tuple_variant<V: de::Visitor<'d>>(self, len: usize, visitor: V) -> Result<V::Value> {
        de::Deserializer::deserialize_tuple(self, len, visitor)
    }

    fn struct_variant<V: de::Visitor<'d>>(
        self,
        fields: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value> {
        de::Deserializer::deserialize_tuple(self, fields.len(), visitor)
    }
}

impl<'d, 'a> de::EnumAccess<'d> for &'a mut WireDeserializer<'d> {
    type Error = Error;
    type Variant = Self;

    fn variant_seed<V: de::DeserializeSeed<'d>>(self, seed: V) -> Result<(V::Value, Self)> {
        let variant_index = self.input.pop_front_byte()?;
        let variant = (variant_index as u32).into_deserializer();
        let v = de::DeserializeSeed::deserialize(seed, variant)?;
        Ok((v, self))
    }
}
