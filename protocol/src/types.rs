use crate::buffer::{MessageBuffer, Result};
use core::fmt;
use serde::{de, ser};

/// Protocol version string for the Linux dialect of 9P
pub const VERSION_9P2000_L: &str = "9P2000.L";

/// Reply version string for any dialect we don't speak
pub const VERSION_UNKNOWN: &str = "unknown";

/// Tag value used by Tversion, which is outside the normal tag space
pub const NOTAG: u16 = 0xffff;

/// Fid value meaning "no fid", used for afid in Tattach
pub const NOFID: u32 = !0u32;

/// Bits for the type field of a [Qid]
pub mod qid_type {
    pub const DIR: u8 = 0x80;
    pub const APPEND: u8 = 0x40;
    pub const EXCL: u8 = 0x20;
    pub const MOUNT: u8 = 0x10;
    pub const AUTH: u8 = 0x08;
    pub const TMP: u8 = 0x04;
    pub const SYMLINK: u8 = 0x02;
    pub const LINK: u8 = 0x01;
    pub const FILE: u8 = 0x00;
}

/// Request and valid masks for Tgetattr / Rgetattr
pub mod getattr {
    pub const MODE: u64 = 0x0000_0001;
    pub const NLINK: u64 = 0x0000_0002;
    pub const UID: u64 = 0x0000_0004;
    pub const GID: u64 = 0x0000_0008;
    pub const RDEV: u64 = 0x0000_0010;
    pub const ATIME: u64 = 0x0000_0020;
    pub const MTIME: u64 = 0x0000_0040;
    pub const CTIME: u64 = 0x0000_0080;
    pub const INO: u64 = 0x0000_0100;
    pub const SIZE: u64 = 0x0000_0200;
    pub const BLOCKS: u64 = 0x0000_0400;
    pub const BASIC: u64 = 0x0000_07ff;
    pub const ALL: u64 = 0x0000_3fff;
}

/// Server-unique identity of a file: type bits, version, and path number
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Qid {
    pub ty: u8,
    pub version: u32,
    pub path: u64,
}

impl Qid {
    pub const ENCODED_LEN: usize = 13;

    pub fn is_dir(&self) -> bool {
        self.ty & qid_type::DIR != 0
    }
}

/// Variable length binary payload, encoded with a 32-bit length
#[derive(Clone, Default, Eq, PartialEq)]
pub struct Data(pub Vec<u8>);

impl fmt::Debug for Data {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Data({} bytes)", self.0.len())
    }
}

impl ser::Serialize for Data {
    fn serialize<S: ser::Serializer>(&self, serializer: S) -> core::result::Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'d> de::Deserialize<'d> for Data {
    fn deserialize<D: de::Deserializer<'d>>(deserializer: D) -> core::result::Result<Self, D::Error> {
        struct DataVisitor;
        impl<'d> de::Visitor<'d> for DataVisitor {
            type Value = Data;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a length-prefixed byte string")
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> core::result::Result<Data, E> {
                Ok(Data(v))
            }

            fn visit_bytes<E>(self, v: &[u8]) -> core::result::Result<Data, E> {
                Ok(Data(v.to_vec()))
            }
        }
        deserializer.deserialize_byte_buf(DataVisitor)
    }
}

/// One directory entry inside the payload of an Rreaddir
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Dirent {
    pub qid: Qid,
    pub offset: u64,
    pub ty: u8,
    pub name: String,
}

impl Dirent {
    /// Size of this entry once encoded
    pub fn encoded_len(&self) -> usize {
        Qid::ENCODED_LEN + 8 + 1 + 2 + self.name.len()
    }

    /// Decode a packed sequence of entries, as found in [crate::Rreaddir]
    pub fn decode_all(bytes: &[u8]) -> Result<Vec<Dirent>> {
        let mut buf = MessageBuffer::from_bytes(bytes);
        let mut result = Vec::new();
        while !buf.is_empty() {
            result.push(buf.pop_front()?);
        }
        Ok(result)
    }
}
