use crate::{
    buffer::{Error, MessageBuffer, Result},
    types::*,
};
use core::convert::TryFrom;

/// Fixed size of the `size[4] type[1] tag[2]` frame header
pub const HEADER_LEN: usize = 7;

/// Parsed frame header
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub size: u32,
    pub message_type: u8,
    pub tag: u16,
}

impl Header {
    pub fn parse(bytes: &[u8]) -> Result<Header> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::UnexpectedEnd);
        }
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[0..4]);
        let mut tag = [0u8; 2];
        tag.copy_from_slice(&bytes[5..7]);
        let header = Header {
            size: u32::from_le_bytes(size),
            message_type: bytes[4],
            tag: u16::from_le_bytes(tag),
        };
        if (header.size as usize) < HEADER_LEN {
            Err(Error::InvalidValue)
        } else {
            Ok(header)
        }
    }

    /// Length of the message body that follows this header
    pub fn body_len(&self) -> usize {
        self.size as usize - HEADER_LEN
    }
}

macro_rules! message_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $code:expr,)* }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Eq, PartialEq)]
        pub enum $name {
            $($variant($variant),)*
        }

        impl $name {
            pub fn message_type(&self) -> u8 {
                match self {
                    $($name::$variant(_) => $code,)*
                }
            }

            /// Serialize this message into a complete frame
            pub fn encode(&self, tag: u16) -> Result<Vec<u8>> {
                let mut buf = MessageBuffer::new();
                buf.extend_bytes(&[0, 0, 0, 0, self.message_type()])?;
                buf.extend_bytes(&tag.to_le_bytes())?;
                match self {
                    $($name::$variant(m) => buf.push_back(m)?,)*
                }
                let mut bytes = buf.into_vec();
                let size = u32::try_from(bytes.len()).map_err(|_| Error::BufferFull)?;
                bytes[0..4].copy_from_slice(&size.to_le_bytes());
                Ok(bytes)
            }

            /// Deserialize a message body, given its already parsed header.
            /// Bytes beyond the fields we know about are ignored.
            pub fn decode(header: &Header, body: &[u8]) -> Result<Self> {
                let mut buf = MessageBuffer::from_bytes(body);
                match header.message_type {
                    $($code => Ok($name::$variant(buf.pop_front()?)),)*
                    other => Err(Error::UnknownMessageType(other)),
                }
            }

            /// Deserialize a complete frame, returning its tag and message
            pub fn decode_frame(frame: &[u8]) -> Result<(u16, Self)> {
                let header = Header::parse(frame)?;
                if frame.len() < header.size as usize {
                    return Err(Error::UnexpectedEnd);
                }
                let body = &frame[HEADER_LEN..header.size as usize];
                Ok((header.tag, Self::decode(&header, body)?))
            }
        }
    };
}

message_enum!(
    /// Any message sent from the client to the server
    Request {
        Tstatfs = 8,
        Tlopen = 12,
        Tlcreate = 14,
        Tsymlink = 16,
        Tmknod = 18,
        Trename = 20,
        Treadlink = 22,
        Tgetattr = 24,
        Tsetattr = 26,
        Txattrwalk = 30,
        Txattrcreate = 32,
        Treaddir = 40,
        Tfsync = 50,
        Tlock = 52,
        Tgetlock = 54,
        Tlink = 70,
        Tmkdir = 72,
        Trenameat = 74,
        Tunlinkat = 76,
        Tversion = 100,
        Tauth = 102,
        Tattach = 104,
        Tflush = 108,
        Twalk = 110,
        Tread = 116,
        Twrite = 118,
        Tclunk = 120,
        Tremove = 122,
    }
);

message_enum!(
    /// Any message sent from the server back to the client
    Response {
        Rlerror = 7,
        Rstatfs = 9,
        Rlopen = 13,
        Rlcreate = 15,
        Rsymlink = 17,
        Rmknod = 19,
        Rrename = 21,
        Rreadlink = 23,
        Rgetattr = 25,
        Rsetattr = 27,
        Rxattrwalk = 31,
        Rxattrcreate = 33,
        Rreaddir = 41,
        Rfsync = 51,
        Rlock = 53,
        Rgetlock = 55,
        Rlink = 71,
        Rmkdir = 73,
        Rrenameat = 75,
        Runlinkat = 77,
        Rversion = 101,
        Rauth = 103,
        Rattach = 105,
        Rflush = 109,
        Rwalk = 111,
        Rread = 117,
        Rwrite = 119,
        Rclunk = 121,
        Rremove = 123,
    }
);

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tstatfs {
    pub fid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tlopen {
    pub fid: u32,
    pub flags: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tlcreate {
    pub fid: u32,
    pub name: String,
    pub flags: u32,
    pub mode: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tsymlink {
    pub fid: u32,
    pub name: String,
    pub symtgt: String,
    pub gid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tmknod {
    pub dfid: u32,
    pub name: String,
    pub mode: u32,
    pub major: u32,
    pub minor: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Trename {
    pub fid: u32,
    pub dfid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Treadlink {
    pub fid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tgetattr {
    pub fid: u32,
    pub request_mask: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tsetattr {
    pub fid: u32,
    pub valid: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime_sec: u64,
    pub atime_nsec: u64,
    pub mtime_sec: u64,
    pub mtime_nsec: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Txattrwalk {
    pub fid: u32,
    pub newfid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Txattrcreate {
    pub fid: u32,
    pub name: String,
    pub attr_size: u64,
    pub flags: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Treaddir {
    pub fid: u32,
    pub offset: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tfsync {
    pub fid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tlock {
    pub fid: u32,
    pub ty: u8,
    pub flags: u32,
    pub start: u64,
    pub length: u64,
    pub proc_id: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tgetlock {
    pub fid: u32,
    pub ty: u8,
    pub start: u64,
    pub length: u64,
    pub proc_id: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tlink {
    pub dfid: u32,
    pub fid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tmkdir {
    pub dfid: u32,
    pub name: String,
    pub mode: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Trenameat {
    pub olddirfid: u32,
    pub oldname: String,
    pub newdirfid: u32,
    pub newname: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tunlinkat {
    pub dirfid: u32,
    pub name: String,
    pub flags: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tversion {
    pub msize: u32,
    pub version: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tauth {
    pub afid: u32,
    pub uname: String,
    pub aname: String,
    pub n_uname: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tattach {
    pub fid: u32,
    pub afid: u32,
    pub uname: String,
    pub aname: String,
    pub n_uname: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tflush {
    pub oldtag: u16,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Twalk {
    pub fid: u32,
    pub newfid: u32,
    pub wnames: Vec<String>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tread {
    pub fid: u32,
    pub offset: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Twrite {
    pub fid: u32,
    pub offset: u64,
    pub data: Data,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tclunk {
    pub fid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Tremove {
    pub fid: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rlerror {
    pub ecode: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rstatfs {
    pub ty: u32,
    pub bsize: u32,
    pub blocks: u64,
    pub bfree: u64,
    pub bavail: u64,
    pub files: u64,
    pub ffree: u64,
    pub fsid: u64,
    pub namelen: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rlopen {
    pub qid: Qid,
    pub iounit: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rreadlink {
    pub target: String,
}

#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rgetattr {
    pub valid: u64,
    pub qid: Qid,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub nlink: u64,
    pub rdev: u64,
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime_sec: u64,
    pub atime_nsec: u64,
    pub mtime_sec: u64,
    pub mtime_nsec: u64,
    pub ctime_sec: u64,
    pub ctime_nsec: u64,
    pub btime_sec: u64,
    pub btime_nsec: u64,
    pub gen: u64,
    pub data_version: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rxattrwalk {
    pub size: u64,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rreaddir {
    pub data: Data,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rversion {
    pub msize: u32,
    pub version: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rattach {
    pub qid: Qid,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rflush;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rwalk {
    pub wqids: Vec<Qid>,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rread {
    pub data: Data,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rclunk;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rlcreate {
    pub qid: Qid,
    pub iounit: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rsymlink {
    pub qid: Qid,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rmknod {
    pub qid: Qid,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rrename;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rsetattr;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rxattrcreate;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rfsync;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rlock {
    pub status: u8,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rgetlock {
    pub ty: u8,
    pub start: u64,
    pub length: u64,
    pub proc_id: u32,
    pub client_id: String,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rlink;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rmkdir {
    pub qid: Qid,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rrenameat;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Runlinkat;

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rauth {
    pub aqid: Qid,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rwrite {
    pub count: u32,
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rremove;
