use crate::{buffer::MessageBuffer, *};

#[test]
fn bools() {
    let mut buf = MessageBuffer::new();
    buf.push_back(&true).unwrap();
    assert_eq!(buf.as_slice(), &[1]);
    assert_eq!(buf.pop_front::<bool>(), Ok(true));
    assert!(buf.is_empty());
    buf.push_back_byte(2).unwrap();
    assert_eq!(buf.pop_front::<bool>(), Err(buffer::Error::InvalidValue));
    assert_eq!(buf.as_slice(), &[2]);
}

#[test]
fn short_reads_rewind() {
    let mut buf = MessageBuffer::from_bytes(&[0x05, 0x00, b'a', b'b']);
    assert_eq!(buf.pop_front::<String>(), Err(buffer::Error::UnexpectedEnd));
    assert_eq!(buf.len(), 4);
    buf.extend_bytes(b"cde").unwrap();
    assert_eq!(buf.pop_front::<String>(), Ok("abcde".to_string()));
    assert!(buf.is_empty());
}

#[test]
fn invalid_utf8() {
    let mut buf = MessageBuffer::from_bytes(&[0x01, 0x00, 0xff]);
    assert_eq!(buf.pop_front::<String>(), Err(buffer::Error::InvalidValue));
}

#[test]
fn unsupported_types() {
    let mut buf = MessageBuffer::new();
    assert_eq!(buf.push_back(&'n'), Err(buffer::Error::Unimplemented));
    assert_eq!(buf.push_back(&1.0f32), Err(buffer::Error::Unimplemented));
    assert_eq!(buf.push_back(&Some(1u8)), Err(buffer::Error::Unimplemented));
    assert!(buf.is_empty());
}

macro_rules! check {
    ($name:ident, $msg:expr, $t:ty, $bytes:expr) => {
        #[test]
        fn $name() {
            let mut buf = MessageBuffer::new();
            let msg: $t = $msg;
            let bytes: &[u8] = &$bytes;
            buf.push_back(&msg).unwrap();
            assert_eq!(buf.as_slice(), bytes);
            assert_eq!(buf.pop_front::<$t>(), Ok(msg));
            assert!(buf.is_empty());
        }
    };
}

check!(u8_1, 0x42, u8, [0x42]);
check!(u16_1, 0x1234, u16, [0x34, 0x12]);
check!(u32_1, 0x12345678, u32, [0x78, 0x56, 0x34, 0x12]);
check!(
    u64_1,
    0x0102030405060708,
    u64,
    [0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]
);
check!(i32_1, -1, i32, [0xff, 0xff, 0xff, 0xff]);
check!(string_1, "9P2000.L".to_string(), String, [
    0x08, 0x00, b'9', b'P', b'2', b'0', b'0', b'0', b'.', b'L'
]);
check!(string_empty, String::new(), String, [0x00, 0x00]);
check!(data_1, Data(vec![1, 2, 3]), Data, [
    0x03, 0x00, 0x00, 0x00, 1, 2, 3
]);
check!(
    names_1,
    vec!["a".to_string(), "bc".to_string()],
    Vec<String>,
    [0x02, 0x00, 0x01, 0x00, b'a', 0x02, 0x00, b'b', b'c']
);
check!(
    qid_1,
    Qid {
        ty: qid_type::DIR,
        version: 0,
        path: 0x2a
    },
    Qid,
    [0x80, 0, 0, 0, 0, 0x2a, 0, 0, 0, 0, 0, 0, 0]
);
check!(
    tversion_1,
    Tversion {
        msize: 8192,
        version: VERSION_9P2000_L.to_string()
    },
    Tversion,
    [0x00, 0x20, 0x00, 0x00, 0x08, 0x00, b'9', b'P', b'2', b'0', b'0', b'0', b'.', b'L']
);
check!(rflush_1, Rflush, Rflush, []);
check!(rlerror_1, Rlerror { ecode: 30 }, Rlerror, [30, 0, 0, 0]);

#[test]
fn version_frame() {
    let msg = Request::Tversion(Tversion {
        msize: 8192,
        version: VERSION_9P2000_L.to_string(),
    });
    let bytes = msg.encode(NOTAG).unwrap();
    assert_eq!(
        bytes,
        vec![
            21, 0, 0, 0, 100, 0xff, 0xff, 0x00, 0x20, 0x00, 0x00, 0x08, 0x00, b'9', b'P', b'2',
            b'0', b'0', b'0', b'.', b'L'
        ]
    );
    let (tag, decoded) = Request::decode_frame(&bytes).unwrap();
    assert_eq!(tag, NOTAG);
    assert_eq!(decoded, msg);
}

#[test]
fn walk_frame() {
    let msg = Request::Twalk(Twalk {
        fid: 1,
        newfid: 2,
        wnames: vec!["rootfs".to_string(), "etc".to_string()],
    });
    let bytes = msg.encode(7).unwrap();
    let header = Header::parse(&bytes).unwrap();
    assert_eq!(header.size as usize, bytes.len());
    assert_eq!(header.message_type, 110);
    assert_eq!(header.tag, 7);
    assert_eq!(header.body_len(), 4 + 4 + 2 + 8 + 5);
    assert_eq!(Request::decode(&header, &bytes[HEADER_LEN..]), Ok(msg));
}

#[test]
fn getattr_reply_size() {
    let msg = Response::Rgetattr(Rgetattr {
        valid: getattr::BASIC,
        qid: Qid {
            ty: qid_type::FILE,
            version: 0,
            path: 9,
        },
        mode: 0o100644,
        size: 12,
        ..Default::default()
    });
    let bytes = msg.encode(3).unwrap();
    // header, valid, qid, mode uid gid, then fifteen 64-bit fields
    assert_eq!(bytes.len(), HEADER_LEN + 8 + Qid::ENCODED_LEN + 12 + 15 * 8);
    assert_eq!(Response::decode_frame(&bytes), Ok((3, msg)));
}

#[test]
fn statfs_reply_size() {
    let msg = Response::Rstatfs(Rstatfs {
        ty: 0x01021997,
        bsize: 53248,
        blocks: 0,
        bfree: 0,
        bavail: 0,
        files: 0,
        ffree: 0,
        fsid: 0,
        namelen: 255,
    });
    let bytes = msg.encode(1).unwrap();
    assert_eq!(bytes.len(), HEADER_LEN + 4 + 4 + 6 * 8 + 4);
    assert_eq!(&bytes[HEADER_LEN..HEADER_LEN + 4], &[0x97, 0x19, 0x02, 0x01]);
}

#[test]
fn unknown_type() {
    let bytes = [7, 0, 0, 0, 99, 1, 0];
    assert_eq!(
        Request::decode_frame(&bytes),
        Err(buffer::Error::UnknownMessageType(99))
    );
}

#[test]
fn truncated_frame() {
    assert_eq!(Header::parse(&[1, 0, 0]), Err(buffer::Error::UnexpectedEnd));
    assert_eq!(
        Header::parse(&[3, 0, 0, 0, 100, 0, 0]),
        Err(buffer::Error::InvalidValue)
    );
    let bytes = Request::Tclunk(Tclunk { fid: 5 }).encode(2).unwrap();
    assert_eq!(
        Request::decode_frame(&bytes[..bytes.len() - 1]),
        Err(buffer::Error::UnexpectedEnd)
    );
}

#[test]
fn dirents() {
    let entries = vec![
        Dirent {
            qid: Qid {
                ty: qid_type::DIR,
                version: 0,
                path: 1,
            },
            offset: 1,
            ty: 4,
            name: ".".to_string(),
        },
        Dirent {
            qid: Qid {
                ty: qid_type::FILE,
                version: 0,
                path: 2,
            },
            offset: 2,
            ty: 8,
            name: "hello".to_string(),
        },
    ];
    let mut buf = MessageBuffer::new();
    for entry in &entries {
        buf.push_back(entry).unwrap();
    }
    let bytes = buf.into_vec();
    assert_eq!(bytes.len(), entries[0].encoded_len() + entries[1].encoded_len());
    assert_eq!(Dirent::decode_all(&bytes), Ok(entries));
}
