use super::*;
use crate::{
    errors::VFSError,
    filesystem::vfs::{mode, FileData, Filesystem, Stat},
    server::{bind::BindNode, node::V9FS_MAGIC, session::MAX_MSIZE},
};
use bytes::Bytes;
use layerfs_protocol::*;
use std::{ffi::OsStr, path::Path};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    runtime::Runtime,
    task::JoinHandle,
};

const PASSWD: &[u8] = b"root:x:0:0:root:/root:/bin/sh\nnobody:x:65534:65534::/:/sbin/nologin\n";

fn tree(files: &[(&str, &'static [u8])]) -> Arc<Filesystem> {
    let mut fs = Filesystem::new();
    for (path, content) in files {
        fs.writer()
            .write_file(
                Path::new(path),
                Stat {
                    st_mode: mode::S_IFREG | 0o644,
                    st_size: content.len() as u64,
                    ..Default::default()
                },
                FileData::Memory(Bytes::from_static(content)),
            )
            .unwrap();
    }
    fs.writer()
        .write_symlink(
            Path::new("lib"),
            Stat {
                st_mode: mode::S_IFLNK | 0o777,
                ..Default::default()
            },
            OsStr::new("usr/lib"),
        )
        .unwrap();
    fs.finalize().unwrap();
    Arc::new(fs)
}

fn route() -> Arc<RouteNode> {
    let rootfs = tree(&[("etc/passwd", PASSWD), ("etc/hostname", b"layerfs\n")]);
    let config = tree(&[("config.json", b"{}")]);
    RouteNode::new(
        vec![
            ("rootfs".to_owned(), Arc::new(FsNode::root(rootfs)) as Arc<dyn File>),
            ("config".to_owned(), Arc::new(FsNode::root(config)) as Arc<dyn File>),
        ],
        Arc::new(QidSpace::new()),
    )
}

fn names(entries: &[Dirent]) -> Vec<&str> {
    entries.iter().map(|e| e.name.as_str()).collect()
}

fn walk_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn qid_space_is_stable() {
    let qids = QidSpace::new();
    let local = Qid {
        ty: qid_type::FILE,
        version: 0,
        path: 7,
    };
    let a = qids.global(1, local);
    let b = qids.global(2, local);
    assert_ne!(a.path, b.path);
    assert_ne!(a.path, 0);
    assert_eq!(qids.global(1, local), a);
    assert_eq!(qids.len(), 2);
    assert_eq!(a.ty, qid_type::FILE);
}

#[test]
fn route_readdir() {
    Runtime::new().unwrap().block_on(async {
        let route = route();
        assert_eq!(route.child_names().collect::<Vec<_>>(), vec!["config", "rootfs"]);

        let all = route.readdir(0, 4096).await.unwrap();
        assert_eq!(names(&all), vec![".", "..", "config", "rootfs"]);
        assert_eq!(
            all.iter().map(|e| e.offset).collect::<Vec<_>>(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(all[0].qid, RouteNode::qid());
        assert!(all[2].qid.is_dir());
        assert_eq!(all[2].ty, mode::DT_DIR);
        assert_ne!(all[2].qid.path, all[3].qid.path);

        let rest = route.readdir(2, 4096).await.unwrap();
        assert_eq!(names(&rest), vec!["config", "rootfs"]);
        assert!(route.readdir(4, 4096).await.unwrap().is_empty());

        let one = all[0].encoded_len() as u32;
        assert_eq!(names(&route.readdir(0, one).await.unwrap()), vec!["."]);
        assert!(route.readdir(0, one - 1).await.unwrap().is_empty());
    });
}

#[test]
fn route_walk() {
    Runtime::new().unwrap().block_on(async {
        let route = route();

        let walked = route
            .walk(&walk_names(&["rootfs", "etc", "passwd"]))
            .await
            .unwrap();
        assert_eq!(walked.qids.len(), 3);
        assert!(walked.qids[0].is_dir());
        assert!(walked.qids[1].is_dir());
        assert!(!walked.qids[2].is_dir());
        let passwd = walked.file.unwrap();
        assert_eq!(&passwd.read_at(0, 4).await.unwrap()[..], b"root");
        let (qid, stat) = passwd.get_attr().await.unwrap();
        assert_eq!(qid, walked.qids[2]);
        assert_eq!(stat.st_size, PASSWD.len() as u64);

        let again = route
            .walk(&walk_names(&["rootfs", "etc", "passwd"]))
            .await
            .unwrap();
        assert_eq!(again.qids, walked.qids);

        let partial = route
            .walk(&walk_names(&["rootfs", "etc", "shadow"]))
            .await
            .unwrap();
        assert_eq!(partial.qids.len(), 2);
        assert!(partial.file.is_none());

        assert_eq!(
            route.walk(&walk_names(&["nope"])).await.err(),
            Some(VFSError::NotFound)
        );

        let up = route.walk(&walk_names(&[".."])).await.unwrap();
        assert_eq!(up.qids, vec![RouteNode::qid()]);
    });
}

#[test]
fn subtree_qids_never_collide() {
    Runtime::new().unwrap().block_on(async {
        let route = route();
        let rootfs = route.walk(&walk_names(&["rootfs"])).await.unwrap();
        let config = route.walk(&walk_names(&["config"])).await.unwrap();
        assert_ne!(rootfs.qids[0].path, config.qids[0].path);
        let hostname = route
            .walk(&walk_names(&["rootfs", "etc", "hostname"]))
            .await
            .unwrap();
        let spec = route
            .walk(&walk_names(&["config", "config.json"]))
            .await
            .unwrap();
        assert_ne!(hostname.qids[2].path, spec.qids[1].path);
    });
}

#[test]
fn fs_node_entries() {
    Runtime::new().unwrap().block_on(async {
        let fs = tree(&[("etc/passwd", PASSWD), ("etc/hostname", b"layerfs\n")]);
        let root = FsNode::root(fs.clone());
        let etc = root.walk(&walk_names(&["etc"])).await.unwrap().file.unwrap();
        let entries = etc.readdir(0, 4096).await.unwrap();
        assert_eq!(names(&entries), vec![".", "..", "hostname", "passwd"]);
        assert_eq!(entries[3].ty, mode::DT_REG);
        assert_eq!(names(&etc.readdir(3, 4096).await.unwrap()), vec!["passwd"]);

        let lib = root.walk(&walk_names(&["lib"])).await.unwrap().file.unwrap();
        assert_eq!(lib.readlink().await.unwrap(), "usr/lib");
        assert_eq!(
            root.walk(&walk_names(&["lib", "x"])).await.unwrap().qids.len(),
            1
        );
        assert_eq!(
            root.walk(&walk_names(&["missing"])).await.err(),
            Some(VFSError::NotFound)
        );
        assert_eq!(root.read_at(0, 1).await.err(), Some(VFSError::FileExpected));
        assert_eq!(root.statfs().await.unwrap().ty, V9FS_MAGIC);
    });
}

#[test]
fn mutators_are_read_only() {
    Runtime::new().unwrap().block_on(async {
        let fs = tree(&[("etc/passwd", PASSWD)]);
        let node: Arc<dyn File> = Arc::new(FsNode::root(fs));
        let bound = BindNode::new(1, node.clone(), Arc::new(QidSpace::new()));
        assert_eq!(bound.mkdir("tmp", 0o755, 0).await.err(), Some(VFSError::ReadOnly));
        assert_eq!(
            bound.create("new", 0, 0o644, 0).await.err(),
            Some(VFSError::ReadOnly)
        );
        assert_eq!(bound.remove().await.err(), Some(VFSError::ReadOnly));
        assert_eq!(
            bound.unlink_at("etc", 0).await.err(),
            Some(VFSError::ReadOnly)
        );
        assert_eq!(
            bound.link(node.clone(), "again").await.err(),
            Some(VFSError::ReadOnly)
        );
        assert_eq!(bound.write_at(0, b"x").await.err(), Some(VFSError::ReadOnly));
        assert_eq!(node.fsync().await.err(), Some(VFSError::ReadOnly));
    });
}

struct Client {
    stream: DuplexStream,
    tag: u16,
}

impl Client {
    fn connect(server: Server) -> (Client, JoinHandle<Result<(), crate::errors::ServerError>>) {
        let (client, remote) = tokio::io::duplex(64 * 1024);
        let task = tokio::spawn(async move { server.serve(remote).await });
        (Client { stream: client, tag: 0 }, task)
    }

    async fn send_frame(&mut self, frame: &[u8]) -> (u16, Response) {
        self.stream.write_all(frame).await.unwrap();
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await.unwrap();
        let header = Header::parse(&header).unwrap();
        let mut body = vec![0u8; header.body_len()];
        self.stream.read_exact(&mut body).await.unwrap();
        (header.tag, Response::decode(&header, &body).unwrap())
    }

    async fn call(&mut self, request: Request) -> Response {
        self.tag += 1;
        let frame = request.encode(self.tag).unwrap();
        let (tag, response) = self.send_frame(&frame).await;
        assert_eq!(tag, self.tag);
        response
    }

    async fn version(&mut self, msize: u32, version: &str) -> Rversion {
        match self
            .call(Request::Tversion(Tversion {
                msize,
                version: version.to_owned(),
            }))
            .await
        {
            Response::Rversion(r) => r,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn attach(&mut self, fid: u32) -> Qid {
        match self
            .call(Request::Tattach(Tattach {
                fid,
                afid: NOFID,
                uname: "root".to_owned(),
                aname: String::new(),
                n_uname: 0,
            }))
            .await
        {
            Response::Rattach(r) => r.qid,
            other => panic!("unexpected {:?}", other),
        }
    }

    async fn walk(&mut self, fid: u32, newfid: u32, names: &[&str]) -> Response {
        self.call(Request::Twalk(Twalk {
            fid,
            newfid,
            wnames: walk_names(names),
        }))
        .await
    }

    async fn open(&mut self, fid: u32, flags: i32) -> Response {
        self.call(Request::Tlopen(Tlopen {
            fid,
            flags: flags as u32,
        }))
        .await
    }

    async fn read(&mut self, fid: u32, offset: u64, count: u32) -> Response {
        self.call(Request::Tread(Tread { fid, offset, count })).await
    }
}

fn errno(response: Response) -> i32 {
    match response {
        Response::Rlerror(r) => r.ecode as i32,
        other => panic!("expected an error, got {:?}", other),
    }
}

#[test]
fn session_reads_files() {
    let _ = env_logger::builder().is_test(true).try_init();
    Runtime::new().unwrap().block_on(async {
        let (mut client, task) = Client::connect(Server::new(route()));

        let version = client.version(8192, "9P2000.L").await;
        assert_eq!(version.msize, 8192);
        assert_eq!(version.version, VERSION_9P2000_L);

        let root = client.attach(0).await;
        assert_eq!(root, RouteNode::qid());

        match client.walk(0, 1, &["rootfs", "etc", "passwd"]).await {
            Response::Rwalk(r) => assert_eq!(r.wqids.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        match client
            .call(Request::Tgetattr(Tgetattr {
                fid: 1,
                request_mask: getattr::BASIC,
            }))
            .await
        {
            Response::Rgetattr(r) => {
                assert_eq!(r.mode, mode::S_IFREG | 0o644);
                assert_eq!(r.size, PASSWD.len() as u64);
                assert_eq!(r.valid, getattr::BASIC);
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(errno(client.read(1, 0, 10).await), libc::EBADF);
        match client.open(1, libc::O_RDONLY).await {
            Response::Rlopen(r) => assert!(!r.qid.is_dir()),
            other => panic!("unexpected {:?}", other),
        }
        match client.read(1, 5, 4).await {
            Response::Rread(r) => assert_eq!(&r.data.0[..], &PASSWD[5..9]),
            other => panic!("unexpected {:?}", other),
        }
        match client.read(1, 0, 1_000_000).await {
            Response::Rread(r) => assert_eq!(&r.data.0[..], PASSWD),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(errno(client.open(1, libc::O_RDONLY).await), libc::EBUSY);
        assert_eq!(errno(client.walk(1, 2, &[]).await), libc::EBUSY);

        match client.walk(0, 3, &["rootfs", "lib"]).await {
            Response::Rwalk(r) => assert_eq!(r.wqids[1].ty, qid_type::SYMLINK),
            other => panic!("unexpected {:?}", other),
        }
        match client.call(Request::Treadlink(Treadlink { fid: 3 })).await {
            Response::Rreadlink(r) => assert_eq!(r.target, "usr/lib"),
            other => panic!("unexpected {:?}", other),
        }

        match client.call(Request::Tclunk(Tclunk { fid: 1 })).await {
            Response::Rclunk(_) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            errno(client.call(Request::Tclunk(Tclunk { fid: 1 })).await),
            libc::EBADF
        );

        drop(client);
        task.await.unwrap().unwrap();
    });
}

#[test]
fn session_lists_directories() {
    Runtime::new().unwrap().block_on(async {
        let (mut client, _task) = Client::connect(Server::new(route()));
        client.version(MAX_MSIZE, "9P2000.L").await;
        client.attach(0).await;
        client.walk(0, 1, &[]).await;
        client.open(1, libc::O_RDONLY | libc::O_DIRECTORY).await;

        let listing = match client
            .call(Request::Treaddir(Treaddir {
                fid: 1,
                offset: 0,
                count: 4096,
            }))
            .await
        {
            Response::Rreaddir(r) => Dirent::decode_all(&r.data.0).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(names(&listing), vec![".", "..", "config", "rootfs"]);

        let last = listing[2].offset;
        let rest = match client
            .call(Request::Treaddir(Treaddir {
                fid: 1,
                offset: last,
                count: 4096,
            }))
            .await
        {
            Response::Rreaddir(r) => Dirent::decode_all(&r.data.0).unwrap(),
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(names(&rest), vec!["rootfs"]);

        match client.call(Request::Tstatfs(Tstatfs { fid: 0 })).await {
            Response::Rstatfs(r) => assert_eq!(r.ty, V9FS_MAGIC),
            other => panic!("unexpected {:?}", other),
        }
    });
}

#[test]
fn session_refuses_changes() {
    Runtime::new().unwrap().block_on(async {
        let (mut client, _task) = Client::connect(Server::new(route()));
        client.version(MAX_MSIZE, "9P2000.L").await;
        client.attach(0).await;
        client.walk(0, 1, &["rootfs", "etc"]).await;
        client.walk(0, 2, &["rootfs", "etc", "hostname"]).await;

        assert_eq!(errno(client.open(2, libc::O_WRONLY).await), libc::EROFS);
        assert_eq!(
            errno(client.open(2, libc::O_RDONLY | libc::O_TRUNC).await),
            libc::EROFS
        );
        assert_eq!(
            errno(
                client
                    .call(Request::Tmkdir(Tmkdir {
                        dfid: 1,
                        name: "new".to_owned(),
                        mode: 0o755,
                        gid: 0,
                    }))
                    .await
            ),
            libc::EROFS
        );
        assert_eq!(
            errno(
                client
                    .call(Request::Tunlinkat(Tunlinkat {
                        dirfid: 1,
                        name: "hostname".to_owned(),
                        flags: 0,
                    }))
                    .await
            ),
            libc::EROFS
        );

        assert_eq!(
            errno(client.call(Request::Tremove(Tremove { fid: 2 })).await),
            libc::EROFS
        );
        assert_eq!(
            errno(
                client
                    .call(Request::Tgetattr(Tgetattr {
                        fid: 2,
                        request_mask: getattr::ALL,
                    }))
                    .await
            ),
            libc::EBADF
        );
        assert_eq!(
            errno(
                client
                    .call(Request::Txattrwalk(Txattrwalk {
                        fid: 1,
                        newfid: 5,
                        name: "user.x".to_owned(),
                    }))
                    .await
            ),
            libc::ENODATA
        );
    });
}

#[test]
fn session_limits() {
    Runtime::new().unwrap().block_on(async {
        let (mut client, _task) = Client::connect(Server::new(route()));

        let version = client.version(MAX_MSIZE * 4, "9P2000.u").await;
        assert_eq!(version.msize, MAX_MSIZE);
        assert_eq!(version.version, VERSION_UNKNOWN);

        client.version(64, "9P2000.L").await;
        client.attach(0).await;
        client.walk(0, 1, &["rootfs", "etc", "passwd"]).await;
        client.open(1, libc::O_RDONLY).await;
        match client.read(1, 0, 1000).await {
            Response::Rread(r) => assert_eq!(&r.data.0[..], &PASSWD[..53]),
            other => panic!("unexpected {:?}", other),
        }

        let deep = vec!["etc"; 17];
        assert_eq!(errno(client.walk(0, 2, &deep).await), libc::EINVAL);
        assert_eq!(errno(client.walk(9, 2, &["rootfs"]).await), libc::EBADF);
        assert_eq!(errno(client.walk(0, 2, &["nope"]).await), libc::ENOENT);

        match client.call(Request::Tflush(Tflush { oldtag: 999 })).await {
            Response::Rflush(_) => (),
            other => panic!("unexpected {:?}", other),
        }

        client.tag += 1;
        let frame = [7, 0, 0, 0, 200, client.tag as u8, 0];
        let (tag, response) = client.send_frame(&frame).await;
        assert_eq!(tag, client.tag);
        assert_eq!(errno(response), libc::ENOSYS);

        // a new version resets the fid table
        client.version(MAX_MSIZE, "9P2000.L").await;
        assert_eq!(errno(client.read(1, 0, 1).await), libc::EBADF);
    });
}
