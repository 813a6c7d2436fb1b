use crate::{
    errors::{ServerError, VFSError},
    filesystem::vfs::{Stat, BLOCK_SIZE},
    server::node::File,
};
use dashmap::DashMap;
use layerfs_protocol::{
    buffer::{Error as ProtocolError, MessageBuffer},
    *,
};
use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{mpsc, oneshot},
    task::{self, AbortHandle},
};

/// Largest message size we will negotiate
pub const MAX_MSIZE: u32 = 1024 * 1024;

/// Bytes of an Rread or Rreaddir that aren't payload
const IO_HEADER_LEN: u32 = 11;

/// Most names accepted in one Twalk
const MAX_WALK_NAMES: usize = 16;

const REPLY_QUEUE_LEN: usize = 64;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FidState {
    Unopened,
    Opened,
}

#[derive(Clone)]
struct Fid {
    file: Arc<dyn File>,
    state: FidState,
}

/// State shared by the tasks answering one connection's requests
struct SessionState {
    root: Arc<dyn File>,
    fids: DashMap<u32, Fid>,
    msize: AtomicU32,
}

struct InFlight {
    id: u64,
    handle: AbortHandle,
}

/// One client connection
pub struct Session {
    state: Arc<SessionState>,
    in_flight: Arc<DashMap<u16, InFlight>>,
    next_id: AtomicU64,
}

fn errno_reply(err: VFSError) -> Response {
    Response::Rlerror(Rlerror {
        ecode: err.to_errno() as u32,
    })
}

fn protocol_errno(err: &ProtocolError) -> VFSError {
    match err {
        ProtocolError::UnknownMessageType(_) => VFSError::NotImplemented,
        _ => VFSError::InvalidArgument,
    }
}

fn is_write_open(flags: u32) -> bool {
    let flags = flags as i32;
    (flags & libc::O_ACCMODE) != libc::O_RDONLY || (flags & (libc::O_TRUNC | libc::O_CREAT)) != 0
}

fn attr_reply(qid: Qid, stat: &Stat) -> Rgetattr {
    Rgetattr {
        valid: getattr::BASIC,
        qid,
        mode: stat.st_mode,
        uid: stat.st_uid,
        gid: stat.st_gid,
        nlink: stat.st_nlink,
        rdev: stat.st_rdev,
        size: stat.st_size,
        blksize: BLOCK_SIZE,
        blocks: stat.blocks(),
        atime_sec: stat.st_atime,
        atime_nsec: stat.st_atime_nsec,
        mtime_sec: stat.st_mtime,
        mtime_nsec: stat.st_mtime_nsec,
        ctime_sec: stat.st_ctime,
        ctime_nsec: stat.st_ctime_nsec,
        ..Default::default()
    }
}

impl SessionState {
    fn fid(&self, fid: u32) -> Result<Fid, VFSError> {
        match self.fids.get(&fid) {
            Some(entry) => Ok(entry.value().clone()),
            None => Err(VFSError::BadFid),
        }
    }

    fn opened(&self, fid: u32) -> Result<Arc<dyn File>, VFSError> {
        let fid = self.fid(fid)?;
        match fid.state {
            FidState::Opened => Ok(fid.file),
            FidState::Unopened => Err(VFSError::NotOpen),
        }
    }

    fn io_limit(&self, count: u32) -> u32 {
        let msize = self.msize.load(Ordering::Relaxed);
        count.min(msize.saturating_sub(IO_HEADER_LEN))
    }

    async fn handle(&self, request: Request) -> Result<Response, VFSError> {
        match request {
            Request::Tattach(msg) => {
                let (qid, _) = self.root.get_attr().await?;
                self.fids.insert(
                    msg.fid,
                    Fid {
                        file: self.root.clone(),
                        state: FidState::Unopened,
                    },
                );
                Ok(Response::Rattach(Rattach { qid }))
            }

            Request::Twalk(msg) => {
                let fid = self.fid(msg.fid)?;
                if fid.state != FidState::Unopened {
                    return Err(VFSError::AlreadyOpen);
                }
                if msg.wnames.len() > MAX_WALK_NAMES {
                    return Err(VFSError::InvalidArgument);
                }
                if msg.wnames.is_empty() {
                    self.fids.insert(msg.newfid, fid);
                    return Ok(Response::Rwalk(Rwalk { wqids: Vec::new() }));
                }
                let walked = fid.file.walk(&msg.wnames).await?;
                if let Some(file) = walked.file {
                    self.fids.insert(
                        msg.newfid,
                        Fid {
                            file,
                            state: FidState::Unopened,
                        },
                    );
                }
                Ok(Response::Rwalk(Rwalk {
                    wqids: walked.qids,
                }))
            }

            Request::Tgetattr(msg) => {
                let (qid, stat) = self.fid(msg.fid)?.file.get_attr().await?;
                Ok(Response::Rgetattr(attr_reply(qid, &stat)))
            }

            Request::Tlopen(msg) => {
                let fid = self.fid(msg.fid)?;
                if fid.state != FidState::Unopened {
                    return Err(VFSError::AlreadyOpen);
                }
                if is_write_open(msg.flags) {
                    return Err(VFSError::ReadOnly);
                }
                let (qid, iounit) = fid.file.open(msg.flags).await?;
                if let Some(mut entry) = self.fids.get_mut(&msg.fid) {
                    entry.state = FidState::Opened;
                }
                Ok(Response::Rlopen(Rlopen { qid, iounit }))
            }

            Request::Tread(msg) => {
                let file = self.opened(msg.fid)?;
                let data = file.read_at(msg.offset, self.io_limit(msg.count)).await?;
                Ok(Response::Rread(Rread {
                    data: Data(data.to_vec()),
                }))
            }

            Request::Treaddir(msg) => {
                let file = self.opened(msg.fid)?;
                let entries = file.readdir(msg.offset, self.io_limit(msg.count)).await?;
                let mut buf = MessageBuffer::new();
                for entry in &entries {
                    buf.push_back(entry).map_err(|_| VFSError::IO)?;
                }
                Ok(Response::Rreaddir(Rreaddir {
                    data: Data(buf.into_vec()),
                }))
            }

            Request::Treadlink(msg) => {
                let target = self.fid(msg.fid)?.file.readlink().await?;
                Ok(Response::Rreadlink(Rreadlink { target }))
            }

            Request::Tstatfs(msg) => Ok(Response::Rstatfs(
                self.fid(msg.fid)?.file.statfs().await?,
            )),

            Request::Txattrwalk(msg) => {
                self.fid(msg.fid)?;
                Err(VFSError::NoData)
            }

            Request::Tclunk(msg) => match self.fids.remove(&msg.fid) {
                Some((_, fid)) => {
                    if let Err(err) = fid.file.close().await {
                        log::warn!("close of fid {} failed, {}", msg.fid, err);
                    }
                    Ok(Response::Rclunk(Rclunk))
                }
                None => Err(VFSError::BadFid),
            },

            Request::Tremove(msg) => match self.fids.remove(&msg.fid) {
                Some((_, fid)) => {
                    fid.file.close().await.ok();
                    fid.file.remove().await?;
                    Ok(Response::Rremove(Rremove))
                }
                None => Err(VFSError::BadFid),
            },

            Request::Tlcreate(msg) => {
                let (qid, iounit) = self
                    .fid(msg.fid)?
                    .file
                    .create(&msg.name, msg.flags, msg.mode, msg.gid)
                    .await?;
                Ok(Response::Rlcreate(Rlcreate { qid, iounit }))
            }

            Request::Tsymlink(msg) => {
                let qid = self
                    .fid(msg.fid)?
                    .file
                    .symlink(&msg.name, &msg.symtgt, msg.gid)
                    .await?;
                Ok(Response::Rsymlink(Rsymlink { qid }))
            }

            Request::Tmknod(msg) => {
                let qid = self
                    .fid(msg.dfid)?
                    .file
                    .mknod(&msg.name, msg.mode, msg.major, msg.minor, msg.gid)
                    .await?;
                Ok(Response::Rmknod(Rmknod { qid }))
            }

            Request::Trename(msg) => {
                let dir = self.fid(msg.dfid)?.file;
                self.fid(msg.fid)?.file.rename(dir, &msg.name).await?;
                Ok(Response::Rrename(Rrename))
            }

            Request::Tsetattr(msg) => {
                let stat = Stat {
                    st_mode: msg.mode,
                    st_uid: msg.uid,
                    st_gid: msg.gid,
                    st_size: msg.size,
                    st_atime: msg.atime_sec,
                    st_atime_nsec: msg.atime_nsec,
                    st_mtime: msg.mtime_sec,
                    st_mtime_nsec: msg.mtime_nsec,
                    ..Default::default()
                };
                self.fid(msg.fid)?.file.set_attr(msg.valid, stat).await?;
                Ok(Response::Rsetattr(Rsetattr))
            }

            Request::Txattrcreate(msg) => {
                self.fid(msg.fid)?
                    .file
                    .xattr_create(&msg.name, msg.attr_size, msg.flags)
                    .await?;
                Ok(Response::Rxattrcreate(Rxattrcreate))
            }

            Request::Tfsync(msg) => {
                self.fid(msg.fid)?.file.fsync().await?;
                Ok(Response::Rfsync(Rfsync))
            }

            Request::Tlink(msg) => {
                let target = self.fid(msg.fid)?.file;
                self.fid(msg.dfid)?.file.link(target, &msg.name).await?;
                Ok(Response::Rlink(Rlink))
            }

            Request::Tmkdir(msg) => {
                let qid = self
                    .fid(msg.dfid)?
                    .file
                    .mkdir(&msg.name, msg.mode, msg.gid)
                    .await?;
                Ok(Response::Rmkdir(Rmkdir { qid }))
            }

            Request::Trenameat(msg) => {
                let new_dir = self.fid(msg.newdirfid)?.file;
                self.fid(msg.olddirfid)?
                    .file
                    .rename_at(&msg.oldname, new_dir, &msg.newname)
                    .await?;
                Ok(Response::Rrenameat(Rrenameat))
            }

            Request::Tunlinkat(msg) => {
                self.fid(msg.dirfid)?
                    .file
                    .unlink_at(&msg.name, msg.flags)
                    .await?;
                Ok(Response::Runlinkat(Runlinkat))
            }

            Request::Twrite(msg) => {
                let count = self
                    .opened(msg.fid)?
                    .write_at(msg.offset, &msg.data.0)
                    .await?;
                Ok(Response::Rwrite(Rwrite { count }))
            }

            Request::Tauth(_) | Request::Tlock(_) | Request::Tgetlock(_) => {
                Err(VFSError::Unsupported)
            }

            // Answered by the session loop before dispatch
            Request::Tversion(_) | Request::Tflush(_) => Err(VFSError::InvalidArgument),
        }
    }
}

impl Session {
    pub fn new(root: Arc<dyn File>) -> Self {
        Session {
            state: Arc::new(SessionState {
                root,
                fids: DashMap::new(),
                msize: AtomicU32::new(MAX_MSIZE),
            }),
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    fn abort_all(&self) {
        for entry in self.in_flight.iter() {
            entry.value().handle.abort();
        }
        self.in_flight.clear();
    }

    /// Serve requests until the client closes its end of the stream
    pub async fn run<S>(self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let (sender, mut receiver) = mpsc::channel::<(u16, Response)>(REPLY_QUEUE_LEN);

        let writer_task = task::spawn(async move {
            while let Some((tag, response)) = receiver.recv().await {
                log::debug!("<{} {:?}", tag, response);
                let frame = response.encode(tag)?;
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
            Ok::<(), ServerError>(())
        });

        let result = self.read_loop(&mut reader, sender).await;
        self.abort_all();
        let written = writer_task.await?;
        result.and(written)
    }

    async fn read_loop<R>(
        &self,
        reader: &mut R,
        sender: mpsc::Sender<(u16, Response)>,
    ) -> Result<(), ServerError>
    where
        R: AsyncRead + Unpin,
    {
        let mut header_bytes = [0u8; HEADER_LEN];
        loop {
            match reader.read_exact(&mut header_bytes).await {
                Ok(_) => (),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::debug!("client closed the session");
                    return Ok(());
                }
                Err(err) => return Err(err.into()),
            }
            let header = Header::parse(&header_bytes)?;
            if header.size > MAX_MSIZE {
                return Err(ServerError::MessageTooLarge(header.size));
            }
            let mut body = vec![0u8; header.body_len()];
            reader.read_exact(&mut body).await?;

            let request = match Request::decode(&header, &body) {
                Ok(request) => request,
                Err(err) => {
                    log::warn!("undecodable message type {}, {}", header.message_type, err);
                    send(&sender, header.tag, errno_reply(protocol_errno(&err))).await?;
                    continue;
                }
            };
            log::debug!(">{} {:?}", header.tag, request);

            match request {
                Request::Tversion(msg) => {
                    self.abort_all();
                    self.state.fids.clear();
                    let msize = msg.msize.min(MAX_MSIZE);
                    self.state.msize.store(msize, Ordering::Relaxed);
                    let version = if msg.version.starts_with(VERSION_9P2000_L) {
                        VERSION_9P2000_L
                    } else {
                        VERSION_UNKNOWN
                    };
                    let reply = Response::Rversion(Rversion {
                        msize,
                        version: version.to_owned(),
                    });
                    send(&sender, header.tag, reply).await?;
                }
                Request::Tflush(msg) => {
                    if let Some((_, flushed)) = self.in_flight.remove(&msg.oldtag) {
                        log::debug!("flushing request {}", msg.oldtag);
                        flushed.handle.abort();
                    }
                    send(&sender, header.tag, Response::Rflush(Rflush)).await?;
                }
                request => self.dispatch(header.tag, request, sender.clone()),
            }
        }
    }

    fn dispatch(&self, tag: u16, request: Request, sender: mpsc::Sender<(u16, Response)>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = self.state.clone();
        let in_flight = self.in_flight.clone();
        let (start, started) = oneshot::channel::<()>();
        // the task may only finish, and unregister itself, once registered
        let handle = task::spawn(async move {
            if started.await.is_err() {
                return;
            }
            let response = match state.handle(request).await {
                Ok(response) => response,
                Err(err) => {
                    log::debug!("request {} failed, {}", tag, err);
                    errno_reply(err)
                }
            };
            if sender.send((tag, response)).await.is_err() {
                log::debug!("reply {} dropped, session closed", tag);
            }
            in_flight.remove_if(&tag, |_, entry| entry.id == id);
        });
        self.in_flight.insert(
            tag,
            InFlight {
                id,
                handle: handle.abort_handle(),
            },
        );
        let _ = start.send(());
    }
}

async fn send(
    sender: &mpsc::Sender<(u16, Response)>,
    tag: u16,
    response: Response,
) -> Result<(), ServerError> {
    sender
        .send((tag, response))
        .await
        .map_err(|_| ServerError::Disconnected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{qid::QidSpace, route::RouteNode};
    use std::time::Duration;
    use tokio::{runtime::Runtime, time::sleep};

    #[test]
    fn finished_requests_leave_no_entry() {
        Runtime::new().unwrap().block_on(async {
            let root = RouteNode::new(Vec::new(), Arc::new(QidSpace::new()));
            let session = Session::new(root);
            let (sender, mut receiver) = mpsc::channel(REPLY_QUEUE_LEN);

            for tag in 0..500u16 {
                session.dispatch(tag, Request::Tclunk(Tclunk { fid: 7 }), sender.clone());
                let (reply_tag, reply) = receiver.recv().await.unwrap();
                assert_eq!(reply_tag, tag);
                assert!(matches!(reply, Response::Rlerror(_)));
            }
            for _ in 0..100 {
                if session.in_flight.is_empty() {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
            assert!(session.in_flight.is_empty());
        });
    }
}
