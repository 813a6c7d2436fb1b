use flate2::{write::GzEncoder, Compression};
use layerfs::{errors::ImageError, ImageBuilder, Platform};
use layerfs_protocol::*;
use std::{io::Write, path::Path};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
    runtime::Runtime,
};

const PASSWD: &[u8] = b"root:x:0:0:root:/root:/bin/sh\napp:x:1000:1000:app:/home/app:/bin/sh\n";
const GROUP: &[u8] = b"root:x:0:\napp:x:1000:\nvideo:x:44:app\n";

fn append(builder: &mut tar::Builder<Vec<u8>>, path: &str, kind: tar::EntryType, content: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_path(path).unwrap();
    header.set_entry_type(kind);
    header.set_size(content.len() as u64);
    header.set_mode(if kind == tar::EntryType::Directory { 0o755 } else { 0o644 });
    header.set_mtime(1_600_000_000);
    header.set_cksum();
    builder.append(&header, content).unwrap();
}

fn base_layer() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, "etc/", tar::EntryType::Directory, b"");
    append(&mut builder, "etc/passwd", tar::EntryType::Regular, PASSWD);
    append(&mut builder, "etc/group", tar::EntryType::Regular, GROUP);
    append(&mut builder, "etc/motd", tar::EntryType::Regular, b"base\n");
    append(&mut builder, "var/lib/old/state", tar::EntryType::Regular, b"stale");
    append(&mut builder, "app/run", tar::EntryType::Regular, b"#!/bin/sh\necho hi\n");
    builder.into_inner().unwrap()
}

fn upper_layer() -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    append(&mut builder, "etc/motd", tar::EntryType::Regular, b"upper\n");
    append(&mut builder, "var/lib/.wh.old", tar::EntryType::Regular, b"");
    let tar = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

const CONFIG: &str = r#"{
    "architecture": "amd64",
    "os": "linux",
    "config": {
        "User": "app",
        "Env": ["PATH=/app:/bin", "MODE=test"],
        "Entrypoint": ["/app/run"],
        "Cmd": ["--verbose"],
        "WorkingDir": "/app"
    }
}"#;

fn docker_save_dir(dir: &Path) {
    std::fs::write(dir.join("config.json"), CONFIG).unwrap();
    std::fs::create_dir_all(dir.join("base")).unwrap();
    std::fs::create_dir_all(dir.join("upper")).unwrap();
    std::fs::write(dir.join("base/layer.tar"), base_layer()).unwrap();
    std::fs::write(dir.join("upper/layer.tar"), upper_layer()).unwrap();
    std::fs::write(
        dir.join("manifest.json"),
        r#"[{"Config":"config.json","RepoTags":["app:latest"],"Layers":["base/layer.tar","upper/layer.tar"]}]"#,
    )
    .unwrap();
}

struct Client {
    stream: DuplexStream,
    tag: u16,
}

impl Client {
    async fn call(&mut self, request: Request) -> Response {
        self.tag += 1;
        self.stream
            .write_all(&request.encode(self.tag).unwrap())
            .await
            .unwrap();
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await.unwrap();
        let header = Header::parse(&header).unwrap();
        let mut body = vec![0u8; header.body_len()];
        self.stream.read_exact(&mut body).await.unwrap();
        assert_eq!(header.tag, self.tag);
        Response::decode(&header, &body).unwrap()
    }

    async fn walk(&mut self, newfid: u32, names: &[&str]) -> Response {
        self.call(Request::Twalk(Twalk {
            fid: 0,
            newfid,
            wnames: names.iter().map(|s| s.to_string()).collect(),
        }))
        .await
    }

    async fn read_all(&mut self, fid: u32) -> Vec<u8> {
        match self.call(Request::Tlopen(Tlopen { fid, flags: 0 })).await {
            Response::Rlopen(_) => (),
            other => panic!("unexpected {:?}", other),
        }
        let mut content = Vec::new();
        loop {
            match self
                .call(Request::Tread(Tread {
                    fid,
                    offset: content.len() as u64,
                    count: 4096,
                }))
                .await
            {
                Response::Rread(r) if r.data.0.is_empty() => return content,
                Response::Rread(r) => content.extend(r.data.0),
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}

#[test]
fn docker_save_image() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    docker_save_dir(dir.path());

    Runtime::new().unwrap().block_on(async {
        let image = ImageBuilder::new()
            .address(dir.path().to_str().unwrap())
            .platform(Platform::linux("x86_64"))
            .build()
            .await
            .unwrap();

        assert_eq!(image.manifest().layers.len(), 2);
        assert_eq!(&image.read_file("/etc/motd").await.unwrap()[..], b"upper\n");
        assert!(image.read_file("/var/lib/old/state").await.is_err());
        assert_eq!(image.config_bytes(), CONFIG.as_bytes());

        let spec = image.runtime_spec();
        assert_eq!(spec.process.args, vec!["/app/run", "--verbose"]);
        assert_eq!(spec.process.cwd, "/app");
        assert_eq!(spec.process.env, vec!["PATH=/app:/bin", "MODE=test", "TERM=xterm"]);
        assert_eq!(spec.process.user.uid, 1000);
        assert_eq!(spec.process.user.gid, 1000);
        assert_eq!(spec.process.user.additional_gids, vec![44]);
    });
}

#[test]
fn serve_image_over_9p() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    docker_save_dir(dir.path());

    Runtime::new().unwrap().block_on(async {
        let image = ImageBuilder::new()
            .address(dir.path().to_str().unwrap())
            .build()
            .await
            .unwrap();
        let server = image.server();
        let (stream, remote) = tokio::io::duplex(64 * 1024);
        let session = tokio::spawn(async move { server.serve(remote).await });
        let mut client = Client { stream, tag: 0 };

        match client
            .call(Request::Tversion(Tversion {
                msize: 65536,
                version: VERSION_9P2000_L.to_owned(),
            }))
            .await
        {
            Response::Rversion(r) => assert_eq!(r.version, VERSION_9P2000_L),
            other => panic!("unexpected {:?}", other),
        }
        match client
            .call(Request::Tattach(Tattach {
                fid: 0,
                afid: NOFID,
                uname: String::new(),
                aname: String::new(),
                n_uname: 0,
            }))
            .await
        {
            Response::Rattach(r) => assert!(r.qid.is_dir()),
            other => panic!("unexpected {:?}", other),
        }

        client.walk(1, &["rootfs", "etc", "motd"]).await;
        assert_eq!(client.read_all(1).await, b"upper\n");

        client.walk(2, &["config", "config.json"]).await;
        let spec: serde_json::Value = serde_json::from_slice(&client.read_all(2).await).unwrap();
        assert_eq!(spec["ociVersion"], "1.0.2-dev");
        assert_eq!(spec["root"]["path"], "/run/rootfs");
        assert_eq!(spec["process"]["args"][0], "/app/run");

        client.walk(3, &["config", "imageconfig.json"]).await;
        assert_eq!(client.read_all(3).await, CONFIG.as_bytes());

        match client.walk(4, &["rootfs", "var", "lib", "old"]).await {
            Response::Rwalk(r) => assert_eq!(r.wqids.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        match client.walk(4, &["rootfs", "etc", "group"]).await {
            Response::Rwalk(r) => assert_eq!(r.wqids.len(), 3),
            other => panic!("unexpected {:?}", other),
        }
        match client.call(Request::Tlopen(Tlopen { fid: 4, flags: 2 })).await {
            Response::Rlerror(r) => assert_eq!(r.ecode, 30),
            other => panic!("unexpected {:?}", other),
        }

        drop(client);
        session.await.unwrap().unwrap();
        drop(image);
    });
}

#[test]
fn missing_address() {
    let result = Runtime::new()
        .unwrap()
        .block_on(ImageBuilder::new().build());
    assert!(matches!(result, Err(ImageError::InvalidReferenceFormat(_))));
}
