#[macro_use] extern crate clap;

use clap::{App, ArgMatches};
use env_logger::{Builder, Env};
use layerfs::{ImageBuilder, LayerOptions, Platform, Server};
use std::{
    error::Error,
    io,
    os::unix::io::{FromRawFd, RawFd},
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf, Stdin, Stdout},
    net::TcpListener,
};

const IMAGE_ENV: &str = "LAYERFS_IMAGE";

type CliResult<T> = Result<T, Box<dyn Error>>;

#[tokio::main]
async fn main() {
    let yaml = load_yaml!("cli.yml");
    let matches = App::from_yaml(yaml).get_matches();

    let log_level = matches.value_of("log_level").unwrap_or("info");
    Builder::from_env(Env::default().default_filter_or(log_level)).init();

    if let Err(err) = run(&matches).await {
        log::error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(matches: &ArgMatches<'_>) -> CliResult<()> {
    let address = match matches.value_of("image_address") {
        Some(address) => address.to_owned(),
        None => std::env::var(IMAGE_ENV)
            .map_err(|_| format!("no image given, and {} is not set", IMAGE_ENV))?,
    };
    let arch = matches.value_of("arch").unwrap_or("amd64");

    let image = ImageBuilder::new()
        .address(&address)
        .platform(Platform::linux(arch))
        .layer_options(layer_options(matches)?)
        .build()
        .await?;
    log::info!("serving {} as {:?}", address, image);
    let server = image.server();

    if let Some(fd) = matches.value_of("listen_fd") {
        let fd: RawFd = fd.parse()?;
        // the fd is inherited and owned by nobody else in this process
        let listener = unsafe { std::net::TcpListener::from_raw_fd(fd) };
        listener.set_nonblocking(true)?;
        accept_one(&server, TcpListener::from_std(listener)?).await
    } else if let Some(addr) = matches.value_of("listen") {
        accept_one(&server, TcpListener::bind(addr).await?).await
    } else {
        Ok(server.serve(Stdio::new()).await?)
    }
}

fn layer_options(matches: &ArgMatches<'_>) -> CliResult<LayerOptions> {
    let max_concurrency: usize = value_t!(matches, "max_concurrency", usize)?;
    let prefetch_timeout: u64 = value_t!(matches, "prefetch_timeout", u64)?;
    Ok(LayerOptions::new()
        .skip_verify(matches.is_present("skip_verify"))
        .no_prefetch(matches.is_present("no_prefetch"))
        .background_fetch(matches.is_present("background_fetch"))
        .max_concurrency(max_concurrency)
        .prefetch_timeout(Duration::from_secs(prefetch_timeout)))
}

async fn accept_one(server: &Server, listener: TcpListener) -> CliResult<()> {
    log::info!("listening on {}", listener.local_addr()?);
    let (stream, peer) = listener.accept().await?;
    log::info!("connection from {}", peer);
    drop(listener);
    Ok(server.serve(stream).await?)
}

/// Standard input and output as one duplex stream
struct Stdio {
    stdin: Stdin,
    stdout: Stdout,
}

impl Stdio {
    fn new() -> Self {
        Stdio {
            stdin: tokio::io::stdin(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl AsyncRead for Stdio {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdin).poll_read(cx, buf)
    }
}

impl AsyncWrite for Stdio {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stdout).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stdout).poll_shutdown(cx)
    }
}
