//! 9P2000.L file server
//!
//! A [Server] owns one root object and answers any number of connections,
//! each with its own fid table. The usual root is a [route::RouteNode] that
//! mounts several independent trees side by side.

#[cfg(test)] mod tests;

pub mod bind;
pub mod node;
pub mod qid;
pub mod route;
pub mod session;

pub use node::{File, FsNode, Walked};
pub use qid::QidSpace;
pub use route::RouteNode;

use crate::errors::ServerError;
use session::Session;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Clone)]
pub struct Server {
    root: Arc<dyn File>,
}

impl Server {
    pub fn new(root: Arc<dyn File>) -> Self {
        Server { root }
    }

    pub fn root(&self) -> &Arc<dyn File> {
        &self.root
    }

    /// Serve one connection until the client goes away
    pub async fn serve<S>(&self, stream: S) -> Result<(), ServerError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        log::info!("session started");
        let result = Session::new(self.root.clone()).run(stream).await;
        match &result {
            Ok(()) => log::info!("session ended"),
            Err(err) => log::warn!("session failed, {}", err),
        }
        result
    }
}
