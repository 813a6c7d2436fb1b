//! Lazily fetched container image trees, served over 9P2000.L
//!
//! Layers in the eStargz format are mounted from their table of contents
//! and read chunk by chunk through HTTP range requests. Plain tar and gzip
//! tar layers are downloaded whole. All layers of an image are merged,
//! whiteouts applied, and the result is served read-only next to an OCI
//! runtime spec generated from the image config.

#[cfg(not(any(target_os = "linux", target_os = "android")))]
compile_error!("layerfs only works on linux or android");

#[macro_use] extern crate lazy_static;
#[macro_use] extern crate serde;

pub mod cache;
pub mod errors;
pub mod fetch;
pub mod filesystem;
pub mod image;
pub mod layer;
pub mod manifest;
pub mod passwd;
pub mod runtime_spec;
pub mod server;

pub use crate::{
    image::{Image, ImageBuilder, Reference},
    layer::LayerOptions,
    manifest::Platform,
    server::Server,
};
