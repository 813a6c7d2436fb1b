//! Wire format for the 9P2000.L file protocol
//!
//! Messages are plain structs run through a small special-purpose serde
//! serializer. Every message travels in a frame of `size[4] type[1] tag[2]`
//! followed by the message body, all integers little-endian.

#[macro_use] extern crate serde;

#[cfg(test)] mod tests;

pub mod buffer;
pub mod de;
pub mod ser;

mod messages;
mod types;

pub use messages::*;
pub use types::*;
