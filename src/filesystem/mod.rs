//! In-memory node trees and the layer merge


pub mod merge;
pub mod vfs;
