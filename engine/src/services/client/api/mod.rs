//! PDS XRPC operations, grouped by area

pub mod blob;
pub mod plc;
pub mod repo;

pub use blob::*;
pub use plc::*;
pub use repo::*;
