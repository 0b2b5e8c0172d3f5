//! Session and account lifecycle operations

pub mod account;
pub use account::*;
