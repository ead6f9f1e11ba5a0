//! Common utilities and types

pub mod context;
pub mod error;
pub mod net;

pub use context::Context;
pub use error::{Error, JoinedError, Result};
