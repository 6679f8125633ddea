//! rbv: batch post-processing of recordings.
//!
//! Files are pushed through a running audio host over its scripting pipe
//! ([`pipe`]) and the results uploaded in chunks to a remote store
//! ([`upload`]). [`pipeline`] ties the two together for a batch.

pub mod cli;
pub mod config;
pub mod error;
pub mod pipe;
pub mod pipeline;
pub mod upload;

pub use error::{Error, Result};
