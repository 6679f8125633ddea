//! Command channel to the external audio processing host.
//!
//! ```text
//! +-----------+  Command line  +------------+
//! | PipeClient| -------------> |   host     |
//! |           | <------------- | (DAW batch |
//! +-----------+  text response |  scripting)|
//!                              +------------+
//! ```
//!
//! The host has no typed RPC, only a macro language whose success or
//! failure is embedded in free text. [`PipeClient::execute`] turns that into
//! a blocking call with a single failure signal.

pub mod channel;
pub mod client;
pub mod protocol;
pub mod recipe;

pub use channel::{check_endpoint, connect, ChannelPaths, HostPipe};
pub use client::PipeClient;
pub use protocol::{
    Command, Response, ResponseBuffer, Terminator, Value, FAILED_SENTINEL, FINISHED_SENTINEL,
    LINE_TERMINATOR,
};
pub use recipe::Profile;
