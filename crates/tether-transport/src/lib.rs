//! Transport to the Tether companion process.
//!
//! A [`Link`] moves bytes, a [`Framing`] delimits messages on it, and the
//! [`RequestClient`] correlates JSON requests with their responses and
//! fans out events and disconnect notifications.

pub mod traits;
pub mod framing;
pub mod message;
pub mod connection;
pub mod client;
pub mod process;
pub mod testing;

pub use traits::*;
pub use framing::*;
pub use message::{Event, RemoteError, Request, Response};
pub use connection::*;
pub use client::*;
pub use process::ProcessLink;
pub use testing::MemoryLink;
