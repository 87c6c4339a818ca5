//! In-process request frontend.
//!
//! Maps the wire request types onto the buffer manager. Moving requests
//! between processes or nodes is left to the caller.

mod handler;
mod request;

pub use handler::BufferManagerFrontend;
pub use request::{PageInfo, PageRef, Request, Response};
