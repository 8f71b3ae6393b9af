pub mod envelope;
pub mod executor;
pub mod sse;

pub use executor::{ExecuteError, Executor, StreamChunk, UpstreamRequest, UpstreamResponse};
