//! HTTP plumbing for the runtime API control channel.

mod client;
mod response;

pub use client::{ClientError, RuntimeApi, RuntimeApiClient, API_PREFIX};
pub use response::ApiResponse;
