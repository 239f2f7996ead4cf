//! Client for starting Langflow flows over HTTP and following their server-sent
//! event streams.

pub mod client;
pub mod error;
pub mod protocol;
pub mod sse;
pub mod stream;

pub use client::{AuthHeader, ClientConfig, DEFAULT_BASE_URL, FlowRun, LangflowClient};
pub use error::{ClientError, Result};
pub use protocol::{IoType, RunRequest, RunResponse, StreamEvent, Tweaks};
pub use stream::{StreamCallbacks, StreamHandle, StreamUpdate, UpdateStream};
