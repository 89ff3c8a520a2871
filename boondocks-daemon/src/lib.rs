//! boondocks daemon: runs processors inside an analysis container on behalf
//! of a host, streaming results back as newline-delimited JSON events.

pub mod builtin;
pub mod consumer;
pub mod endpoint;
mod error;
pub mod executor;
pub mod processor;
pub mod protocol;
pub mod reactor;
mod runtime;
pub mod transport;

pub use consumer::AssetConsumer;
pub use endpoint::Endpoint;
pub use error::DaemonError;
pub use executor::{ProcessorExecutor, ProcessorInstance};
pub use processor::{Context, Processor, ProcessorError, ProcessorFactory, ProcessorRegistry};
pub use protocol::HostConnection;
pub use reactor::Reactor;
pub use runtime::{
    ctrl_c, init_tracing, serve, serve_connection, start_blocking, EventLoop, Shutdown,
};
pub use transport::{EventSource, LineSource};
