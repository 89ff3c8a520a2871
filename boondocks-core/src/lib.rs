//! boondocks core library: wire types, cache keys, configuration, errors.
//!
//! Public API surface:
//! - [`types`]: [`ProcessorRef`], [`CacheKey`], [`CacheKeyPolicy`]
//! - [`document`]: [`Document`] key-path map and [`Frame`]
//! - [`event`]: raw [`Event`] envelope, [`Inbound`] / [`Outbound`] events
//! - [`config`]: `~/.boondocks/config.yaml` load / save
//! - [`error`]: [`CoreError`]

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod types;

pub use config::{DaemonConfig, LogFormat, LoggingConfig};
pub use document::{Document, Frame};
pub use error::CoreError;
pub use event::{
    AssetPayload, ErrorPayload, Event, ExecuteRequest, ExpandPayload, GenerateRequest,
    GenerateSettings, Inbound, MessagePayload, Outbound, Phase, PreprocessRequest, ProcessorStats,
    ProgressPayload, StatusPayload, StopRequest, TeardownRequest,
};
pub use types::{CacheKey, CacheKeyPolicy, ProcessorRef};
