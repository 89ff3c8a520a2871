//! Outbound event writer shared by the event loop, the executor and plugins.

use std::error::Error as StdError;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use boondocks_core::{
    AssetPayload, Document, ErrorPayload, ExpandPayload, Frame, MessagePayload, Outbound, Phase,
    ProcessorRef, ProcessorStats, ProgressPayload, StatusPayload,
};

use crate::processor::ProcessorError;

/// Deepest source-chain entry reported in an error's `trace`.
const TRACE_LIMIT: usize = 6;

/// Cloneable handle onto the outbound event stream.
///
/// Events are queued in call order and written by a single writer task, so
/// interleaving between a processor's own events and the executor's is
/// exactly the order of the calls that produced them.
#[derive(Debug, Clone)]
pub struct Reactor {
    tx: UnboundedSender<Outbound>,
}

impl Reactor {
    pub fn new(tx: UnboundedSender<Outbound>) -> Self {
        Self { tx }
    }

    /// A reactor plus the receiving end of its stream.
    pub fn channel() -> (Self, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn write_event(&self, event: Outbound) {
        let kind = event.kind();
        if self.tx.send(event).is_err() {
            tracing::warn!(event = kind, "outbound channel closed; dropping event");
        }
    }

    pub fn ok(&self) {
        self.write_event(Outbound::Ok {});
    }

    pub fn asset(&self, frame: &Frame) {
        self.write_event(Outbound::Asset(AssetPayload::from(frame)));
    }

    pub fn expand(&self, processor_ref: &ProcessorRef, assets: Vec<Document>) {
        self.write_event(Outbound::Expand(ExpandPayload {
            processor: processor_ref.clone(),
            assets,
        }));
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.write_event(Outbound::Warning(MessagePayload {
            message: message.into(),
        }));
    }

    pub fn stats(&self, stats: &ProcessorStats) {
        self.write_event(Outbound::Stats(stats.clone()));
    }

    pub fn finished(&self) {
        self.write_event(Outbound::Finished {});
    }

    /// Ends the reply stream of a `preprocess` request.
    pub fn preprocess_finished(&self) {
        self.write_event(Outbound::Preprocess {});
    }

    pub fn hardfailure(&self, message: impl Into<String>) {
        self.write_event(Outbound::HardFailure(MessagePayload {
            message: message.into(),
        }));
    }

    pub fn emit_status(&self, status: impl Into<String>) {
        self.write_event(Outbound::Status(StatusPayload {
            status: status.into(),
        }));
    }

    /// Report generator/processor progress, clamped to 0..=100.
    pub fn progress(&self, percent: i64) {
        let progress = percent.clamp(0, 100) as u8;
        self.write_event(Outbound::Progress(ProgressPayload { progress }));
    }

    /// Report a processor failure.
    ///
    /// With a frame, the item's id and path are attached and `skip` is set
    /// iff `fatal`. With stats, the matching error counter is bumped.
    pub fn error(
        &self,
        frame: Option<&mut Frame>,
        processor_ref: &ProcessorRef,
        stats: Option<&mut ProcessorStats>,
        err: &ProcessorError,
        fatal: bool,
        phase: Phase,
    ) {
        let (asset_id, path) = match frame {
            Some(frame) => {
                frame.skip = fatal;
                (
                    frame.document.id().map(str::to_string),
                    frame.document.uri().map(str::to_string),
                )
            }
            None => (None, None),
        };

        if let Some(stats) = stats {
            if fatal {
                stats.unrecoverable_error_count += 1;
            } else {
                stats.error_count += 1;
            }
        }

        tracing::warn!(
            processor = %processor_ref.class_id,
            phase = %phase,
            fatal,
            asset_id = asset_id.as_deref().unwrap_or("-"),
            error = %err,
            "processor error",
        );

        self.write_event(Outbound::Error(ErrorPayload {
            processor: processor_ref.class_id.clone(),
            fatal,
            phase,
            message: err.to_string(),
            asset_id,
            path,
            trace: source_chain(err),
        }));
    }
}

fn source_chain(err: &ProcessorError) -> Vec<String> {
    let mut trace = Vec::new();
    let mut current = err.source();
    while let Some(source) = current {
        if trace.len() == TRACE_LIMIT {
            break;
        }
        trace.push(source.to_string());
        current = source.source();
    }
    trace
}
