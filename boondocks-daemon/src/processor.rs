//! The plugin seam: the [`Processor`] trait, the per-call [`Context`] and the
//! [`ProcessorRegistry`] that maps a `className` to a constructor.
//!
//! Processors are resolved by explicit registration only. The daemon never
//! loads code by name; a `className` that nobody registered is an
//! initialization failure like any other.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error as StdError;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use thiserror::Error;

use boondocks_core::{Document, Frame, ProcessorRef};

use crate::consumer::{AssetConsumer, ExpandQueue};
use crate::reactor::Reactor;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

// ---------------------------------------------------------------------------
// ProcessorError
// ---------------------------------------------------------------------------

/// Outcome of a failed plugin call.
///
/// `Recoverable` leaves the item usable downstream; `Fatal` marks it
/// `skip=true`. The variant is the only thing the executor looks at.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("{message}")]
    Recoverable {
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    #[error("{message}")]
    Fatal {
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl ProcessorError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self::Recoverable {
            message: message.into(),
            source: None,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
            source: None,
        }
    }

    /// Recoverable failure wrapping an underlying error.
    pub fn caused_by(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Recoverable {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Turn a caught panic payload into a recoverable failure.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::recoverable(format!("processor panicked: {detail}"))
    }

    /// Same error, promoted to `Fatal`.
    pub fn into_fatal(self) -> Self {
        match self {
            Self::Recoverable { message, source } => Self::Fatal { message, source },
            fatal => fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

impl From<serde_json::Error> for ProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::caused_by("invalid processor argument", err)
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What a plugin can see and do during one call.
pub struct Context<'a> {
    processor_ref: &'a ProcessorRef,
    reactor: Option<&'a Reactor>,
    expand: Option<(&'a RefCell<ExpandQueue>, Option<&'a str>)>,
}

impl<'a> Context<'a> {
    pub fn new(processor_ref: &'a ProcessorRef, reactor: &'a Reactor) -> Self {
        Self {
            processor_ref,
            reactor: Some(reactor),
            expand: None,
        }
    }

    /// Route [`Context::expand`] into `queue`, tagged with the item being
    /// processed.
    pub(crate) fn with_expand(
        mut self,
        queue: &'a RefCell<ExpandQueue>,
        parent_id: Option<&'a str>,
    ) -> Self {
        self.expand = Some((queue, parent_id));
        self
    }

    /// A context with no host attached. Status and progress go nowhere.
    pub fn standalone(processor_ref: &'a ProcessorRef) -> Self {
        Self {
            processor_ref,
            reactor: None,
            expand: None,
        }
    }

    pub fn processor_ref(&self) -> &ProcessorRef {
        self.processor_ref
    }

    pub fn args(&self) -> &Map<String, Value> {
        &self.processor_ref.args
    }

    /// Deserialize argument `name`, or `None` when it is absent or null.
    pub fn arg<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, ProcessorError> {
        match self.processor_ref.args.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                ProcessorError::caused_by(format!("invalid value for argument '{name}'"), err)
            }),
        }
    }

    pub fn required_arg<T: DeserializeOwned>(&self, name: &str) -> Result<T, ProcessorError> {
        self.arg(name)?.ok_or_else(|| {
            ProcessorError::fatal(format!(
                "{} requires argument '{name}'",
                self.processor_ref.class_id
            ))
        })
    }

    pub fn arg_or<T: DeserializeOwned>(&self, name: &str, default: T) -> Result<T, ProcessorError> {
        Ok(self.arg(name)?.unwrap_or(default))
    }

    /// Queue a document derived from the current item (a clip, a page) as
    /// new work for the host.
    ///
    /// Queued documents are sent in `expand` batches after `process`
    /// returns successfully and are discarded if it fails. Only available
    /// during `process`.
    pub fn expand(&self, document: Document) -> Result<(), ProcessorError> {
        let Some((queue, parent_id)) = self.expand else {
            return Err(ProcessorError::recoverable(format!(
                "{} can only expand from process",
                self.processor_ref.class_id
            )));
        };
        queue.borrow_mut().push(parent_id, document);
        Ok(())
    }

    pub fn emit_status(&self, status: impl Into<String>) {
        if let Some(reactor) = self.reactor {
            reactor.emit_status(status);
        }
    }

    pub fn progress(&self, percent: i64) {
        if let Some(reactor) = self.reactor {
            reactor.progress(percent);
        }
    }

    pub fn warning(&self, message: impl Into<String>) {
        if let Some(reactor) = self.reactor {
            reactor.warning(message);
        }
    }
}

// ---------------------------------------------------------------------------
// Processor trait
// ---------------------------------------------------------------------------

/// A pluggable unit of behavior.
///
/// Every method has a default, so a plain processor only implements
/// [`Processor::process`] and a generator only [`Processor::generate`].
pub trait Processor: Send {
    /// Called once per cached instance, before any other call.
    fn init(&mut self, _ctx: &Context<'_>) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn process(&mut self, _frame: &mut Frame, ctx: &Context<'_>) -> Result<(), ProcessorError> {
        Err(ProcessorError::fatal(format!(
            "{} does not implement process",
            ctx.processor_ref().class_id
        )))
    }

    /// Look at a whole batch ahead of `execute`. Any failure here is
    /// unrecoverable.
    fn preprocess(
        &mut self,
        _assets: &[Document],
        _ctx: &Context<'_>,
    ) -> Result<(), ProcessorError> {
        Ok(())
    }

    fn generate(
        &mut self,
        _consumer: &mut AssetConsumer<'_>,
        ctx: &Context<'_>,
    ) -> Result<(), ProcessorError> {
        Err(ProcessorError::fatal(format!(
            "{} is not a generator",
            ctx.processor_ref().class_id
        )))
    }

    fn teardown(&mut self, _ctx: &Context<'_>) -> Result<(), ProcessorError> {
        Ok(())
    }

    /// Treat every failure of this processor as unrecoverable.
    fn fatal_errors(&self) -> bool {
        false
    }

    /// Lower-case extensions this processor handles. Empty means all.
    fn file_types(&self) -> &[&'static str] {
        &[]
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub type ProcessorFactory =
    Box<dyn Fn(&ProcessorRef) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync>;

/// `className` → constructor.
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: BTreeMap<String, ProcessorFactory>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the bundled `boondocks.core.*` processors.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::builtin::register_builtin(&mut registry);
        registry
    }

    /// Register `factory` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&ProcessorRef) -> Result<Box<dyn Processor>, ProcessorError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.insert(name.clone(), Box::new(factory)).is_some() {
            tracing::debug!(processor = %name, "replaced processor factory");
        }
    }

    /// Register a processor that needs nothing from the ref to construct.
    pub fn register_default<P>(&mut self, name: impl Into<String>)
    where
        P: Processor + Default + 'static,
    {
        self.register(name, |_| Ok(Box::new(P::default())));
    }

    /// Build a fresh, uninitialized processor for `processor_ref`.
    pub fn construct(&self, processor_ref: &ProcessorRef) -> Result<Box<dyn Processor>, ProcessorError> {
        let factory = self.factories.get(&processor_ref.class_id).ok_or_else(|| {
            ProcessorError::fatal(format!(
                "unknown processor '{}'; registered: {}",
                processor_ref.class_id,
                self.names().collect::<Vec<_>>().join(", ")
            ))
        })?;
        factory(processor_ref)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Nothing;

    impl Processor for Nothing {}

    #[test]
    fn construct_unknown_name_is_fatal() {
        let registry = ProcessorRegistry::new();
        let err = registry
            .construct(&ProcessorRef::new("missing.Thing", ""))
            .err()
            .expect("should fail");
        assert!(err.is_fatal());
        assert!(err.to_string().contains("missing.Thing"));
    }

    #[test]
    fn register_default_constructs_by_name() {
        let mut registry = ProcessorRegistry::new();
        registry.register_default::<Nothing>("test.Nothing");
        assert!(registry.contains("test.Nothing"));
        assert_eq!(registry.len(), 1);
        assert!(registry.construct(&ProcessorRef::new("test.Nothing", "")).is_ok());
    }

    #[test]
    fn default_process_is_a_fatal_error() {
        let r = ProcessorRef::new("test.Nothing", "");
        let ctx = Context::standalone(&r);
        let mut frame = Frame::default();
        let err = Nothing.process(&mut frame, &ctx).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn context_reads_typed_args() {
        let r = ProcessorRef::new("p.P", "")
            .with_arg("threshold", 0.5)
            .with_arg("labels", json!(["a", "b"]))
            .with_arg("nothing", Value::Null);
        let ctx = Context::standalone(&r);

        assert_eq!(ctx.arg::<f64>("threshold").unwrap(), Some(0.5));
        assert_eq!(
            ctx.required_arg::<Vec<String>>("labels").unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(ctx.arg::<String>("nothing").unwrap(), None);
        assert_eq!(ctx.arg_or("missing", 7u32).unwrap(), 7);
        assert!(ctx.required_arg::<String>("missing").unwrap_err().is_fatal());
        assert!(!ctx.arg::<u32>("labels").unwrap_err().is_fatal());
    }

    #[test]
    fn expand_queues_under_the_current_item() {
        let r = ProcessorRef::new("p.Clipper", "");
        let queue = RefCell::new(ExpandQueue::default());
        let ctx = Context::standalone(&r).with_expand(&queue, Some("parent-1"));

        ctx.expand(Document::new()).unwrap();
        ctx.expand(Document::new()).unwrap();
        assert_eq!(queue.borrow().len(), 2);
        assert_eq!(queue.borrow_mut().clear_parent(Some("parent-1")), 2);

        let err = Context::standalone(&r).expand(Document::new()).unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("p.Clipper"));
    }

    #[test]
    fn panic_payloads_become_recoverable_messages() {
        let caught = std::panic::catch_unwind(|| panic!("kaboom {}", 1)).unwrap_err();
        let err = ProcessorError::from_panic(caught);
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "processor panicked: kaboom 1");
    }

    #[test]
    fn into_fatal_keeps_message_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ProcessorError::caused_by("read failed", io).into_fatal();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "read failed");
        assert_eq!(
            StdError::source(&err).map(|s| s.to_string()),
            Some("disk gone".to_string())
        );
    }
}
