//! Processor instance cache and the execute / generate / teardown lifecycle.
//!
//! The executor owns every cached instance. It is driven by exactly one
//! dispatch at a time, so nothing here is locked.

use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use boondocks_core::config::DEFAULT_BATCH_SIZE;
use boondocks_core::{
    CacheKey, CacheKeyPolicy, Document, Frame, GenerateSettings, Phase, ProcessorRef,
    ProcessorStats,
};

use crate::consumer::{document_extension, AssetConsumer, ExpandQueue};
use crate::processor::{Context, Processor, ProcessorError, ProcessorRegistry};
use crate::reactor::Reactor;

/// One cached processor plus its running counters.
///
/// `plugin` is `None` when construction or `init` failed; such an instance
/// stays cached so the failure is reported only once.
pub struct ProcessorInstance {
    plugin: Option<Box<dyn Processor>>,
    processor_ref: ProcessorRef,
    stats: ProcessorStats,
    expand: RefCell<ExpandQueue>,
}

impl ProcessorInstance {
    pub fn processor_ref(&self) -> &ProcessorRef {
        &self.processor_ref
    }

    pub fn stats(&self) -> &ProcessorStats {
        &self.stats
    }

    pub fn is_initialized(&self) -> bool {
        self.plugin.is_some()
    }

    /// Documents queued through `Context::expand` and not yet sent.
    pub fn pending_expand(&self) -> usize {
        self.expand.borrow().len()
    }

    fn create(
        registry: &ProcessorRegistry,
        reactor: &Reactor,
        processor_ref: &ProcessorRef,
        key: &CacheKey,
    ) -> Self {
        let mut stats = ProcessorStats::for_ref(processor_ref);
        let ctx = Context::new(processor_ref, reactor);

        let built = guarded(|| {
            let mut plugin = registry.construct(processor_ref)?;
            plugin.init(&ctx)?;
            Ok(plugin)
        });

        let plugin = match built {
            Ok(plugin) => {
                tracing::info!(
                    processor = %processor_ref,
                    key = key.short(),
                    "initialized processor",
                );
                Some(plugin)
            }
            Err(err) => {
                reactor.error(
                    None,
                    processor_ref,
                    Some(&mut stats),
                    &err,
                    true,
                    Phase::Initialize,
                );
                // Core processors must not fail quietly.
                if processor_ref.module.as_deref() == Some(STANDARD_MODULE) {
                    reactor.hardfailure(format!(
                        "failed to initialize {} ({STANDARD_MODULE}): {err}",
                        processor_ref.class_id
                    ));
                }
                None
            }
        };

        Self {
            plugin,
            processor_ref: processor_ref.clone(),
            stats,
            expand: RefCell::new(ExpandQueue::default()),
        }
    }

    fn process(&mut self, frame: &mut Frame, reactor: &Reactor, batch_size: usize) {
        let Some(plugin) = self.plugin.as_mut() else {
            tracing::warn!(
                processor = %self.processor_ref,
                asset_id = frame.document.id().unwrap_or("-"),
                "processor not initialized; passing item through",
            );
            return;
        };

        let file_types = plugin.file_types();
        if !file_types.is_empty() {
            let handled = document_extension(&frame.document)
                .map(|ext| file_types.contains(&ext.as_str()))
                .unwrap_or(false);
            if !handled {
                tracing::debug!(
                    processor = %self.processor_ref.class_id,
                    uri = frame.document.uri().unwrap_or("-"),
                    "file type not handled; passing item through",
                );
                return;
            }
        }

        let fatal_errors = plugin.fatal_errors();
        let parent_id = frame.document.id().map(str::to_string);
        let ctx = Context::new(&self.processor_ref, reactor)
            .with_expand(&self.expand, parent_id.as_deref());
        let started = Instant::now();
        match guarded(|| plugin.process(&mut *frame, &ctx)) {
            Ok(()) => {
                self.stats.process_count += 1;
                self.stats.total_time += started.elapsed().as_secs_f64();
                self.expand
                    .borrow_mut()
                    .drain(reactor, &self.processor_ref, batch_size, false);
            }
            Err(err) => {
                let dropped = self.expand.borrow_mut().clear_parent(parent_id.as_deref());
                if dropped > 0 {
                    tracing::debug!(
                        processor = %self.processor_ref.class_id,
                        asset_id = parent_id.as_deref().unwrap_or("-"),
                        dropped,
                        "discarded expand documents of failed item",
                    );
                }
                let fatal = err.is_fatal() || fatal_errors;
                reactor.error(
                    Some(frame),
                    &self.processor_ref,
                    Some(&mut self.stats),
                    &err,
                    fatal,
                    Phase::Execute,
                );
            }
        }
    }

    fn preprocess(&mut self, assets: &[Document], reactor: &Reactor) {
        let Some(plugin) = self.plugin.as_mut() else {
            tracing::warn!(
                processor = %self.processor_ref,
                "processor not initialized; skipping preprocess",
            );
            return;
        };

        let ctx = Context::new(&self.processor_ref, reactor);
        let started = Instant::now();
        match guarded(|| plugin.preprocess(assets, &ctx)) {
            Ok(()) => tracing::info!(
                processor = %self.processor_ref.class_id,
                assets = assets.len(),
                elapsed = started.elapsed().as_secs_f64(),
                "preprocess complete",
            ),
            Err(err) => reactor.error(
                None,
                &self.processor_ref,
                Some(&mut self.stats),
                &err,
                true,
                Phase::Preprocess,
            ),
        }
    }

    fn generate(&mut self, reactor: &Reactor, file_types: &[String], batch_size: usize) {
        let Some(plugin) = self.plugin.as_mut() else {
            tracing::warn!(
                processor = %self.processor_ref,
                "generator not initialized; nothing to generate",
            );
            return;
        };

        let fatal_errors = plugin.fatal_errors();
        let ctx = Context::new(&self.processor_ref, reactor);
        let mut consumer = AssetConsumer::new(reactor, &self.processor_ref, file_types, batch_size);
        let started = Instant::now();
        let result = guarded(|| plugin.generate(&mut consumer, &ctx));

        if consumer.pending() > 0 {
            tracing::warn!(
                processor = %self.processor_ref.class_id,
                pending = consumer.pending(),
                "generator returned with an unflushed partial batch",
            );
        }
        tracing::info!(
            processor = %self.processor_ref.class_id,
            accepted = consumer.accepted(),
            rejected = consumer.rejected(),
            batches = consumer.batches(),
            "generator finished",
        );

        match result {
            Ok(()) => {
                self.stats.generate_count += 1;
                self.stats.total_time += started.elapsed().as_secs_f64();
            }
            Err(err) => {
                let fatal = err.is_fatal() || fatal_errors;
                reactor.error(
                    None,
                    &self.processor_ref,
                    Some(&mut self.stats),
                    &err,
                    fatal,
                    Phase::Generate,
                );
            }
        }
    }

    /// Tear the plugin down, then send whatever is still queued for expand.
    fn teardown(&mut self, reactor: &Reactor, batch_size: usize) {
        let Some(plugin) = self.plugin.as_mut() else {
            return;
        };
        let ctx = Context::new(&self.processor_ref, reactor);
        if let Err(err) = guarded(|| plugin.teardown(&ctx)) {
            reactor.error(
                None,
                &self.processor_ref,
                Some(&mut self.stats),
                &err,
                false,
                Phase::Teardown,
            );
        }
        self.expand
            .borrow_mut()
            .drain(reactor, &self.processor_ref, batch_size, true);
    }
}

/// `module` of processors that ship with every container image.
const STANDARD_MODULE: &str = "standard";

/// Run a plugin call, converting a panic into a recoverable failure.
fn guarded<T>(call: impl FnOnce() -> Result<T, ProcessorError>) -> Result<T, ProcessorError> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(ProcessorError::from_panic(payload)))
}

/// Caches processor instances by [`CacheKey`] and runs them.
pub struct ProcessorExecutor {
    reactor: Reactor,
    registry: Arc<ProcessorRegistry>,
    cache: HashMap<CacheKey, ProcessorInstance>,
    policy: CacheKeyPolicy,
    default_batch_size: usize,
}

impl ProcessorExecutor {
    pub fn new(reactor: Reactor, registry: Arc<ProcessorRegistry>) -> Self {
        Self {
            reactor,
            registry,
            cache: HashMap::new(),
            policy: CacheKeyPolicy::default(),
            default_batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_policy(mut self, policy: CacheKeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Batch size for generate requests that do not carry `batchSize`.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.default_batch_size = batch_size.max(1);
        self
    }

    pub fn reactor(&self) -> &Reactor {
        &self.reactor
    }

    /// The cached instance for `processor_ref`, creating and initializing
    /// it on first use.
    pub fn get_or_create(&mut self, processor_ref: &ProcessorRef) -> &mut ProcessorInstance {
        let key = processor_ref.cache_key(self.policy);
        let Self {
            reactor,
            registry,
            cache,
            ..
        } = self;
        cache.entry(key).or_insert_with_key(|key| {
            ProcessorInstance::create(registry.as_ref(), reactor, processor_ref, key)
        })
    }

    /// Run `processor_ref` over `items` in order.
    ///
    /// Emits one `asset` event per item, then `finished`. Processor failures
    /// are reported as `error` events; nothing is returned as an error.
    pub fn execute_processor(
        &mut self,
        processor_ref: &ProcessorRef,
        items: Vec<Document>,
    ) -> Vec<Frame> {
        let reactor = self.reactor.clone();
        let batch_size = self.default_batch_size;
        let instance = self.get_or_create(processor_ref);
        let mut frames = Vec::with_capacity(items.len());
        for document in items {
            let mut frame = Frame::new(document);
            instance.process(&mut frame, &reactor, batch_size);
            reactor.asset(&frame);
            frames.push(frame);
        }
        reactor.finished();
        frames
    }

    /// Give `processor_ref` a look at a whole batch, then emit the
    /// `preprocess` terminator. Any failure is fatal.
    pub fn execute_preprocess(&mut self, processor_ref: &ProcessorRef, assets: &[Document]) {
        let reactor = self.reactor.clone();
        let instance = self.get_or_create(processor_ref);
        instance.preprocess(assets, &reactor);
        reactor.preprocess_finished();
    }

    /// Run a generator, then emit `finished`.
    ///
    /// Without `fileTypes` in `settings` every document is accepted; the host
    /// is warned since that usually pulls in junk files.
    pub fn execute_generator(&mut self, processor_ref: &ProcessorRef, settings: &GenerateSettings) {
        let reactor = self.reactor.clone();
        if settings.file_types.is_empty() {
            tracing::warn!(
                processor = %processor_ref.class_id,
                "generate without fileTypes accepts every file",
            );
            reactor.warning(format!(
                "no fileTypes supplied to {}; every file will be accepted",
                processor_ref.class_id
            ));
        }
        let batch_size = settings.batch_size.unwrap_or(self.default_batch_size);
        let instance = self.get_or_create(processor_ref);
        instance.generate(&reactor, &settings.file_types, batch_size);
        reactor.finished();
    }

    /// Tear down and evict the cached instance.
    ///
    /// Emits `stats` and returns `true` if an instance existed; otherwise
    /// emits one `warning` and returns `false`.
    pub fn teardown_processor(&mut self, processor_ref: &ProcessorRef) -> bool {
        let key = processor_ref.cache_key(self.policy);
        let Some(mut instance) = self.cache.remove(&key) else {
            tracing::warn!(processor = %processor_ref, "teardown of unknown processor");
            self.reactor
                .warning(format!("no cached instance of {processor_ref} to tear down"));
            return false;
        };
        instance.teardown(&self.reactor, self.default_batch_size);
        tracing::info!(
            processor = %processor_ref,
            key = key.short(),
            processed = instance.stats.process_count,
            errors = instance.stats.error_count,
            fatal_errors = instance.stats.unrecoverable_error_count,
            "processor torn down",
        );
        self.reactor.stats(&instance.stats);
        true
    }

    pub fn contains(&self, processor_ref: &ProcessorRef) -> bool {
        self.cache.contains_key(&processor_ref.cache_key(self.policy))
    }

    pub fn stats(&self, processor_ref: &ProcessorRef) -> Option<&ProcessorStats> {
        self.cache
            .get(&processor_ref.cache_key(self.policy))
            .map(ProcessorInstance::stats)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}
