//! Expand batching: the sink handed to generators and the queue behind
//! `Context::expand`.

use std::collections::HashSet;
use std::path::Path;

use boondocks_core::{Document, ProcessorRef};

use crate::reactor::Reactor;

/// Collects documents produced by a generator and ships them to the host in
/// `expand` batches of `batch_size`.
///
/// A trailing partial batch stays buffered until the generator calls
/// [`AssetConsumer::flush`].
pub struct AssetConsumer<'a> {
    reactor: &'a Reactor,
    generator: &'a ProcessorRef,
    file_types: HashSet<String>,
    batch_size: usize,
    buffer: Vec<Document>,
    accepted: usize,
    rejected: usize,
    batches: usize,
}

impl<'a> AssetConsumer<'a> {
    /// `batch_size` below 1 is treated as 1.
    pub fn new(
        reactor: &'a Reactor,
        generator: &'a ProcessorRef,
        file_types: &[String],
        batch_size: usize,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            reactor,
            generator,
            file_types: file_types
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            accepted: 0,
            rejected: 0,
            batches: 0,
        }
    }

    /// Offer one document. Returns `false` if the file-type filter rejected it.
    pub fn accept(&mut self, document: Document) -> bool {
        if !is_file_type_allowed(&document, &self.file_types) {
            self.rejected += 1;
            tracing::debug!(
                generator = %self.generator.class_id,
                uri = document.uri().unwrap_or("-"),
                "document rejected by file type filter",
            );
            return false;
        }
        self.accepted += 1;
        self.buffer.push(document);
        if self.buffer.len() >= self.batch_size {
            self.flush();
        }
        true
    }

    /// Emit whatever is buffered as one `expand` event. No-op when empty.
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let batch = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.batch_size));
        self.batches += 1;
        tracing::debug!(
            generator = %self.generator.class_id,
            size = batch.len(),
            batch = self.batches,
            "emitting expand batch",
        );
        self.reactor.expand(self.generator, batch);
    }

    /// Documents buffered but not yet sent.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn accepted(&self) -> usize {
        self.accepted
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    /// Number of `expand` events emitted so far.
    pub fn batches(&self) -> usize {
        self.batches
    }

    pub fn reactor(&self) -> &Reactor {
        self.reactor
    }
}

/// Derived documents queued by a processor from inside `process`, each
/// tagged with the id of the item that produced it.
///
/// The executor drains the queue after every successful `process` once it
/// holds at least a batch, and unconditionally at teardown. Children of a
/// failed item are dropped before they are sent.
#[derive(Debug, Default)]
pub(crate) struct ExpandQueue {
    pending: Vec<(Option<String>, Document)>,
}

impl ExpandQueue {
    pub(crate) fn push(&mut self, parent_id: Option<&str>, document: Document) {
        self.pending.push((parent_id.map(str::to_string), document));
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    /// Drop every document queued by `parent_id`. Returns how many went.
    pub(crate) fn clear_parent(&mut self, parent_id: Option<&str>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(parent, _)| parent.as_deref() != parent_id);
        before - self.pending.len()
    }

    /// Emit the whole queue in `expand` events of at most `batch_size`
    /// documents, provided it holds a full batch or `force` is set.
    /// Returns the number of events emitted.
    pub(crate) fn drain(
        &mut self,
        reactor: &Reactor,
        processor_ref: &ProcessorRef,
        batch_size: usize,
        force: bool,
    ) -> usize {
        let batch_size = batch_size.max(1);
        if self.pending.is_empty() || (!force && self.pending.len() < batch_size) {
            return 0;
        }
        tracing::info!(
            processor = %processor_ref.class_id,
            queued = self.pending.len(),
            batch_size,
            "expanding queued documents",
        );
        let mut documents = self.pending.drain(..).map(|(_, document)| document).peekable();
        let mut batches = 0;
        while documents.peek().is_some() {
            let batch: Vec<Document> = documents.by_ref().take(batch_size).collect();
            reactor.expand(processor_ref, batch);
            batches += 1;
        }
        batches
    }
}

/// Whether `document`'s uri extension is in `file_types`.
///
/// `file_types` must already be lower-case. An empty set accepts
/// everything; otherwise a document without a uri or extension is rejected.
pub fn is_file_type_allowed(document: &Document, file_types: &HashSet<String>) -> bool {
    if file_types.is_empty() {
        return true;
    }
    document_extension(document)
        .map(|ext| file_types.contains(&ext))
        .unwrap_or(false)
}

/// Lower-cased extension of the document's uri.
pub fn document_extension(document: &Document) -> Option<String> {
    document
        .uri()
        .and_then(|uri| Path::new(uri).extension())
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}
