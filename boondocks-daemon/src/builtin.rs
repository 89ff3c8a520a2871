//! Processors bundled with the daemon under `boondocks.core.*`.

use std::collections::HashSet;
use std::path::Path;

use serde_json::{json, Map, Value};

use boondocks_core::{Document, Frame};

use crate::consumer::AssetConsumer;
use crate::processor::{Context, Processor, ProcessorError, ProcessorRegistry};

pub const NOOP: &str = "boondocks.core.NoOpProcessor";
pub const SET_ATTRIBUTES: &str = "boondocks.core.SetAttributesProcessor";
pub const FAIL: &str = "boondocks.core.FailProcessor";
pub const FILE_LIST_GENERATOR: &str = "boondocks.core.FileListGenerator";

/// Register every bundled processor on `registry`.
pub fn register_builtin(registry: &mut ProcessorRegistry) {
    registry.register_default::<NoOpProcessor>(NOOP);
    registry.register_default::<SetAttributesProcessor>(SET_ATTRIBUTES);
    registry.register_default::<FailProcessor>(FAIL);
    registry.register_default::<FileListGenerator>(FILE_LIST_GENERATOR);
}

/// Leaves every item untouched.
#[derive(Debug, Default)]
pub struct NoOpProcessor;

impl Processor for NoOpProcessor {
    fn process(&mut self, _frame: &mut Frame, _ctx: &Context<'_>) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// Sets `attrs` (dotted key path → value) and removes `remove_attrs` on
/// every item.
#[derive(Debug, Default)]
pub struct SetAttributesProcessor {
    attrs: Map<String, Value>,
    remove: Vec<String>,
}

impl Processor for SetAttributesProcessor {
    fn init(&mut self, ctx: &Context<'_>) -> Result<(), ProcessorError> {
        self.attrs = ctx.arg_or("attrs", Map::new())?;
        self.remove = ctx.arg_or("remove_attrs", Vec::new())?;
        if self.attrs.is_empty() && self.remove.is_empty() {
            ctx.warning(format!("{SET_ATTRIBUTES} has nothing to set or remove"));
        }
        Ok(())
    }

    fn process(&mut self, frame: &mut Frame, _ctx: &Context<'_>) -> Result<(), ProcessorError> {
        for (path, value) in &self.attrs {
            frame.document.set_attr(path, value.clone());
        }
        for path in &self.remove {
            frame.document.del_attr(path);
        }
        Ok(())
    }
}

/// Fails items on purpose, for exercising error handling in a pipeline.
///
/// Args: `ids` (only these item ids fail; absent means every item),
/// `fatal` (default false), `message`.
#[derive(Debug, Default)]
pub struct FailProcessor {
    ids: Option<HashSet<String>>,
    fatal: bool,
    message: String,
}

impl Processor for FailProcessor {
    fn init(&mut self, ctx: &Context<'_>) -> Result<(), ProcessorError> {
        self.ids = ctx.arg::<Vec<String>>("ids")?.map(|ids| ids.into_iter().collect());
        self.fatal = ctx.arg_or("fatal", false)?;
        self.message = ctx.arg_or("message", "failed on purpose".to_string())?;
        Ok(())
    }

    fn process(&mut self, frame: &mut Frame, _ctx: &Context<'_>) -> Result<(), ProcessorError> {
        let targeted = match (&self.ids, frame.document.id()) {
            (None, _) => true,
            (Some(ids), Some(id)) => ids.contains(id),
            (Some(_), None) => false,
        };
        if !targeted {
            return Ok(());
        }
        if self.fatal {
            Err(ProcessorError::fatal(self.message.clone()))
        } else {
            Err(ProcessorError::recoverable(self.message.clone()))
        }
    }
}

/// Emits one document per entry of the `paths` argument.
#[derive(Debug, Default)]
pub struct FileListGenerator;

impl Processor for FileListGenerator {
    fn generate(
        &mut self,
        consumer: &mut AssetConsumer<'_>,
        ctx: &Context<'_>,
    ) -> Result<(), ProcessorError> {
        let paths: Vec<String> = ctx.required_arg("paths")?;
        let total = paths.len();
        ctx.emit_status(format!("listing {total} files"));

        for (done, path) in paths.into_iter().enumerate() {
            consumer.accept(file_document(&path));
            if total > 0 {
                ctx.progress(((done + 1) * 100 / total) as i64);
            }
        }
        consumer.flush();
        Ok(())
    }
}

fn file_document(path: &str) -> Document {
    let file = Path::new(path);
    let filename = file.file_name().and_then(|name| name.to_str()).unwrap_or(path);
    let extension = file
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    let mut document = Document::new();
    document.set_attr("id", path);
    document.set_attr("uri", path);
    document.set_attr(
        "source",
        json!({"path": path, "filename": filename, "extension": extension}),
    );
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use boondocks_core::{Outbound, ProcessorRef};
    use serde_json::json;

    use crate::reactor::Reactor;

    fn frame(value: Value) -> Frame {
        Frame::new(serde_json::from_value(value).unwrap())
    }

    fn build(registry: &ProcessorRegistry, r: &ProcessorRef) -> Box<dyn Processor> {
        let mut plugin = registry.construct(r).ok().expect("registered");
        plugin.init(&Context::standalone(r)).expect("init");
        plugin
    }

    #[test]
    fn all_builtins_are_registered() {
        let registry = ProcessorRegistry::with_builtin();
        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names, vec![FAIL, FILE_LIST_GENERATOR, NOOP, SET_ATTRIBUTES]);
    }

    #[test]
    fn set_attributes_sets_then_removes() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(SET_ATTRIBUTES, "")
            .with_arg("attrs", json!({"media.type": "image", "tag": "x"}))
            .with_arg("remove_attrs", json!(["tmp"]));
        let mut plugin = build(&registry, &r);

        let mut f = frame(json!({"id": "1", "tmp": {"scratch": 1}}));
        plugin.process(&mut f, &Context::standalone(&r)).unwrap();
        assert_eq!(f.document.get_attr("media.type"), Some(&json!("image")));
        assert_eq!(f.document.get_attr("tag"), Some(&json!("x")));
        assert!(!f.document.attr_exists("tmp"));
    }

    #[test]
    fn set_attributes_rejects_non_object_attrs() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(SET_ATTRIBUTES, "").with_arg("attrs", json!([1, 2]));
        let mut plugin = registry.construct(&r).ok().expect("registered");
        assert!(plugin.init(&Context::standalone(&r)).is_err());
    }

    #[test]
    fn fail_processor_targets_listed_ids() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(FAIL, "")
            .with_arg("ids", json!(["b"]))
            .with_arg("fatal", true)
            .with_arg("message", "nope");
        let mut plugin = build(&registry, &r);
        let ctx = Context::standalone(&r);

        assert!(plugin.process(&mut frame(json!({"id": "a"})), &ctx).is_ok());
        let err = plugin.process(&mut frame(json!({"id": "b"})), &ctx).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "nope");
    }

    #[test]
    fn fail_processor_without_ids_fails_everything_recoverably() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(FAIL, "");
        let mut plugin = build(&registry, &r);
        let err = plugin
            .process(&mut frame(json!({"any": 1})), &Context::standalone(&r))
            .unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn file_list_generator_flushes_trailing_batch() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(FILE_LIST_GENERATOR, "")
            .with_arg("paths", json!(["/d/a.JPG", "/d/b.png", "/d/c.mov"]));
        let mut plugin = build(&registry, &r);

        let (reactor, mut rx) = Reactor::channel();
        let ctx = Context::new(&r, &reactor);
        let types = vec!["jpg".to_string(), "png".to_string()];
        let mut consumer = AssetConsumer::new(&reactor, &r, &types, 50);
        plugin.generate(&mut consumer, &ctx).unwrap();
        assert_eq!(consumer.pending(), 0);
        assert_eq!(consumer.rejected(), 1);

        let mut expands = Vec::new();
        let mut last_progress = None;
        while let Ok(event) = rx.try_recv() {
            match event {
                Outbound::Expand(payload) => expands.push(payload),
                Outbound::Progress(p) => last_progress = Some(p.progress),
                _ => {}
            }
        }
        assert_eq!(last_progress, Some(100));
        let [batch] = expands.as_slice() else {
            panic!("expected one expand, got {expands:?}");
        };
        assert_eq!(batch.processor.class_id, FILE_LIST_GENERATOR);
        assert_eq!(batch.assets.len(), 2);
        let first = &batch.assets[0];
        assert_eq!(first.id(), Some("/d/a.JPG"));
        assert_eq!(first.get_attr("source.filename"), Some(&json!("a.JPG")));
        assert_eq!(first.get_attr("source.extension"), Some(&json!("jpg")));
    }

    #[test]
    fn file_list_generator_requires_paths() {
        let registry = ProcessorRegistry::with_builtin();
        let r = ProcessorRef::new(FILE_LIST_GENERATOR, "");
        let mut plugin = build(&registry, &r);
        let (reactor, _rx) = Reactor::channel();
        let mut consumer = AssetConsumer::new(&reactor, &r, &[], 10);
        let err = plugin
            .generate(&mut consumer, &Context::new(&r, &reactor))
            .unwrap_err();
        assert!(err.is_fatal());
    }
}
