//! Processor references and the cache key derived from them.
//!
//! A [`ProcessorRef`] is the immutable descriptor the host sends with every
//! `execute` / `generate` / `teardown` event. The daemon never looks inside
//! `args`; it only hashes the whole ref into a [`CacheKey`] so that logically
//! identical refs share one initialized processor instance.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// ProcessorRef
// ---------------------------------------------------------------------------

/// Identifies one pluggable unit of behavior and its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorRef {
    /// Registered processor identifier, e.g. `boondocks.core.NoOpProcessor`.
    #[serde(rename = "className", alias = "class_id")]
    pub class_id: String,
    /// Container image the processor ships in.
    #[serde(default)]
    pub image: String,
    /// Constructor arguments, passed to the processor factory untouched.
    #[serde(default)]
    pub args: Map<String, Value>,
    /// Version checksum of the processor code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<i64>,
    /// Module the processor belongs to. Processors of the `standard` module
    /// are expected to always initialize.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

impl ProcessorRef {
    pub fn new(class_id: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            image: image.into(),
            args: Map::new(),
            checksum: None,
            module: None,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_checksum(mut self, checksum: i64) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = Some(module.into());
        self
    }

    /// Cache key for this ref under `policy`.
    pub fn cache_key(&self, policy: CacheKeyPolicy) -> CacheKey {
        CacheKey::of(self, policy)
    }

    fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("className".into(), Value::String(self.class_id.clone()));
        map.insert("image".into(), Value::String(self.image.clone()));
        map.insert("args".into(), Value::Object(self.args.clone()));
        if let Some(checksum) = self.checksum {
            map.insert("checksum".into(), Value::from(checksum));
        }
        if let Some(module) = &self.module {
            map.insert("module".into(), Value::String(module.clone()));
        }
        Value::Object(map)
    }
}

impl fmt::Display for ProcessorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.image.is_empty() {
            self.class_id.fmt(f)
        } else {
            write!(f, "{}@{}", self.class_id, self.image)
        }
    }
}

// ---------------------------------------------------------------------------
// CacheKeyPolicy
// ---------------------------------------------------------------------------

/// Whether the ref's `checksum` participates in the cache key.
///
/// With `IncludeChecksum`, a new code checksum for an otherwise identical ref
/// yields a fresh instance. With `IgnoreChecksum`, the cached instance is
/// reused regardless of checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheKeyPolicy {
    #[default]
    IncludeChecksum,
    IgnoreChecksum,
}

impl fmt::Display for CacheKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKeyPolicy::IncludeChecksum => write!(f, "include-checksum"),
            CacheKeyPolicy::IgnoreChecksum => write!(f, "ignore-checksum"),
        }
    }
}

impl FromStr for CacheKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "include-checksum" | "include" => Ok(Self::IncludeChecksum),
            "ignore-checksum" | "ignore" => Ok(Self::IgnoreChecksum),
            other => Err(format!(
                "unknown cache key policy '{other}'; expected: include-checksum, ignore-checksum"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// CacheKey
// ---------------------------------------------------------------------------

/// SHA-256 hex digest of a canonicalized [`ProcessorRef`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Hash `processor_ref` under `policy`.
    ///
    /// Object keys are sorted recursively before hashing, so two refs whose
    /// `args` differ only in insertion order map to the same key.
    pub fn of(processor_ref: &ProcessorRef, policy: CacheKeyPolicy) -> Self {
        let mut value = processor_ref.to_value();
        if policy == CacheKeyPolicy::IgnoreChecksum {
            if let Value::Object(map) = &mut value {
                map.remove("checksum");
            }
        }
        let canonical = canonicalize(&value).to_string();
        let digest = Sha256::digest(canonical.as_bytes());
        Self(hex::encode(digest))
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
