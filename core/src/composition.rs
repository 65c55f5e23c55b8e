//! Named-source composition
//!
//! A view usually reads from several live data sources (one engine's state,
//! another engine's state, static settings) and needs them merged into a
//! single bag of properties. [`SourceComposer`] models that as a plain reduce
//! over an ordered list of named sources: each source yields a JSON snapshot,
//! the snapshots are folded left to right, and the caller's own properties are
//! merged last.
//!
//! # Examples
//!
//! ```
//! use reactive_context_core::composition::SourceComposer;
//! use serde_json::json;
//!
//! let composer = SourceComposer::builder("TodoList")
//!     .source("todos", || json!({ "items": [1, 2] }))
//!     .source("settings", || json!({ "theme": "dark" }))
//!     .build()
//!     .unwrap();
//!
//! let props = composer.compose(&json!({ "title": "Mine" })).unwrap();
//! assert_eq!(props, json!({ "items": [1, 2], "theme": "dark", "title": "Mine" }));
//! ```

use crate::error::ConfigurationError;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

type ReadFn = Arc<dyn Fn() -> Value + Send + Sync>;
type MapFn = Arc<dyn Fn(&[Value], &Value) -> Value + Send + Sync>;

/// A named producer of JSON snapshots
#[derive(Clone)]
pub struct Source {
    name: String,
    read: ReadFn,
}

impl Source {
    /// Create a source from a snapshot function
    #[must_use]
    pub fn new<F>(name: impl Into<String>, read: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            read: Arc::new(read),
        }
    }

    /// The source name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Take a snapshot
    #[must_use]
    pub fn read(&self) -> Value {
        (self.read)()
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SourceComposer`]
pub struct SourceComposerBuilder {
    target: String,
    sources: Vec<Source>,
    map: Option<MapFn>,
}

impl SourceComposerBuilder {
    /// Append a named source
    #[must_use]
    pub fn source<F>(mut self, name: impl Into<String>, read: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.sources.push(Source::new(name, read));
        self
    }

    /// Append an already built source
    #[must_use]
    pub fn with_source(mut self, source: Source) -> Self {
        self.sources.push(source);
        self
    }

    /// Replace the default shallow merge.
    ///
    /// The function receives the snapshots in source order and the caller's
    /// own properties. When both the own properties and the mapped value are
    /// objects, the own properties pass through underneath the mapped ones.
    #[must_use]
    pub fn map_with<F>(mut self, map: F) -> Self
    where
        F: Fn(&[Value], &Value) -> Value + Send + Sync + 'static,
    {
        self.map = Some(Arc::new(map));
        self
    }

    /// Finish the composer
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoSources`] if no source was added.
    pub fn build(self) -> Result<SourceComposer, ConfigurationError> {
        if self.sources.is_empty() {
            return Err(ConfigurationError::NoSources {
                target: self.target,
            });
        }
        Ok(SourceComposer {
            target: self.target,
            sources: self.sources,
            map: self.map,
        })
    }
}

/// Merges an ordered list of named sources into one property object
#[derive(Clone)]
pub struct SourceComposer {
    target: String,
    sources: Vec<Source>,
    map: Option<MapFn>,
}

impl SourceComposer {
    /// Start building a composer for the named consumer
    #[must_use]
    pub fn builder(target: impl Into<String>) -> SourceComposerBuilder {
        SourceComposerBuilder {
            target: target.into(),
            sources: Vec::new(),
            map: None,
        }
    }

    /// Name of the consumer
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The sources, in merge order
    #[must_use]
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// Snapshot every source and merge the snapshots with `own_props`.
    ///
    /// With the default merge, later sources override earlier ones and
    /// `own_props` override all sources. A `null` `own_props` is treated as an
    /// empty object.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::InvalidSource`] if the default merge is
    /// used and a source snapshot is not a JSON object.
    pub fn compose(&self, own_props: &Value) -> Result<Value, ConfigurationError> {
        let snapshots: Vec<Value> = self.sources.iter().map(Source::read).collect();

        if let Some(map) = &self.map {
            let mapped = map(&snapshots, own_props);
            return Ok(match (own_props, mapped) {
                (Value::Object(props), Value::Object(fields)) => {
                    let mut merged = props.clone();
                    merged.extend(fields);
                    Value::Object(merged)
                }
                (_, mapped) => mapped,
            });
        }

        let mut merged = snapshots
            .iter()
            .zip(&self.sources)
            .enumerate()
            .try_fold(Map::new(), |mut acc, (index, (snapshot, source))| {
                let Value::Object(fields) = snapshot else {
                    return Err(ConfigurationError::InvalidSource {
                        target: self.target.clone(),
                        index,
                        name: source.name.clone(),
                    });
                };
                acc.extend(fields.clone());
                Ok(acc)
            })?;

        if let Value::Object(props) = own_props {
            merged.extend(props.clone());
        }
        Ok(Value::Object(merged))
    }
}

impl fmt::Debug for SourceComposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceComposer")
            .field("target", &self.target)
            .field("sources", &self.sources)
            .field("custom_map", &self.map.is_some())
            .finish()
    }
}
