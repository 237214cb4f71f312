//! Object streams
//!
//! An [`ObjectStream`] is a single-pass, non-restartable sequence of
//! objects. Operators are lazy and compose like ordinary iterator adapters;
//! only [`ObjectStream::sort_by`] and [`ObjectStream::group_by`] buffer the
//! upstream, because they need to see every object before producing output.
//!
//! Any error item aborts consumption through [`ObjectStream::try_for_each`],
//! and the first error wins.

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::fmt;
use std::io::Write;

use crate::error::{CoreError, Result};
use crate::kinds::compare_objects;
use crate::object::Object;

type BoxedIter = Box<dyn Iterator<Item = Result<Object>> + Send>;

/// Lazy, single-pass producer of objects
pub struct ObjectStream {
    inner: BoxedIter,
}

impl fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStream").finish_non_exhaustive()
    }
}

impl Iterator for ObjectStream {
    type Item = Result<Object>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl From<Vec<Object>> for ObjectStream {
    fn from(objects: Vec<Object>) -> Self {
        Self::from_objects(objects)
    }
}

impl FromIterator<Object> for ObjectStream {
    fn from_iter<T: IntoIterator<Item = Object>>(iter: T) -> Self {
        Self::from_objects(iter.into_iter().collect())
    }
}

impl ObjectStream {
    /// Wrap any iterator of results
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Object>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    pub fn from_objects(objects: Vec<Object>) -> Self {
        Self::new(objects.into_iter().map(Ok))
    }

    /// A stream that yields a single error
    pub fn failed(err: CoreError) -> Self {
        Self::new(std::iter::once(Err(err)))
    }

    /// Concatenate streams in order
    pub fn concat(streams: Vec<ObjectStream>) -> Self {
        Self::new(streams.into_iter().flatten())
    }

    /// Append another stream after this one
    #[must_use]
    pub fn chain(self, other: ObjectStream) -> Self {
        Self::new(self.inner.chain(other.inner))
    }

    /// Transform each object as it passes through
    #[must_use]
    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(&mut Object) + Send + 'static,
    {
        Self::new(self.inner.map(move |item| {
            item.map(|mut obj| {
                f(&mut obj);
                obj
            })
        }))
    }

    /// Transform each object, failing the stream on the first error
    #[must_use]
    pub fn try_map<F>(self, mut f: F) -> Self
    where
        F: FnMut(Object) -> Result<Object> + Send + 'static,
    {
        Self::new(self.inner.map(move |item| item.and_then(&mut f)))
    }

    /// Forward only objects matching the predicate; errors always pass
    #[must_use]
    pub fn filter<F>(self, mut pred: F) -> Self
    where
        F: FnMut(&Object) -> bool + Send + 'static,
    {
        Self::new(self.inner.filter(move |item| match item {
            Ok(obj) => pred(obj),
            Err(_) => true,
        }))
    }

    /// Sort by kind rank then name
    #[must_use]
    pub fn sort(self, reverse: bool) -> Self {
        self.sort_by(compare_objects, reverse)
    }

    /// Buffer the whole stream and emit it ordered by `cmp`
    ///
    /// With `reverse` the output is the exact reverse of the ascending
    /// order. An upstream error is emitted alone, nothing sorted follows.
    #[must_use]
    pub fn sort_by<F>(self, cmp: F, reverse: bool) -> Self
    where
        F: Fn(&Object, &Object) -> Ordering + Send + 'static,
    {
        let upstream = self.inner;
        let buffered = std::iter::once_with(move || {
            let mut objects = Vec::new();
            for item in upstream {
                match item {
                    Ok(obj) => objects.push(obj),
                    Err(err) => return vec![Err(err)],
                }
            }
            objects.sort_by(|a, b| cmp(a, b));
            if reverse {
                objects.reverse();
            }
            objects.into_iter().map(Ok).collect::<Vec<_>>()
        })
        .flatten();
        Self::new(buffered)
    }

    /// Buffer the stream once and index it by key
    pub fn group_by<F>(self, mut key_fn: F) -> GroupedObjects
    where
        F: FnMut(&Object) -> String,
    {
        let mut groups: IndexMap<String, Vec<Object>> = IndexMap::new();
        for item in self.inner {
            match item {
                Ok(obj) => groups.entry(key_fn(&obj)).or_default().push(obj),
                Err(err) => {
                    return GroupedObjects {
                        groups: IndexMap::new(),
                        error: Some(err.to_string()),
                    };
                }
            }
        }
        GroupedObjects {
            groups,
            error: None,
        }
    }

    /// Feed every object to `consumer`; the first error aborts iteration
    pub fn try_for_each<E, F>(self, mut consumer: F) -> std::result::Result<(), E>
    where
        E: From<CoreError>,
        F: FnMut(Object) -> std::result::Result<(), E>,
    {
        for item in self.inner {
            consumer(item?)?;
        }
        Ok(())
    }

    /// Drain into a vector
    pub fn collect_objects(self) -> Result<Vec<Object>> {
        self.inner.collect()
    }

    /// Parse a multi-document YAML or JSON text
    ///
    /// Empty documents are skipped. Parsing stops at the first malformed
    /// document, which is reported with its zero-based index.
    pub fn decode(text: &str) -> Self {
        let mut items = Vec::new();
        for (index, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
            let value = match JsonValue::deserialize(document) {
                Ok(value) => value,
                Err(err) => {
                    items.push(Err(CoreError::Decode {
                        index,
                        message: err.to_string(),
                    }));
                    break;
                }
            };
            if value.is_null() {
                continue;
            }
            match Object::from_json(value) {
                Ok(obj) if obj.is_empty() => continue,
                Ok(obj) => items.push(Ok(obj)),
                Err(err) => {
                    items.push(Err(CoreError::Decode {
                        index,
                        message: err.to_string(),
                    }));
                    break;
                }
            }
        }
        Self::new(items.into_iter())
    }

    /// Serialize as a multi-document text, one JSON document per object
    pub fn encode(self) -> Result<String> {
        let mut out = Vec::new();
        self.encode_to(&mut out)?;
        String::from_utf8(out).map_err(|e| CoreError::InvalidValue {
            message: e.to_string(),
        })
    }

    /// Stream the encoded form into a writer
    pub fn encode_to<W: Write>(self, writer: &mut W) -> Result<()> {
        self.try_for_each(|obj| -> Result<()> {
            writer.write_all(b"\n---\n")?;
            serde_json::to_writer(&mut *writer, &obj)?;
            Ok(())
        })
    }
}

/// Result of [`ObjectStream::group_by`]: a replayable lookup by key
#[derive(Debug, Clone, Default)]
pub struct GroupedObjects {
    groups: IndexMap<String, Vec<Object>>,
    error: Option<String>,
}

impl GroupedObjects {
    /// A fresh stream over one group; replays the upstream error if any
    pub fn get(&self, key: &str) -> ObjectStream {
        if let Some(message) = &self.error {
            return ObjectStream::failed(CoreError::Stream {
                message: message.clone(),
            });
        }
        match self.groups.get(key) {
            Some(objects) => ObjectStream::from_objects(objects.clone()),
            None => ObjectStream::empty(),
        }
    }

    /// Keys in first-seen order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}
