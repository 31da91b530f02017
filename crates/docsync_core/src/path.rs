//! Document and collection addressing.
//!
//! Every document lives at a [`DocumentPath`]: a sequence of
//! `(collection, id)` pairs where each element is a child collection of the
//! previous document. A [`CollectionPath`] names the set of sibling documents
//! under one parent.
//!
//! ## Encoding
//!
//! Paths encode to `c1/id1/c2/id2` (document) or `c1/id1/c2` (collection).
//! The encoded form is the storage key, the pub/sub topic and the input to
//! rule matching, so for every document path `d`:
//!
//! ```text
//! encode(d.collection_path()) + "/" + d.id() == encode(d)
//! ```
//!
//! The encoding is only bijective while segments are non-empty and contain
//! no `/`; [`DocumentPath::validate`] and [`CollectionPath::validate`] check
//! that.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Path segment separator used in encoded paths.
pub const SEPARATOR: char = '/';

/// One document within its parent: `(collection, id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PathElement {
    /// Collection name.
    pub collection: String,
    /// Document id within the collection.
    pub id: String,
}

impl PathElement {
    /// Creates a new path element.
    pub fn new(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }
}

/// Address of a single document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentPath(Vec<PathElement>);

impl DocumentPath {
    /// Creates a document path from its elements.
    pub fn new(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// Creates a path to a root-level document.
    pub fn root(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self(vec![PathElement::new(collection, id)])
    }

    /// Returns the path of document `id` in sub-collection `collection`.
    pub fn child(&self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::new(collection, id));
        Self(elements)
    }

    /// Returns the sub-collection `name` of this document.
    pub fn collection(&self, name: impl Into<String>) -> CollectionPath {
        CollectionPath::new(self.clone(), name)
    }

    /// Returns the path elements.
    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    /// Returns the number of elements.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the path has no elements.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Encodes the path as `c1/id1/.../cN/idN`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (index, element) in self.0.iter().enumerate() {
            if index > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(&element.collection);
            out.push(SEPARATOR);
            out.push_str(&element.id);
        }
        out
    }

    /// Returns the id of the addressed document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyPath`] if the path has no elements.
    pub fn id(&self) -> CoreResult<&str> {
        self.0
            .last()
            .map(|element| element.id.as_str())
            .ok_or(CoreError::EmptyPath)
    }

    /// Returns the collection containing the addressed document.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EmptyPath`] if the path has no elements.
    pub fn collection_path(&self) -> CoreResult<CollectionPath> {
        let (last, parent) = self.0.split_last().ok_or(CoreError::EmptyPath)?;
        Ok(CollectionPath {
            parent_path: Self(parent.to_vec()),
            collection: last.collection.clone(),
        })
    }

    /// Fails with [`CoreError::EmptyPath`] unless the path addresses a document.
    pub fn ensure_document(&self) -> CoreResult<()> {
        if self.0.is_empty() {
            return Err(CoreError::EmptyPath);
        }
        Ok(())
    }

    /// Checks that the path addresses a document and encodes unambiguously.
    pub fn validate(&self) -> CoreResult<()> {
        self.ensure_document()?;
        self.validate_elements()
    }

    fn validate_elements(&self) -> CoreResult<()> {
        for element in &self.0 {
            validate_segment(&element.collection)?;
            validate_segment(&element.id)?;
        }
        Ok(())
    }
}

impl From<Vec<PathElement>> for DocumentPath {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Address of a collection: the documents named `collection` under
/// `parent_path` (empty for root collections).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionPath {
    /// Parent document, empty for root-level collections.
    pub parent_path: DocumentPath,
    /// Collection name.
    pub collection: String,
}

impl CollectionPath {
    /// Creates a collection path under `parent_path`.
    pub fn new(parent_path: DocumentPath, collection: impl Into<String>) -> Self {
        Self {
            parent_path,
            collection: collection.into(),
        }
    }

    /// Creates a root-level collection path.
    pub fn root(collection: impl Into<String>) -> Self {
        Self::new(DocumentPath::default(), collection)
    }

    /// Encodes the path as `c1/id1/.../cN`.
    pub fn encode(&self) -> String {
        if self.parent_path.is_empty() {
            return self.collection.clone();
        }
        format!("{}{}{}", self.parent_path.encode(), SEPARATOR, self.collection)
    }

    /// Returns the path of document `id` within this collection.
    pub fn document_path(&self, id: impl Into<String>) -> DocumentPath {
        self.parent_path.child(self.collection.clone(), id)
    }

    /// Checks that every segment encodes unambiguously.
    pub fn validate(&self) -> CoreResult<()> {
        self.parent_path.validate_elements()?;
        validate_segment(&self.collection)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Either kind of path, as carried by requests, snapshots and bus events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Path {
    /// A document path.
    Document(DocumentPath),
    /// A collection path.
    Collection(CollectionPath),
}

impl Path {
    /// Encodes the wrapped path.
    pub fn encode(&self) -> String {
        match self {
            Path::Document(path) => path.encode(),
            Path::Collection(path) => path.encode(),
        }
    }

    /// Validates the wrapped path.
    pub fn validate(&self) -> CoreResult<()> {
        match self {
            Path::Document(path) => path.validate(),
            Path::Collection(path) => path.validate(),
        }
    }

    /// Returns the document path, if this is one.
    pub fn as_document(&self) -> Option<&DocumentPath> {
        match self {
            Path::Document(path) => Some(path),
            Path::Collection(_) => None,
        }
    }

    /// Returns the collection path, if this is one.
    pub fn as_collection(&self) -> Option<&CollectionPath> {
        match self {
            Path::Collection(path) => Some(path),
            Path::Document(_) => None,
        }
    }
}

impl From<DocumentPath> for Path {
    fn from(path: DocumentPath) -> Self {
        Path::Document(path)
    }
}

impl From<CollectionPath> for Path {
    fn from(path: CollectionPath) -> Self {
        Path::Collection(path)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn validate_segment(segment: &str) -> CoreResult<()> {
    if segment.is_empty() {
        return Err(CoreError::InvalidPath("empty path segment".into()));
    }
    if segment.contains(SEPARATOR) {
        return Err(CoreError::InvalidPath(format!(
            "segment '{segment}' contains '{SEPARATOR}'"
        )));
    }
    Ok(())
}
