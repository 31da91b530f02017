//! Typed collections backed by a static attribute schema.

use crate::backend::Backend;
use crate::collection::Collection;
use crate::error::{CoreError, CoreResult};
use crate::path::CollectionPath;
use crate::value::{Document, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

/// One declared attribute of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute name.
    pub name: &'static str,
    /// Whether construction fails when the attribute is absent.
    pub required: bool,
}

impl Attribute {
    /// Declares a required attribute.
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
        }
    }

    /// Declares an optional attribute.
    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
        }
    }
}

/// The declared attributes of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    attributes: &'static [Attribute],
}

impl Schema {
    /// Creates a schema from its attributes.
    pub const fn new(attributes: &'static [Attribute]) -> Self {
        Self { attributes }
    }

    /// Returns the declared attributes.
    pub fn attributes(&self) -> &'static [Attribute] {
        self.attributes
    }

    /// Fails with [`CoreError::MissingAttribute`] for the first required
    /// attribute absent from `value`.
    pub fn validate(&self, value: &Document) -> CoreResult<()> {
        match self
            .attributes
            .iter()
            .find(|attribute| attribute.required && !value.contains_key(attribute.name))
        {
            Some(missing) => Err(CoreError::MissingAttribute {
                name: missing.name.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Validates `value` and keeps only the declared attributes.
    pub fn project(&self, value: &Document) -> CoreResult<Document> {
        self.validate(value)?;
        Ok(self
            .attributes
            .iter()
            .filter_map(|attribute| {
                value
                    .get(attribute.name)
                    .map(|v| (attribute.name.to_string(), v.clone()))
            })
            .collect())
    }
}

/// A type stored as a document.
///
/// ```rust,ignore
/// #[derive(Serialize, Deserialize)]
/// struct Post {
///     title: String,
///     body: Option<String>,
/// }
///
/// impl Model for Post {
///     const SCHEMA: Schema = Schema::new(&[
///         Attribute::required("title"),
///         Attribute::optional("body"),
///     ]);
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    /// Declared attributes.
    const SCHEMA: Schema;

    /// Builds a model from a stored document.
    fn from_document(value: &Document) -> CoreResult<Self> {
        let projected = Self::SCHEMA.project(value)?;
        serde_json::from_value(Value::Object(projected))
            .map_err(|err| CoreError::InvalidPayload(err.to_string()))
    }

    /// Converts the model into a document.
    fn to_document(&self) -> CoreResult<Document> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(CoreError::InvalidPayload(
                "model did not serialize to an object".into(),
            )),
            Err(err) => Err(CoreError::InvalidPayload(err.to_string())),
        }
    }
}

/// A collection whose documents are read and written as `M`.
pub struct TypedCollection<M: Model> {
    inner: Collection,
    _marker: PhantomData<M>,
}

impl<M: Model> TypedCollection<M> {
    /// Creates a handle to a root-level collection.
    pub fn root(backend: Arc<dyn Backend>, name: impl Into<String>) -> Self {
        Self::from_untyped(Collection::root(backend, name))
    }

    /// Wraps an untyped collection.
    pub fn from_untyped(inner: Collection) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// Returns the untyped collection.
    pub fn untyped(&self) -> &Collection {
        &self.inner
    }

    /// Returns the collection path.
    pub fn path(&self) -> &CollectionPath {
        self.inner.path()
    }

    /// Fetches one model by id.
    pub async fn get(&self, id: &str) -> CoreResult<Option<M>> {
        match self.inner.doc(id).refresh().await? {
            Some(value) => Ok(Some(M::from_document(&value)?)),
            None => Ok(None),
        }
    }

    /// Fetches every model in the collection as `(id, model)` pairs.
    pub async fn list(&self) -> CoreResult<Vec<(String, M)>> {
        self.inner
            .list()
            .await?
            .into_iter()
            .map(|document| {
                let model = M::from_document(&document.value()?)?;
                Ok((document.id().to_string(), model))
            })
            .collect()
    }

    /// Adds a model and returns its id.
    pub async fn add(&self, model: &M) -> CoreResult<String> {
        let value = model.to_document()?;
        M::SCHEMA.validate(&value)?;
        let document = self.inner.add(value).await?;
        Ok(document.id().to_string())
    }

    /// Replaces the declared attributes of document `id` with `model`'s.
    pub async fn put(&self, id: &str, model: &M) -> CoreResult<()> {
        let value = model.to_document()?;
        M::SCHEMA.validate(&value)?;
        self.inner.doc(id).update(value).await?;
        Ok(())
    }
}
