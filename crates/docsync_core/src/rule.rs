//! Path-pattern authorization rules.
//!
//! A [`Rule`] pairs a path pattern such as `/users/:uid/posts/:id` with a
//! read and a write [`Permission`]. Rules are compiled once into a
//! [`RuleSet`], which is immutable and cheap to share between sessions.
//!
//! # Evaluation
//!
//! [`RuleSet::authorize`] encodes the requested path and scans the rules in
//! declaration order. The **first** rule whose pattern matches decides;
//! later rules are never consulted, even if more specific. No match denies.
//!
//! Collection-level checks (list, collection subscriptions, the write check
//! of `add`) are evaluated against a synthetic document whose id is
//! [`PLACEHOLDER_ID`]. A write predicate that inspects the id therefore sees
//! `$id` for `add`, never the generated id.
//!
//! # Predicates
//!
//! A [`Permission::Dynamic`] predicate receives the resolved document path,
//! the captured parameters and a [`Reader`]. Reader calls bypass
//! authorization. A predicate error is reported as
//! [`CoreError::RuleEvaluation`], never as a denial.

use crate::error::{CoreError, CoreResult};
use crate::path::{CollectionPath, DocumentPath, Path, PathElement, SEPARATOR};
use crate::value::Document;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Id used in place of a document id when authorizing a collection path.
pub const PLACEHOLDER_ID: &str = "$id";

/// Kind of access being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Reading documents or subscribing to them.
    Read,
    /// Creating, updating or removing documents.
    Write,
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::Read => f.write_str("read"),
            AccessMode::Write => f.write_str("write"),
        }
    }
}

/// Read-only data access handed to rule predicates.
#[async_trait]
pub trait Reader: Send + Sync {
    /// Returns the document at `path`, or `None` if it does not exist.
    async fn get(&self, path: &DocumentPath) -> CoreResult<Option<Document>>;

    /// Returns every document in the collection as `(id, value)` pairs.
    async fn list(&self, path: &CollectionPath) -> CoreResult<Vec<(String, Document)>>;

    /// Returns the id of the user on whose behalf the request runs.
    async fn user_id(&self) -> CoreResult<Option<String>>;
}

/// Named parameters captured from a rule pattern, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(Vec<(String, String)>);

impl Params {
    /// Returns the value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over `(name, value)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the number of captured parameters.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A data-dependent permission check.
pub type Predicate = Arc<
    dyn Fn(DocumentPath, Params, Arc<dyn Reader>) -> BoxFuture<'static, CoreResult<bool>>
        + Send
        + Sync,
>;

/// Permission for one access mode of a rule.
#[derive(Clone)]
pub enum Permission {
    /// Fixed decision; the reader is never consulted.
    Static(bool),
    /// Decision computed by a predicate.
    Dynamic(Predicate),
}

impl Permission {
    /// Creates a dynamic permission from an async closure.
    pub fn when<F, Fut>(predicate: F) -> Self
    where
        F: Fn(DocumentPath, Params, Arc<dyn Reader>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<bool>> + Send + 'static,
    {
        Permission::Dynamic(Arc::new(move |path, params, reader| {
            predicate(path, params, reader).boxed()
        }))
    }
}

impl From<bool> for Permission {
    fn from(allowed: bool) -> Self {
        Permission::Static(allowed)
    }
}

impl fmt::Debug for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Permission::Static(allowed) => f.debug_tuple("Static").field(allowed).finish(),
            Permission::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl PartialEq for Permission {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Permission::Static(a), Permission::Static(b)) => a == b,
            (Permission::Dynamic(a), Permission::Dynamic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A declared authorization rule.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    /// Path pattern, e.g. `/posts/:id`.
    pub path: String,
    /// Permission for reads.
    pub read: Permission,
    /// Permission for writes.
    pub write: Permission,
}

impl Rule {
    /// Creates a rule that denies both reads and writes.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            read: Permission::Static(false),
            write: Permission::Static(false),
        }
    }

    /// Creates a rule that allows both reads and writes.
    pub fn allow_all(path: impl Into<String>) -> Self {
        Self::new(path).read(true).write(true)
    }

    /// Sets the read permission.
    pub fn read(mut self, permission: impl Into<Permission>) -> Self {
        self.read = permission.into();
        self
    }

    /// Sets the write permission.
    pub fn write(mut self, permission: impl Into<Permission>) -> Self {
        self.write = permission.into();
        self
    }

    /// Sets a predicate as the read permission.
    pub fn read_if<F, Fut>(self, predicate: F) -> Self
    where
        F: Fn(DocumentPath, Params, Arc<dyn Reader>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<bool>> + Send + 'static,
    {
        self.read(Permission::when(predicate))
    }

    /// Sets a predicate as the write permission.
    pub fn write_if<F, Fut>(self, predicate: F) -> Self
    where
        F: Fn(DocumentPath, Params, Arc<dyn Reader>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CoreResult<bool>> + Send + 'static,
    {
        self.write(Permission::when(predicate))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Stored lowercased; literals match case-insensitively.
    Literal(String),
    Param(String),
}

/// A rule whose pattern has been turned into a matcher.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledRule {
    pattern: String,
    segments: Vec<Segment>,
    read: Permission,
    write: Permission,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Self {
        let body = rule.path.strip_prefix(SEPARATOR).unwrap_or(&rule.path);
        let body = body.strip_suffix(SEPARATOR).unwrap_or(body);
        let segments = body
            .split(SEPARATOR)
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) if !name.is_empty() => Segment::Param(name.to_string()),
                _ => Segment::Literal(segment.to_lowercase()),
            })
            .collect();

        Self {
            pattern: rule.path.clone(),
            segments,
            read: rule.read.clone(),
            write: rule.write.clone(),
        }
    }

    /// Returns the source pattern.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Returns the parameter names in declaration order.
    pub fn param_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|segment| match segment {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// Returns the permission for `mode`.
    pub fn permission(&self, mode: AccessMode) -> &Permission {
        match mode {
            AccessMode::Read => &self.read,
            AccessMode::Write => &self.write,
        }
    }

    /// Matches an encoded path, returning the captured parameters.
    pub fn matches(&self, encoded: &str) -> Option<Params> {
        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
        if parts.len() != self.segments.len() {
            return None;
        }

        let mut captured = Vec::new();
        for (segment, part) in self.segments.iter().zip(parts) {
            match segment {
                Segment::Literal(literal) => {
                    if part.to_lowercase() != *literal {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    if part.is_empty() {
                        return None;
                    }
                    captured.push((name.clone(), part.to_string()));
                }
            }
        }
        Some(Params(captured))
    }
}

/// An immutable, ordered list of compiled rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Arc<[CompiledRule]>,
}

impl RuleSet {
    /// Compiles rules, preserving their order.
    pub fn compile<'a>(rules: impl IntoIterator<Item = &'a Rule>) -> Self {
        let compiled: Vec<CompiledRule> = rules.into_iter().map(CompiledRule::compile).collect();
        Self {
            rules: compiled.into(),
        }
    }

    /// Creates a rule set that denies everything.
    pub fn empty() -> Self {
        Self::compile(std::iter::empty())
    }

    /// Returns the number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if there are no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Iterates over the compiled rules in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &CompiledRule> {
        self.rules.iter()
    }

    /// Returns the first rule matching `encoded` and its parameters.
    pub fn find(&self, encoded: &str) -> Option<(&CompiledRule, Params)> {
        self.rules
            .iter()
            .find_map(|rule| rule.matches(encoded).map(|params| (rule, params)))
    }

    /// Decides whether `mode` access to `path` is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RuleEvaluation`] if a predicate fails.
    pub async fn authorize(
        &self,
        path: &Path,
        mode: AccessMode,
        reader: Arc<dyn Reader>,
    ) -> CoreResult<bool> {
        let target = rule_target(path);
        let encoded = target.encode();

        let Some((rule, params)) = self.find(&encoded) else {
            debug!(path = %encoded, %mode, "no rule matches, denying");
            return Ok(false);
        };

        match rule.permission(mode) {
            Permission::Static(allowed) => Ok(*allowed),
            Permission::Dynamic(predicate) => {
                predicate(target, params, reader)
                    .await
                    .map_err(|err| match err {
                        CoreError::RuleEvaluation(_) => err,
                        other => CoreError::RuleEvaluation(format!(
                            "rule '{}' failed: {other}",
                            rule.pattern()
                        )),
                    })
            }
        }
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

/// Compiles rules into a [`RuleSet`].
pub fn compile(rules: &[Rule]) -> RuleSet {
    RuleSet::compile(rules)
}

/// Authorizes `mode` access to `path` against `rules`.
pub async fn authorize(
    path: &Path,
    rules: &RuleSet,
    mode: AccessMode,
    reader: Arc<dyn Reader>,
) -> CoreResult<bool> {
    rules.authorize(path, mode, reader).await
}

/// Returns the document path a rule check is evaluated against.
///
/// Collection paths address a synthetic child whose id is
/// [`PLACEHOLDER_ID`].
pub fn rule_target(path: &Path) -> DocumentPath {
    match path {
        Path::Document(path) => path.clone(),
        Path::Collection(path) => {
            let mut elements = path.parent_path.elements().to_vec();
            elements.push(PathElement::new(path.collection.clone(), PLACEHOLDER_ID));
            DocumentPath::new(elements)
        }
    }
}
