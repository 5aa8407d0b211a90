//! Log records produced by the tracker.

use std::fmt;
use std::time::Duration;

use bson::{Bson, Document};

/// One frame of a captured call stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub file: String,
    pub line: u32,
    pub function: String,
    /// Trimmed source line, empty when the file could not be read.
    pub source: String,
}

/// Documents handed to an insert, as the driver passed them.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertedDocuments {
    One(Document),
    Many(Vec<Document>),
}

impl InsertedDocuments {
    pub fn len(&self) -> usize {
        match self {
            InsertedDocuments::One(_) => 1,
            InsertedDocuments::Many(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        let docs: &[Document] = match self {
            InsertedDocuments::One(doc) => std::slice::from_ref(doc),
            InsertedDocuments::Many(docs) => docs,
        };
        docs.iter()
    }
}

impl From<Document> for InsertedDocuments {
    fn from(doc: Document) -> Self {
        InsertedDocuments::One(doc)
    }
}

impl From<Vec<Document>> for InsertedDocuments {
    fn from(docs: Vec<Document>) -> Self {
        InsertedDocuments::Many(docs)
    }
}

/// Borrowed form of [`InsertedDocuments`] that drivers hand to the hook point.
#[derive(Debug, Clone, Copy)]
pub enum InsertedRef<'a> {
    One(&'a Document),
    Many(&'a [Document]),
}

impl InsertedRef<'_> {
    pub fn len(&self) -> usize {
        match self {
            InsertedRef::One(_) => 1,
            InsertedRef::Many(docs) => docs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_documents(&self) -> InsertedDocuments {
        match self {
            InsertedRef::One(doc) => InsertedDocuments::One((*doc).clone()),
            InsertedRef::Many(docs) => InsertedDocuments::Many(docs.to_vec()),
        }
    }
}

impl<'a> From<&'a Document> for InsertedRef<'a> {
    fn from(doc: &'a Document) -> Self {
        InsertedRef::One(doc)
    }
}

impl<'a> From<&'a [Document]> for InsertedRef<'a> {
    fn from(docs: &'a [Document]) -> Self {
        InsertedRef::Many(docs)
    }
}

impl<'a> From<&'a Vec<Document>> for InsertedRef<'a> {
    fn from(docs: &'a Vec<Document>) -> Self {
        InsertedRef::Many(docs)
    }
}

/// Requested result limit of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// No limit was requested.
    #[default]
    Unbounded,
    At(u64),
}

impl Limit {
    /// Interpret a raw driver limit. Negative limits (single-batch requests)
    /// count by magnitude and zero means no limit.
    pub fn from_raw(raw: i64) -> Self {
        match raw.unsigned_abs() {
            0 => Limit::Unbounded,
            n => Limit::At(n),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self, Limit::Unbounded)
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Unbounded => f.write_str("none"),
            Limit::At(n) => write!(f, "{}", n),
        }
    }
}

/// Kind of a recorded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOperation {
    Find,
    Command,
    Count,
    Aggregate,
}

impl QueryOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryOperation::Find => "find",
            QueryOperation::Command => "command",
            QueryOperation::Count => "count",
            QueryOperation::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for QueryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for QueryOperation {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertRecord {
    pub document: InsertedDocuments,
    pub duration: Duration,
    pub stack_trace: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRecord {
    pub document: Document,
    pub upsert: bool,
    pub multi: bool,
    pub criteria: Document,
    pub duration: Duration,
    pub stack_trace: Vec<StackFrame>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemoveRecord {
    pub criteria: Document,
    pub duration: Duration,
    pub stack_trace: Vec<StackFrame>,
}

/// A first query issued by a cursor.
///
/// Plain commands only carry `operation`, `collection`, timing and stack
/// trace; the remaining fields keep their empty values.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecord {
    pub operation: QueryOperation,
    pub collection: String,
    pub skip: Option<u64>,
    pub limit: Limit,
    /// Filter document, or the pipeline array for aggregations.
    pub query: Option<Bson>,
    /// Copy of the first batch the cursor received.
    pub result: Vec<Document>,
    /// Formatted sort specification, e.g. `+name, -age`.
    pub ordering: Option<String>,
    pub duration: Duration,
    pub stack_trace: Vec<StackFrame>,
}

impl QueryRecord {
    pub(crate) fn new(operation: QueryOperation, collection: impl Into<String>) -> Self {
        Self {
            operation,
            collection: collection.into(),
            skip: None,
            limit: Limit::Unbounded,
            query: None,
            result: Vec::new(),
            ordering: None,
            duration: Duration::ZERO,
            stack_trace: Vec::new(),
        }
    }

    /// The filter as a document, when the query carries one.
    pub fn filter(&self) -> Option<&Document> {
        self.query.as_ref().and_then(Bson::as_document)
    }
}

macro_rules! impl_time_ms {
    ($($record:ty),*) => {
        $(
            impl $record {
                /// Elapsed time of the call in milliseconds.
                pub fn time_ms(&self) -> f64 {
                    self.duration.as_secs_f64() * 1000.0
                }
            }
        )*
    };
}

impl_time_ms!(InsertRecord, UpdateRecord, RemoveRecord, QueryRecord);
