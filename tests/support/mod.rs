//! In-memory document driver used by the integration tests.
//!
//! It routes its entry points through a `HookPoint` the way a real driver
//! would, and serves query results in batches so get-more continuations
//! can be exercised.
#![allow(dead_code)]

use std::cmp::Ordering;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering as AtomicOrdering};
use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson, Document};
use op_tracker::{CursorInternals, HookPoint, HookTarget, UpdateCall, COMMAND_COLLECTION};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_BATCH_SIZE: usize = 101;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MemoryError {
    #[error("injected failure in {0}")]
    Injected(&'static str),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("cursor {0} not found")]
    CursorNotFound(i64),
}

pub type MemoryResult<T> = Result<T, MemoryError>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
    pub upserted: bool,
}

#[derive(Debug, Default, Clone)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: i64,
    pub limit: i64,
    pub batch_size: Option<usize>,
}

#[derive(Debug)]
struct Inner {
    database: String,
    hooks: HookPoint,
    collections: Mutex<HashMap<String, Vec<Document>>>,
    fail_next: AtomicBool,
    next_cursor_id: AtomicI64,
}

impl Inner {
    fn check_failure(&self, operation: &'static str) -> MemoryResult<()> {
        if self.fail_next.swap(false, AtomicOrdering::SeqCst) {
            return Err(MemoryError::Injected(operation));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryClient {
    inner: Arc<Inner>,
}

impl MemoryClient {
    pub fn new(database: &str) -> Self {
        Self::with_hook_point(database, HookPoint::new())
    }

    pub fn with_hook_point(database: &str, hooks: HookPoint) -> Self {
        Self {
            inner: Arc::new(Inner {
                database: database.to_string(),
                hooks,
                collections: Mutex::new(HashMap::new()),
                fail_next: AtomicBool::new(false),
                next_cursor_id: AtomicI64::new(1),
            }),
        }
    }

    pub fn collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            inner: Arc::clone(&self.inner),
            name: name.to_string(),
        }
    }

    /// Make the next driver operation fail.
    pub fn fail_next_operation(&self) {
        self.inner.fail_next.store(true, AtomicOrdering::SeqCst);
    }

    /// Run an administrative command and return its first reply document.
    pub fn run_command(&self, command: Document) -> MemoryResult<Document> {
        let mut cursor = MemoryCursor::command(Arc::clone(&self.inner), command);
        cursor.next().transpose().map(Option::unwrap_or_default)
    }
}

impl HookTarget for MemoryClient {
    fn hook_point(&self) -> &HookPoint {
        &self.inner.hooks
    }
}

#[derive(Debug, Clone)]
pub struct MemoryCollection {
    inner: Arc<Inner>,
    name: String,
}

impl MemoryCollection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stored documents, bypassing the hook point.
    pub fn raw_documents(&self) -> Vec<Document> {
        self.inner
            .collections
            .lock()
            .get(&self.name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn insert_one(&self, doc: Document) -> MemoryResult<Bson> {
        let doc = with_id(doc);
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        self.inner
            .hooks
            .insert(&self.name, &doc, || self.store(std::slice::from_ref(&doc)))?;
        Ok(id)
    }

    pub fn insert_many(&self, docs: Vec<Document>) -> MemoryResult<usize> {
        let docs: Vec<Document> = docs.into_iter().map(with_id).collect();
        self.inner.hooks.insert(&self.name, &docs, || self.store(&docs))?;
        Ok(docs.len())
    }

    pub async fn insert_one_async(&self, doc: Document) -> MemoryResult<Bson> {
        let doc = with_id(doc);
        let id = doc.get("_id").cloned().unwrap_or(Bson::Null);
        self.inner
            .hooks
            .insert_async(&self.name, &doc, async {
                tokio::task::yield_now().await;
                self.store(std::slice::from_ref(&doc))
            })
            .await?;
        Ok(id)
    }

    pub fn update_one(&self, filter: Document, update: Document) -> MemoryResult<UpdateResult> {
        self.update(filter, update, false, false)
    }

    pub fn update_many(&self, filter: Document, update: Document) -> MemoryResult<UpdateResult> {
        self.update(filter, update, false, true)
    }

    pub fn replace_one(&self, filter: Document, replacement: Document) -> MemoryResult<UpdateResult> {
        self.update(filter, replacement, false, false)
    }

    pub fn upsert_one(&self, filter: Document, update: Document) -> MemoryResult<UpdateResult> {
        self.update(filter, update, true, false)
    }

    pub async fn update_one_async(
        &self,
        filter: Document,
        update: Document,
    ) -> MemoryResult<UpdateResult> {
        let call = UpdateCall {
            criteria: &filter,
            document: &update,
            upsert: false,
            multi: false,
        };
        self.inner
            .hooks
            .update_async(&self.name, call, async {
                self.apply_update(&filter, &update, false, false)
            })
            .await
    }

    fn update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        multi: bool,
    ) -> MemoryResult<UpdateResult> {
        let call = UpdateCall {
            criteria: &filter,
            document: &update,
            upsert,
            multi,
        };
        self.inner.hooks.update(&self.name, call, || {
            self.apply_update(&filter, &update, upsert, multi)
        })
    }

    pub fn delete_one(&self, filter: Document) -> MemoryResult<u64> {
        self.inner
            .hooks
            .delete(&self.name, &filter, || self.apply_delete(&filter, false))
    }

    pub fn delete_many(&self, filter: Document) -> MemoryResult<u64> {
        self.inner
            .hooks
            .delete(&self.name, &filter, || self.apply_delete(&filter, true))
    }

    pub async fn delete_many_async(&self, filter: Document) -> MemoryResult<u64> {
        self.inner
            .hooks
            .delete_async(&self.name, &filter, async { self.apply_delete(&filter, true) })
            .await
    }

    pub fn find(&self, filter: Document) -> MemoryCursor {
        self.find_with(filter, FindOptions::default())
    }

    pub fn find_with(&self, filter: Document, options: FindOptions) -> MemoryCursor {
        let spec = match options.sort {
            Some(sort) => doc! { "$query": filter, "$orderby": sort },
            None => filter,
        };
        MemoryCursor {
            inner: Arc::clone(&self.inner),
            namespace: format!("{}.{}", self.inner.database, self.name),
            spec,
            skip: options.skip,
            limit: options.limit,
            batch_size: options.batch_size.unwrap_or(DEFAULT_BATCH_SIZE).max(1),
            id: None,
            started: false,
            exhausted: false,
            buffer: Vec::new(),
            server_side: Vec::new(),
        }
    }

    pub fn find_one(&self, filter: Document) -> MemoryResult<Option<Document>> {
        let options = FindOptions {
            limit: -1,
            ..FindOptions::default()
        };
        self.find_with(filter, options).next().transpose()
    }

    pub fn count_documents(&self, filter: Document) -> MemoryResult<u64> {
        let command = doc! { "count": self.name.as_str(), "query": filter, "limit": 0, "skip": 0 };
        let mut cursor = MemoryCursor::command(Arc::clone(&self.inner), command);
        let reply = cursor.next().transpose()?.unwrap_or_default();
        Ok(reply.get_i64("n").unwrap_or(0) as u64)
    }

    pub fn aggregate(&self, pipeline: Vec<Document>) -> MemoryResult<Vec<Document>> {
        let command = doc! { "aggregate": self.name.as_str(), "pipeline": pipeline, "cursor": {} };
        MemoryCursor::command(Arc::clone(&self.inner), command).collect()
    }

    fn store(&self, docs: &[Document]) -> MemoryResult<()> {
        self.inner.check_failure("insert")?;
        self.inner
            .collections
            .lock()
            .entry(self.name.clone())
            .or_default()
            .extend(docs.iter().cloned());
        Ok(())
    }

    fn apply_update(
        &self,
        filter: &Document,
        update: &Document,
        upsert: bool,
        multi: bool,
    ) -> MemoryResult<UpdateResult> {
        self.inner.check_failure("update")?;
        let mut collections = self.inner.collections.lock();
        let docs = collections.entry(self.name.clone()).or_default();

        let mut result = UpdateResult::default();
        for doc in docs.iter_mut().filter(|doc| matches(doc, filter)) {
            result.matched += 1;
            let updated = apply_update_document(doc, update);
            if &updated != doc {
                *doc = updated;
                result.modified += 1;
            }
            if !multi {
                break;
            }
        }

        if result.matched == 0 && upsert {
            let base = with_id(filter.clone());
            docs.push(apply_update_document(&base, update));
            result.upserted = true;
        }
        Ok(result)
    }

    fn apply_delete(&self, filter: &Document, multi: bool) -> MemoryResult<u64> {
        self.inner.check_failure("delete")?;
        let mut collections = self.inner.collections.lock();
        let docs = collections.entry(self.name.clone()).or_default();

        let mut deleted = 0;
        docs.retain(|doc| {
            if (multi || deleted == 0) && matches(doc, filter) {
                deleted += 1;
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }
}

/// Cursor over a query or command reply, fetched in batches.
#[derive(Debug)]
pub struct MemoryCursor {
    inner: Arc<Inner>,
    namespace: String,
    spec: Document,
    skip: i64,
    limit: i64,
    batch_size: usize,
    id: Option<i64>,
    started: bool,
    exhausted: bool,
    buffer: Vec<Document>,
    server_side: Vec<Document>,
}

impl MemoryCursor {
    fn command(inner: Arc<Inner>, command: Document) -> Self {
        let namespace = format!("{}.{}", inner.database, COMMAND_COLLECTION);
        Self {
            inner,
            namespace,
            spec: command,
            skip: 0,
            limit: 0,
            batch_size: DEFAULT_BATCH_SIZE,
            id: None,
            started: false,
            exhausted: false,
            buffer: Vec::new(),
            server_side: Vec::new(),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted && self.buffer.is_empty()
    }

    /// Drop whatever is buffered, as a driver does when a cursor is closed.
    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
    }

    pub fn set_batch_size(&mut self, batch_size: usize) {
        self.batch_size = batch_size.max(1);
    }

    fn refresh(&mut self) -> MemoryResult<usize> {
        let inner = Arc::clone(&self.inner);
        inner.hooks.refresh(&mut *self, MemoryCursor::fetch)
    }

    pub async fn next_async(&mut self) -> Option<MemoryResult<Document>> {
        if self.buffer.is_empty() && !self.exhausted {
            let inner = Arc::clone(&self.inner);
            if let Err(e) = inner.hooks.refresh_async(&mut *self, fetch_boxed).await {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.pop_front().map(Ok)
    }

    fn pop_front(&mut self) -> Option<Document> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.remove(0))
        }
    }

    fn fetch(&mut self) -> MemoryResult<usize> {
        match self.id {
            Some(id) => self.get_more(id),
            None if !self.started => self.first_query(),
            None => Ok(0),
        }
    }

    fn first_query(&mut self) -> MemoryResult<usize> {
        self.inner.check_failure("query")?;
        self.started = true;

        let mut results = self.run_query()?;
        let batch_size = if self.limit < 0 {
            self.limit.unsigned_abs() as usize
        } else {
            self.batch_size
        };
        let rest = if results.len() > batch_size {
            results.split_off(batch_size)
        } else {
            Vec::new()
        };

        self.buffer = results;
        if rest.is_empty() || self.limit < 0 {
            self.exhausted = true;
        } else {
            self.server_side = rest;
            self.id = Some(self.inner.next_cursor_id.fetch_add(1, AtomicOrdering::SeqCst));
        }
        Ok(self.buffer.len())
    }

    fn get_more(&mut self, id: i64) -> MemoryResult<usize> {
        if self.exhausted {
            return Err(MemoryError::CursorNotFound(id));
        }
        let take = self.batch_size.min(self.server_side.len());
        self.buffer = self.server_side.drain(..take).collect();
        if self.server_side.is_empty() {
            self.exhausted = true;
        }
        Ok(self.buffer.len())
    }

    fn run_query(&self) -> MemoryResult<Vec<Document>> {
        if self.collection_name() == COMMAND_COLLECTION {
            return self.run_command();
        }

        let collections = self.inner.collections.lock();
        let stored = collections
            .get(self.collection_name())
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let filter = match self.spec.get_document("$query") {
            Ok(inner) => inner,
            Err(_) => &self.spec,
        };
        let mut results: Vec<Document> =
            stored.iter().filter(|doc| matches(doc, filter)).cloned().collect();

        if let Ok(sort) = self.spec.get_document("$orderby") {
            sort_documents(&mut results, sort);
        }

        let skip = self.skip.max(0) as usize;
        let mut results: Vec<Document> = results.into_iter().skip(skip).collect();
        let limit = self.limit.unsigned_abs() as usize;
        if limit > 0 {
            results.truncate(limit);
        }
        Ok(results)
    }

    fn run_command(&self) -> MemoryResult<Vec<Document>> {
        let collections = self.inner.collections.lock();
        let stored = |name: &str| collections.get(name).cloned().unwrap_or_default();

        if let Ok(target) = self.spec.get_str("count") {
            let filter = self.spec.get_document("query").cloned().unwrap_or_default();
            let n = stored(target).iter().filter(|doc| matches(doc, &filter)).count();
            return Ok(vec![doc! { "n": n as i64, "ok": 1.0 }]);
        }

        if let Ok(target) = self.spec.get_str("aggregate") {
            let mut docs = stored(target);
            let pipeline = self.spec.get_array("pipeline").cloned().unwrap_or_default();
            for stage in pipeline.iter().filter_map(Bson::as_document) {
                if let Ok(filter) = stage.get_document("$match") {
                    docs.retain(|doc| matches(doc, filter));
                } else if let Ok(sort) = stage.get_document("$sort") {
                    sort_documents(&mut docs, sort);
                } else if let Some(n) = stage.get("$limit").and_then(as_i64) {
                    docs.truncate(n.max(0) as usize);
                } else if let Some(n) = stage.get("$skip").and_then(as_i64) {
                    docs = docs.into_iter().skip(n.max(0) as usize).collect();
                }
            }
            return Ok(docs);
        }

        if self.spec.contains_key("ping") {
            return Ok(vec![doc! { "ok": 1.0 }]);
        }

        let name = self.spec.keys().next().cloned().unwrap_or_default();
        Err(MemoryError::UnsupportedCommand(name))
    }
}

fn fetch_boxed(
    cursor: &mut MemoryCursor,
) -> Pin<Box<dyn Future<Output = MemoryResult<usize>> + Send + '_>> {
    Box::pin(async move {
        tokio::task::yield_now().await;
        cursor.fetch()
    })
}

impl Iterator for MemoryCursor {
    type Item = MemoryResult<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refresh() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.pop_front().map(Ok)
    }
}

impl CursorInternals for MemoryCursor {
    fn continuation_id(&self) -> Option<i64> {
        self.id
    }

    fn query_spec(&self) -> Document {
        self.spec.clone()
    }

    fn skip(&self) -> i64 {
        self.skip
    }

    fn limit(&self) -> i64 {
        self.limit
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn batch(&self) -> &[Document] {
        &self.buffer
    }
}

fn with_id(mut doc: Document) -> Document {
    if !doc.contains_key("_id") {
        doc.insert("_id", ObjectId::new());
    }
    doc
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, expected)| doc.get(key) == Some(expected))
}

fn apply_update_document(doc: &Document, update: &Document) -> Document {
    match update.get_document("$set") {
        Ok(set) => {
            let mut updated = doc.clone();
            for (key, value) in set {
                updated.insert(key.clone(), value.clone());
            }
            updated
        }
        Err(_) => {
            let mut replaced = Document::new();
            if let Some(id) = doc.get("_id") {
                replaced.insert("_id", id.clone());
            }
            for (key, value) in update {
                replaced.insert(key.clone(), value.clone());
            }
            replaced
        }
    }
}

fn sort_documents(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (field, direction) in sort {
            let ordering = compare_bson(a.get(field), b.get(field));
            let ordering = if as_i64(direction).unwrap_or(1) < 0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
}

fn compare_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (Some(Bson::String(a)), Some(Bson::String(b))) => a.cmp(b),
        (Some(a), Some(b)) => match (as_f64(a), as_f64(b)) {
            (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
            _ => Ordering::Equal,
        },
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

/// Copy of a document without its `_id`.
pub fn without_id(doc: &Document) -> Document {
    let mut doc = doc.clone();
    doc.remove("_id");
    doc
}
