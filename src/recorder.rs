//! Wrapped driver entry points: time the original call, then record it.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use bson::Document;
use parking_lot::Mutex;
use tracing::{field, Instrument, Span};

use crate::config::TrackerConfig;
use crate::cursor::CursorInternals;
use crate::extract::extract_query;
use crate::record::{InsertRecord, InsertedRef, QueryRecord, RemoveRecord, StackFrame, UpdateRecord};
use crate::stacktrace::StackCollector;

/// Arguments of an update the tracker records.
///
/// Everything else the driver passes stays inside the call closure.
#[derive(Debug, Clone, Copy)]
pub struct UpdateCall<'a> {
    pub criteria: &'a Document,
    pub document: &'a Document,
    pub upsert: bool,
    pub multi: bool,
}

/// The four append-only operation logs.
#[derive(Debug, Default, Clone)]
pub(crate) struct OperationLog {
    pub queries: Vec<QueryRecord>,
    pub inserts: Vec<InsertRecord>,
    pub updates: Vec<UpdateRecord>,
    pub removes: Vec<RemoveRecord>,
}

impl OperationLog {
    pub fn clear(&mut self) {
        self.queries.clear();
        self.inserts.clear();
        self.updates.clear();
        self.removes.clear();
    }

    pub fn len(&self) -> usize {
        self.queries.len() + self.inserts.len() + self.updates.len() + self.removes.len()
    }

    pub fn total_time(&self) -> Duration {
        self.queries.iter().map(|r| r.duration).sum::<Duration>()
            + self.inserts.iter().map(|r| r.duration).sum::<Duration>()
            + self.updates.iter().map(|r| r.duration).sum::<Duration>()
            + self.removes.iter().map(|r| r.duration).sum::<Duration>()
    }
}

/// The wrapped versions of the driver's entry points, shared between a
/// tracker and the hook point it is installed on.
#[derive(Debug)]
pub(crate) struct Recorder {
    config: TrackerConfig,
    stacks: StackCollector,
    pub(crate) log: Mutex<OperationLog>,
}

impl Recorder {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            stacks: StackCollector::new(&config),
            config,
            log: Mutex::new(OperationLog::default()),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn insert<T, E: Display>(
        &self,
        collection: &str,
        docs: InsertedRef<'_>,
        call: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let span = self.create_span("insert", collection, None);
        let start = Instant::now();
        let result = span.in_scope(call);
        self.record_insert(&span, docs, &result, start);
        result
    }

    pub async fn insert_async<T, E: Display>(
        &self,
        collection: &str,
        docs: InsertedRef<'_>,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let span = self.create_span("insert", collection, None);
        let start = Instant::now();
        let result = call.instrument(span.clone()).await;
        self.record_insert(&span, docs, &result, start);
        result
    }

    pub fn update<T, E: Display>(
        &self,
        collection: &str,
        update: UpdateCall<'_>,
        call: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let span = self.create_span("update", collection, Some(update.criteria));
        let start = Instant::now();
        let result = span.in_scope(call);
        self.record_update(&span, update, &result, start);
        result
    }

    pub async fn update_async<T, E: Display>(
        &self,
        collection: &str,
        update: UpdateCall<'_>,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let span = self.create_span("update", collection, Some(update.criteria));
        let start = Instant::now();
        let result = call.instrument(span.clone()).await;
        self.record_update(&span, update, &result, start);
        result
    }

    pub fn delete<T, E: Display>(
        &self,
        collection: &str,
        criteria: &Document,
        call: impl FnOnce() -> Result<T, E>,
    ) -> Result<T, E> {
        let span = self.create_span("delete", collection, Some(criteria));
        let start = Instant::now();
        let result = span.in_scope(call);
        self.record_delete(&span, criteria, &result, start);
        result
    }

    pub async fn delete_async<T, E: Display>(
        &self,
        collection: &str,
        criteria: &Document,
        call: impl Future<Output = Result<T, E>>,
    ) -> Result<T, E> {
        let span = self.create_span("delete", collection, Some(criteria));
        let start = Instant::now();
        let result = call.instrument(span.clone()).await;
        self.record_delete(&span, criteria, &result, start);
        result
    }

    pub fn refresh<C, T, E>(
        &self,
        cursor: &mut C,
        call: impl FnOnce(&mut C) -> Result<T, E>,
    ) -> Result<T, E>
    where
        C: CursorInternals + ?Sized,
        E: Display,
    {
        // A get-more continues a query that is already recorded.
        if cursor.continuation_id().is_some() {
            return call(cursor);
        }

        let span = self.create_span("query", cursor.collection_name(), None);
        let start = Instant::now();
        let result = span.in_scope(|| call(&mut *cursor));
        self.record_query(&span, cursor, &result, start);
        result
    }

    pub async fn refresh_async<C, T, E, F>(&self, cursor: &mut C, call: F) -> Result<T, E>
    where
        C: CursorInternals + ?Sized,
        E: Display,
        F: for<'c> FnOnce(&'c mut C) -> Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>,
    {
        if cursor.continuation_id().is_some() {
            return call(cursor).await;
        }

        let span = self.create_span("query", cursor.collection_name(), None);
        let start = Instant::now();
        let result = call(&mut *cursor).instrument(span.clone()).await;
        self.record_query(&span, cursor, &result, start);
        result
    }

    fn record_insert<T, E: Display>(
        &self,
        span: &Span,
        docs: InsertedRef<'_>,
        result: &Result<T, E>,
        start: Instant,
    ) {
        let Some((duration, stack_trace)) = self.complete(span, result, start) else {
            return;
        };
        span.record("db.rows_affected", docs.len() as u64);
        self.log.lock().inserts.push(InsertRecord {
            document: docs.to_documents(),
            duration,
            stack_trace,
        });
    }

    fn record_update<T, E: Display>(
        &self,
        span: &Span,
        update: UpdateCall<'_>,
        result: &Result<T, E>,
        start: Instant,
    ) {
        let Some((duration, stack_trace)) = self.complete(span, result, start) else {
            return;
        };
        if self.config.log_documents {
            span.record("db.mongodb.update", update.document.to_string().as_str());
        }
        self.log.lock().updates.push(UpdateRecord {
            document: update.document.clone(),
            upsert: update.upsert,
            multi: update.multi,
            criteria: update.criteria.clone(),
            duration,
            stack_trace,
        });
    }

    fn record_delete<T, E: Display>(
        &self,
        span: &Span,
        criteria: &Document,
        result: &Result<T, E>,
        start: Instant,
    ) {
        let Some((duration, stack_trace)) = self.complete(span, result, start) else {
            return;
        };
        self.log.lock().removes.push(RemoveRecord {
            criteria: criteria.clone(),
            duration,
            stack_trace,
        });
    }

    fn record_query<C, T, E>(&self, span: &Span, cursor: &C, result: &Result<T, E>, start: Instant)
    where
        C: CursorInternals + ?Sized,
        E: Display,
    {
        let Some((duration, stack_trace)) = self.complete(span, result, start) else {
            return;
        };

        let mut record = extract_query(cursor);
        record.duration = duration;
        record.stack_trace = stack_trace;

        span.record("db.operation", record.operation.as_str());
        span.record(
            "otel.name",
            format!("{} {}", record.operation, record.collection).as_str(),
        );
        span.record("db.rows_affected", record.result.len() as u64);
        if self.config.log_documents {
            if let Some(query) = &record.query {
                span.record("db.statement", query.to_string().as_str());
            }
        }

        self.log.lock().queries.push(record);
    }

    /// Create a span for one wrapped call. It becomes a child of whatever
    /// span is current in the driver's caller.
    fn create_span(&self, operation: &'static str, collection: &str, filter: Option<&Document>) -> Span {
        let span_name = format!("{} {}", operation, collection);
        let span = tracing::info_span!(
            "db.query",
            otel.name = %span_name,
            db.system = "mongodb",
            db.operation = %operation,
            db.mongodb.collection = %collection,
            db.statement = field::Empty,
            db.mongodb.update = field::Empty,
            db.rows_affected = field::Empty,
            db.duration_ms = field::Empty,
            otel.status_code = field::Empty,
            error.message = field::Empty,
            slow_query = field::Empty,
        );

        if self.config.log_documents {
            if let Some(filter) = filter {
                span.record("db.statement", filter.to_string().as_str());
            }
        }

        span
    }

    /// Record timing and outcome on the span. Returns the elapsed time and a
    /// stack trace when the call succeeded and should be logged.
    fn complete<T, E: Display>(
        &self,
        span: &Span,
        result: &Result<T, E>,
        start: Instant,
    ) -> Option<(Duration, Vec<StackFrame>)> {
        let duration = start.elapsed();
        let duration_ms = duration.as_millis() as i64;
        span.record("db.duration_ms", duration_ms);

        if duration > self.config.slow_query_threshold {
            span.record("slow_query", true);
            let threshold_ms = self.config.slow_query_threshold.as_millis() as i64;
            tracing::warn!(
                parent: span,
                duration_ms = duration_ms,
                threshold_ms = threshold_ms,
                "Slow database operation detected"
            );
        }

        match result {
            Ok(_) => {
                span.record("otel.status_code", "OK");
                Some((duration, self.stacks.collect()))
            }
            Err(e) => {
                span.record("otel.status_code", "ERROR");
                span.record("error.message", e.to_string().as_str());
                tracing::error!(
                    parent: span,
                    error = %e,
                    "Database operation failed"
                );
                None
            }
        }
    }
}
