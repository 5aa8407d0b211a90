//! Basic example showing how a driver exposes a hook point and how a
//! tracker records what goes through it.
//!
//! Run with: cargo run --example basic

use std::convert::Infallible;

use bson::{doc, Document};
use op_tracker::prelude::*;
use parking_lot::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A single-collection in-memory "driver".
struct Database {
    hooks: HookPoint,
    people: Mutex<Vec<Document>>,
}

impl HookTarget for Database {
    fn hook_point(&self) -> &HookPoint {
        &self.hooks
    }
}

impl Database {
    fn new() -> Self {
        Self {
            hooks: HookPoint::new(),
            people: Mutex::new(Vec::new()),
        }
    }

    fn insert_one(&self, doc: Document) -> Result<(), Infallible> {
        self.hooks.insert("people", &doc, || {
            self.people.lock().push(doc.clone());
            Ok(())
        })
    }

    fn update_many(&self, filter: Document, set: Document) -> Result<usize, Infallible> {
        let update = doc! { "$set": set.clone() };
        let call = UpdateCall {
            criteria: &filter,
            document: &update,
            upsert: false,
            multi: true,
        };
        self.hooks.update("people", call, || {
            let mut people = self.people.lock();
            let mut modified = 0;
            for person in people.iter_mut().filter(|person| matches(person, &filter)) {
                person.extend(set.clone());
                modified += 1;
            }
            Ok(modified)
        })
    }

    fn delete_many(&self, filter: Document) -> Result<usize, Infallible> {
        self.hooks.delete("people", &filter, || {
            let mut people = self.people.lock();
            let before = people.len();
            people.retain(|person| !matches(person, &filter));
            Ok(before - people.len())
        })
    }

    fn find(&self, filter: Document) -> Result<Vec<Document>, Infallible> {
        let mut cursor = Cursor {
            spec: filter,
            batch: Vec::new(),
        };
        self.hooks.refresh(&mut cursor, |cursor| {
            cursor.batch = self
                .people
                .lock()
                .iter()
                .filter(|person| matches(person, &cursor.spec))
                .cloned()
                .collect();
            Ok::<_, Infallible>(())
        })?;
        Ok(cursor.batch)
    }
}

/// Cursor that always fetches everything in its first batch.
struct Cursor {
    spec: Document,
    batch: Vec<Document>,
}

impl CursorInternals for Cursor {
    fn continuation_id(&self) -> Option<i64> {
        None
    }

    fn query_spec(&self) -> Document {
        self.spec.clone()
    }

    fn skip(&self) -> i64 {
        0
    }

    fn limit(&self) -> i64 {
        0
    }

    fn namespace(&self) -> &str {
        "demo.people"
    }

    fn batch(&self) -> &[Document] {
        &self.batch
    }
}

fn matches(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,op_tracker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let db = Database::new();
    let tracker = Tracker::new(TrackerConfig::development());

    {
        // Everything issued while the scope lives is recorded.
        let _scope = tracker.scope(&db)?;

        db.insert_one(doc! { "email": "jane@example.org", "team": "core" })?;
        db.insert_one(doc! { "email": "john@example.org", "team": "core" })?;
        db.update_many(doc! { "team": "core" }, doc! { "active": true })?;
        db.find(doc! { "active": true })?;
        db.delete_many(doc! { "email": "john@example.org" })?;
    }

    // Not recorded: the tracker is no longer installed.
    db.find(doc! {})?;

    println!(
        "{} operations in {:.3}ms",
        tracker.operation_count(),
        tracker.total_time().as_secs_f64() * 1000.0
    );
    for insert in tracker.inserts() {
        println!("insert  {:?} ({:.3}ms)", insert.document, insert.time_ms());
    }
    for update in tracker.updates() {
        println!(
            "update  {} -> {} multi={} ({:.3}ms)",
            update.criteria,
            update.document,
            update.multi,
            update.time_ms()
        );
    }
    for query in tracker.queries() {
        println!(
            "{:<7} {} filter={:?} results={} ({:.3}ms)",
            query.operation.as_str(),
            query.collection,
            query.filter(),
            query.result.len(),
            query.time_ms()
        );
        if let Some(frame) = query.stack_trace.last() {
            println!("        issued at {}:{} in {}", frame.file, frame.line, frame.function);
        }
    }
    for remove in tracker.removes() {
        println!("remove  {} ({:.3}ms)", remove.criteria, remove.time_ms());
    }

    Ok(())
}
