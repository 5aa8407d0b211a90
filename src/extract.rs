//! Decoding of cursor query specifications into query records.

use bson::{Bson, Document};

use crate::cursor::CursorInternals;
use crate::record::{Limit, QueryOperation, QueryRecord};

/// Pseudo-collection that administrative commands are issued against.
pub const COMMAND_COLLECTION: &str = "$cmd";

const QUERY_ENVELOPE: &str = "$query";
const ORDER_BY: &str = "$orderby";

/// Build the record for a first query from the cursor state after the fetch.
///
/// Timing and stack trace are left for the caller to fill in.
pub fn extract_query<C: CursorInternals + ?Sized>(cursor: &C) -> QueryRecord {
    let spec = cursor.query_spec();
    let collection = cursor.collection_name();
    // Copied now: the cursor drains its buffer as it is iterated.
    let result = cursor.batch().to_vec();

    if collection == COMMAND_COLLECTION {
        return extract_command(unwrap_envelope(&spec), result);
    }

    let mut record = QueryRecord::new(QueryOperation::Find, collection);
    record.skip = Some(cursor.skip().unsigned_abs());
    record.limit = Limit::from_raw(cursor.limit());
    record.query = Some(Bson::Document(unwrap_envelope(&spec).clone()));
    record.ordering = format_ordering(&spec);
    record.result = result;
    record
}

fn extract_command(command: &Document, result: Vec<Document>) -> QueryRecord {
    if let Some(target) = command.get("count") {
        let mut record = QueryRecord::new(QueryOperation::Count, bson_name(target));
        record.skip = Some(command.get("skip").and_then(bson_to_i64).unwrap_or(0).unsigned_abs());
        record.limit = Limit::from_raw(command.get("limit").and_then(bson_to_i64).unwrap_or(0));
        record.query = Some(Bson::Document(count_filter(command)));
        record.result = result;
        return record;
    }

    if let Some(target) = command.get("aggregate") {
        let mut record = QueryRecord::new(QueryOperation::Aggregate, bson_name(target));
        record.skip = Some(0);
        record.limit = Limit::Unbounded;
        record.query = Some(
            command
                .get("pipeline")
                .cloned()
                .unwrap_or_else(|| Bson::Array(Vec::new())),
        );
        record.result = result;
        return record;
    }

    QueryRecord::new(QueryOperation::Command, COMMAND_COLLECTION)
}

/// Filter of a count command. Accepts both the `query` and `filter` keys and
/// unwraps a `$query` envelope inside either; a missing filter counts everything.
fn count_filter(command: &Document) -> Document {
    ["query", "filter"]
        .iter()
        .find_map(|key| command.get_document(*key).ok())
        .map(|filter| unwrap_envelope(filter).clone())
        .unwrap_or_default()
}

/// The query body, unwrapped from its `$query` envelope when it has one.
pub fn unwrap_envelope(spec: &Document) -> &Document {
    spec.get_document(QUERY_ENVELOPE).unwrap_or(spec)
}

/// Format the `$orderby` modifier of a query spec as `+a, -b`.
///
/// Returns `None` when the spec has no sort. Fields keep the order of the sort
/// specification; non-numeric directions (index hints such as `"text"`) are
/// rendered without a prefix.
pub fn format_ordering(spec: &Document) -> Option<String> {
    let order_by = spec.get_document(ORDER_BY).ok()?;
    let tokens: Vec<String> = order_by
        .iter()
        .map(|(field, direction)| match bson_to_i64(direction) {
            Some(d) if d < 0 => format!("-{}", field),
            Some(d) if d > 0 => format!("+{}", field),
            _ => field.clone(),
        })
        .collect();
    Some(tokens.join(", "))
}

/// Numeric value of a BSON number, truncating doubles.
pub(crate) fn bson_to_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.is_finite() => Some(*n as i64),
        _ => None,
    }
}

fn bson_name(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        other => other.to_string(),
    }
}
