//! Read access to a driver's cursor state.

use bson::Document;

/// Cursor internals the query extractor needs.
///
/// Drivers implement this once for their cursor type. The tracker reads the
/// continuation id before the batch fetch and everything else after it.
pub trait CursorInternals {
    /// Server-side cursor id. `Some` once the first batch has been fetched
    /// and more results remain, i.e. the next fetch is a get-more.
    fn continuation_id(&self) -> Option<i64>;

    /// The query specification as sent to the server. May be wrapped in a
    /// `$query` envelope with `$orderby` and other modifiers beside it.
    fn query_spec(&self) -> Document;

    fn skip(&self) -> i64;

    /// Raw limit. Zero means no limit; negative values request a single batch.
    fn limit(&self) -> i64;

    /// Full namespace, `<database>.<collection>`.
    fn namespace(&self) -> &str;

    /// Documents buffered by the last fetch.
    fn batch(&self) -> &[Document];

    /// Collection part of the namespace. Collection names may contain dots.
    fn collection_name(&self) -> &str {
        let namespace = self.namespace();
        match namespace.split_once('.') {
            Some((_, collection)) => collection,
            None => namespace,
        }
    }
}
