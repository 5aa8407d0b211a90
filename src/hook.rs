//! The hook point a driver routes its entry points through.

use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bson::Document;
use parking_lot::RwLock;

use crate::cursor::CursorInternals;
use crate::error::{Result, TrackerError};
use crate::record::InsertedRef;
use crate::recorder::{Recorder, UpdateCall};

/// Version of the contract between [`HookPoint`] and the tracker.
pub const HOOK_API_VERSION: u32 = 1;

/// Slot a driver embeds to let one tracker observe its operations.
///
/// The driver calls [`insert`](Self::insert), [`update`](Self::update),
/// [`delete`](Self::delete) and [`refresh`](Self::refresh) around its own
/// implementations of those operations. While no tracker is installed these
/// just run the call; while one is, the call is timed and recorded. Either
/// way the call's result is returned untouched.
///
/// # Example
///
/// ```rust
/// use bson::Document;
/// use op_tracker::{HookPoint, HookTarget};
///
/// struct Collection {
///     name: String,
///     hooks: HookPoint,
///     docs: Vec<Document>,
/// }
///
/// impl Collection {
///     fn insert_one(&mut self, doc: Document) -> Result<(), std::io::Error> {
///         let docs = &mut self.docs;
///         self.hooks.insert(&self.name, &doc, || {
///             docs.push(doc.clone());
///             Ok(())
///         })
///     }
/// }
///
/// impl HookTarget for Collection {
///     fn hook_point(&self) -> &HookPoint {
///         &self.hooks
///     }
/// }
/// ```
#[derive(Debug)]
pub struct HookPoint {
    api_version: u32,
    installed: RwLock<Option<Arc<Recorder>>>,
}

impl Default for HookPoint {
    fn default() -> Self {
        Self::new()
    }
}

impl HookPoint {
    pub fn new() -> Self {
        Self::with_api_version(HOOK_API_VERSION)
    }

    /// Create a hook point speaking a specific hook API version.
    pub fn with_api_version(api_version: u32) -> Self {
        Self {
            api_version,
            installed: RwLock::new(None),
        }
    }

    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Whether a tracker is currently installed.
    pub fn is_hooked(&self) -> bool {
        self.installed.read().is_some()
    }

    /// The installed recorder. The lock is released before the driver call
    /// runs, so wrapped calls may themselves go through the hook point.
    fn current(&self) -> Option<Arc<Recorder>> {
        self.installed.read().clone()
    }

    pub(crate) fn is_installed(&self, recorder: &Arc<Recorder>) -> bool {
        self.installed
            .read()
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, recorder))
    }

    /// Install `recorder` unless it already is. Fails if another recorder
    /// holds the slot or the API versions differ.
    pub(crate) fn install(&self, recorder: &Arc<Recorder>) -> Result<bool> {
        if self.api_version != HOOK_API_VERSION {
            return Err(TrackerError::Incompatible {
                expected: HOOK_API_VERSION,
                found: self.api_version,
            });
        }

        let mut installed = self.installed.write();
        match installed.as_ref() {
            Some(current) if Arc::ptr_eq(current, recorder) => Ok(false),
            Some(_) => Err(TrackerError::Conflict),
            None => {
                *installed = Some(Arc::clone(recorder));
                Ok(true)
            }
        }
    }

    /// Remove `recorder` if it is the one installed.
    pub(crate) fn uninstall(&self, recorder: &Arc<Recorder>) -> bool {
        let mut installed = self.installed.write();
        match installed.as_ref() {
            Some(current) if Arc::ptr_eq(current, recorder) => {
                *installed = None;
                true
            }
            _ => false,
        }
    }

    /// Run a document insertion.
    pub fn insert<'a, T, E: Display>(
        &self,
        collection: &str,
        docs: impl Into<InsertedRef<'a>>,
        call: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.insert(collection, docs.into(), call),
            None => call(),
        }
    }

    /// Run a document update. Upserts and replacements go through here too.
    pub fn update<T, E: Display>(
        &self,
        collection: &str,
        update: UpdateCall<'_>,
        call: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.update(collection, update, call),
            None => call(),
        }
    }

    /// Run a document deletion.
    pub fn delete<T, E: Display>(
        &self,
        collection: &str,
        criteria: &Document,
        call: impl FnOnce() -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.delete(collection, criteria, call),
            None => call(),
        }
    }

    /// Run a cursor batch fetch, either the first query or a get-more.
    pub fn refresh<C, T, E>(
        &self,
        cursor: &mut C,
        call: impl FnOnce(&mut C) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        C: CursorInternals + ?Sized,
        E: Display,
    {
        match self.current() {
            Some(recorder) => recorder.refresh(cursor, call),
            None => call(cursor),
        }
    }

    pub async fn insert_async<'a, T, E: Display>(
        &self,
        collection: &str,
        docs: impl Into<InsertedRef<'a>>,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.insert_async(collection, docs.into(), call).await,
            None => call.await,
        }
    }

    pub async fn update_async<T, E: Display>(
        &self,
        collection: &str,
        update: UpdateCall<'_>,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.update_async(collection, update, call).await,
            None => call.await,
        }
    }

    pub async fn delete_async<T, E: Display>(
        &self,
        collection: &str,
        criteria: &Document,
        call: impl Future<Output = std::result::Result<T, E>>,
    ) -> std::result::Result<T, E> {
        match self.current() {
            Some(recorder) => recorder.delete_async(collection, criteria, call).await,
            None => call.await,
        }
    }

    /// Async form of [`refresh`](Self::refresh). The callback borrows the
    /// cursor for the duration of the fetch.
    pub async fn refresh_async<C, T, E, F>(&self, cursor: &mut C, call: F) -> std::result::Result<T, E>
    where
        C: CursorInternals + ?Sized,
        E: Display,
        F: for<'c> FnOnce(
            &'c mut C,
        ) -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'c>>,
    {
        match self.current() {
            Some(recorder) => recorder.refresh_async(cursor, call).await,
            None => call(cursor).await,
        }
    }
}

/// Anything a tracker can be installed on.
pub trait HookTarget {
    fn hook_point(&self) -> &HookPoint;
}

impl HookTarget for HookPoint {
    fn hook_point(&self) -> &HookPoint {
        self
    }
}

impl<T: HookTarget + ?Sized> HookTarget for Arc<T> {
    fn hook_point(&self) -> &HookPoint {
        (**self).hook_point()
    }
}

impl<T: HookTarget + ?Sized> HookTarget for &T {
    fn hook_point(&self) -> &HookPoint {
        (**self).hook_point()
    }
}
