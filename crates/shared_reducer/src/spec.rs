//! Spec sources: the inputs accepted by `dispatch`.

use std::fmt;
use std::sync::Arc;

/// A state-dependent producer of further spec sources.
///
/// Invoked once, with the running state of the reduction it appears in.
pub type Generator<T, D> = Box<dyn FnOnce(&T) -> Vec<SpecSource<T, D>> + Send>;

/// One entry in a dispatched list.
pub enum SpecSource<T, D> {
    /// A concrete edit.
    Delta(D),
    /// Evaluated immediately; its output is processed before later siblings.
    Generator(Generator<T, D>),
    /// Callbacks fired once every preceding source is acknowledged by the server.
    Sync(SyncMarker<T>),
    /// Ignored.
    Empty,
}

impl<T, D> SpecSource<T, D> {
    /// Wraps a delta.
    pub fn delta(delta: D) -> Self {
        SpecSource::Delta(delta)
    }

    /// Wraps a generator function.
    pub fn generator<F>(generate: F) -> Self
    where
        F: FnOnce(&T) -> Vec<SpecSource<T, D>> + Send + 'static,
    {
        SpecSource::Generator(Box::new(generate))
    }

    /// Creates a sync marker with both callbacks.
    pub fn sync<S, R>(on_synced: S, on_rejected: R) -> Self
    where
        S: FnOnce(Arc<T>) + Send + 'static,
        R: FnOnce(String) + Send + 'static,
    {
        SpecSource::Sync(SyncMarker::new(on_synced, on_rejected))
    }

    /// Creates a sync marker that ignores rejection.
    pub fn synced<S>(on_synced: S) -> Self
    where
        S: FnOnce(Arc<T>) + Send + 'static,
    {
        SpecSource::Sync(SyncMarker::synced_only(on_synced))
    }

    /// Creates a generator that observes the running state and yields nothing.
    ///
    /// Unlike [`SpecSource::synced`], the callback fires during the reduction,
    /// before the server has seen any of the preceding changes.
    pub fn handled<F>(callback: F) -> Self
    where
        F: FnOnce(&T) + Send + 'static,
    {
        SpecSource::generator(move |state| {
            callback(state);
            Vec::new()
        })
    }
}

impl<T, D> From<Option<SpecSource<T, D>>> for SpecSource<T, D> {
    fn from(source: Option<SpecSource<T, D>>) -> Self {
        source.unwrap_or(SpecSource::Empty)
    }
}

impl<T, D: fmt::Debug> fmt::Debug for SpecSource<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpecSource::Delta(delta) => f.debug_tuple("Delta").field(delta).finish(),
            SpecSource::Generator(_) => f.write_str("Generator(..)"),
            SpecSource::Sync(_) => f.write_str("Sync(..)"),
            SpecSource::Empty => f.write_str("Empty"),
        }
    }
}

/// A pair of callbacks resolved once the changes preceding it are durable.
///
/// Exactly one of the two callbacks fires, at most once. A marker dropped
/// unresolved (the reducer was closed) fires neither.
pub struct SyncMarker<T> {
    on_synced: Box<dyn FnOnce(Arc<T>) + Send>,
    on_rejected: Option<Box<dyn FnOnce(String) + Send>>,
}

impl<T> SyncMarker<T> {
    /// Creates a marker with both callbacks.
    pub fn new<S, R>(on_synced: S, on_rejected: R) -> Self
    where
        S: FnOnce(Arc<T>) + Send + 'static,
        R: FnOnce(String) + Send + 'static,
    {
        Self {
            on_synced: Box::new(on_synced),
            on_rejected: Some(Box::new(on_rejected)),
        }
    }

    /// Creates a marker with no rejection callback.
    pub fn synced_only<S>(on_synced: S) -> Self
    where
        S: FnOnce(Arc<T>) + Send + 'static,
    {
        Self {
            on_synced: Box::new(on_synced),
            on_rejected: None,
        }
    }

    pub(crate) fn resolve(self, state: Arc<T>) {
        (self.on_synced)(state);
    }

    pub(crate) fn reject(self, reason: String) {
        if let Some(on_rejected) = self.on_rejected {
            on_rejected(reason);
        }
    }
}

impl<T> fmt::Debug for SyncMarker<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncMarker")
            .field("rejectable", &self.on_rejected.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    type Source = SpecSource<i64, i64>;

    #[test]
    fn option_converts_to_empty() {
        let source: Source = None.into();
        assert!(matches!(source, SpecSource::Empty));

        let source: Source = Some(SpecSource::delta(3)).into();
        assert!(matches!(source, SpecSource::Delta(3)));
    }

    #[test]
    fn marker_fires_one_callback() {
        let (tx, rx) = mpsc::channel();
        let rejected = tx.clone();
        let marker = SyncMarker::new(
            move |state: Arc<i64>| tx.send(format!("synced {state}")).unwrap(),
            move |reason| rejected.send(format!("rejected {reason}")).unwrap(),
        );
        marker.reject("Cannot modify data".into());

        assert_eq!(rx.recv().unwrap(), "rejected Cannot modify data");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn synced_only_marker_ignores_rejection() {
        let marker = SyncMarker::<i64>::synced_only(|_| panic!("must not fire"));
        marker.reject("nope".into());
    }

    #[test]
    fn handled_yields_nothing() {
        let (tx, rx) = mpsc::channel();
        let source: Source = SpecSource::handled(move |state| tx.send(*state).unwrap());
        let SpecSource::Generator(generate) = source else {
            panic!("expected generator");
        };
        assert!(generate(&7).is_empty());
        assert_eq!(rx.recv().unwrap(), 7);
    }

    #[test]
    fn debug_hides_closures() {
        let source: Source = SpecSource::synced(|_| {});
        assert_eq!(format!("{source:?}"), "Sync(..)");
        assert_eq!(format!("{:?}", Source::delta(4)), "Delta(4)");
    }
}
