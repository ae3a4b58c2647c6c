/// Post-commit notification sink
///
/// Called exactly once after a commit has been acknowledged by the database.
/// Never called for a failed commit. Whether an empty commit notifies is
/// decided by the factory's `notify_on_empty_commit` setting.
pub trait CommitObserver: Send + Sync {
    fn on_saved(&self);
}

impl<F> CommitObserver for F
where
    F: Fn() + Send + Sync,
{
    fn on_saved(&self) {
        self()
    }
}

/// Observer that does nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl CommitObserver for NoopObserver {
    fn on_saved(&self) {}
}
