use tokio::task::JoinHandle;

/// Owns a spawned task and aborts it when dropped.
pub(crate) struct TaskGuard(Option<JoinHandle<()>>);

impl TaskGuard {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        Self(Some(tokio::spawn(future)))
    }

    /// Release ownership without aborting; the task runs to completion.
    pub(crate) fn detach(mut self) {
        self.0.take();
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.0.as_ref().map_or(true, |handle| handle.is_finished())
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
