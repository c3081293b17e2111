use crate::{Block, BlockAllocator, CounterStore, Result, StoreError};

/// Extension trait for reserving blocks from async code running on the
/// [`tokio`](https://docs.rs/tokio) runtime.
///
/// Store drivers are synchronous, so the allocation is moved onto tokio's
/// blocking thread pool instead of stalling a worker thread.
pub trait BlockAllocatorAsyncTokioExt {
    /// Returns a future that resolves to the block reserved by
    /// [`BlockAllocator::allocate`].
    ///
    /// # Errors
    ///
    /// Everything [`BlockAllocator::allocate`] may return. If the blocking
    /// task panics or is cancelled, the error is
    /// [`StoreError::Interrupted`] wrapped in
    /// [`Error::StoreUnavailable`](crate::Error::StoreUnavailable); the
    /// counter may or may not have advanced in that case.
    fn allocate_async(
        &self,
        name: impl Into<String>,
        size: u64,
    ) -> impl Future<Output = Result<Block>> + Send;
}

impl<S> BlockAllocatorAsyncTokioExt for BlockAllocator<S>
where
    S: CounterStore + Send + Sync + 'static,
{
    fn allocate_async(
        &self,
        name: impl Into<String>,
        size: u64,
    ) -> impl Future<Output = Result<Block>> + Send {
        let allocator = self.clone();
        let name = name.into();
        async move {
            tokio::task::spawn_blocking(move || allocator.allocate(&name, size))
                .await
                .map_err(|e| StoreError::Interrupted {
                    reason: e.to_string(),
                })?
        }
    }
}
