//! Transport collaborator boundary. The fetcher hands requests to a
//! loader and later receives `did_*` callbacks on its own sequence; the
//! socket machinery behind `start` lives entirely outside this crate.

use crate::request::ResourceRequest;
use nb_core::EngineResult;

/// One network transaction. A `Loading` resource has at most one of
/// these; terminal resources have none.
pub trait ResourceLoader {
    /// Begins the transaction. A synchronous `Err` means dispatch itself
    /// failed; asynchronous failures arrive later via `did_fail`.
    fn start(&mut self, request: &ResourceRequest) -> EngineResult<()>;

    /// Cooperative cancellation; data callbacks after this are dropped.
    fn cancel(&mut self);
}

/// Produces a loader per load. Injection seam for the transport layer
/// and for tests.
pub trait LoaderFactory {
    fn create_loader(&self) -> Box<dyn ResourceLoader>;
}
