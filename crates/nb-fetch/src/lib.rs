//! Resource fetching and caching: the layer between document loading and
//! the network transport. Callers describe a fetch intent; the fetcher
//! answers it from the memory cache, revalidates, or starts a fresh load,
//! enforcing cross-origin access control along the way.

pub mod access_control;
pub mod context;
pub mod fetcher;
pub mod loader;
pub mod memory_cache;
pub mod request;
pub mod resource;
pub mod response;

pub use context::CachePolicy;
pub use context::FetchContext;
pub use context::NullFetchContext;
pub use fetcher::ResourceFetcher;
pub use fetcher::RevalidationPolicy;
pub use loader::LoaderFactory;
pub use loader::ResourceLoader;
pub use memory_cache::MemoryCache;
pub use request::FetchRequest;
pub use request::ResourceOptions;
pub use request::ResourceRequest;
pub use resource::Resource;
pub use resource::ResourceClient;
pub use resource::ResourceFactory;
pub use resource::ResourceHandle;
pub use resource::ResourceStatus;
pub use resource::ResourceType;
pub use response::ResourceResponse;
