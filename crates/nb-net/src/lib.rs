//! Networking contracts: URL parsing and HTTP message primitives.

pub mod http;
pub mod url;

pub use http::Header;
pub use http::HttpMethod;
pub use http::HttpStatusCode;
pub use url::FetchUrl;
pub use url::Scheme;
