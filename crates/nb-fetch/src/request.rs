//! Fetch request descriptors.

use nb_net::FetchUrl;
use nb_net::Header;
use nb_net::HttpMethod;
use nb_net::http::find_header;
use nb_security::SecurityOrigin;

/// Network scheduling priority. Promotion is monotonic: an in-flight
/// load's priority may be raised by a later requester, never lowered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourcePriority {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

/// Per-request cache directive supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestCachePolicy {
    UseProtocolCachePolicy,
    ReloadIgnoringCacheData,
    ReturnCacheDataElseLoad,
    ReloadBypassingCache,
}

/// The wire-level portion of a fetch: method, target, headers, scheduling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub method: HttpMethod,
    pub url: FetchUrl,
    pub headers: Vec<Header>,
    pub priority: ResourcePriority,
    pub cache_policy: RequestCachePolicy,
    pub download_to_file: bool,
}

impl ResourceRequest {
    pub fn new(url: FetchUrl) -> Self {
        Self {
            method: HttpMethod::Get,
            url,
            headers: Vec::new(),
            priority: ResourcePriority::Low,
            cache_policy: RequestCachePolicy::UseProtocolCachePolicy,
            download_to_file: false,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Replaces any existing value of the header.
    pub fn set_header(&mut self, header: Header) {
        self.headers
            .retain(|existing| !existing.name.eq_ignore_ascii_case(&header.name));
        self.headers.push(header);
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers
            .retain(|existing| !existing.name.eq_ignore_ascii_case(name));
    }

    /// True if the request already carries conditional headers; such a
    /// request must bypass the cache rather than be answered from it.
    pub fn is_conditional(&self) -> bool {
        const CONDITIONAL_HEADERS: &[&str] = &[
            "If-Match",
            "If-Modified-Since",
            "If-None-Match",
            "If-Range",
            "If-Unmodified-Since",
        ];

        CONDITIONAL_HEADERS
            .iter()
            .any(|name| self.header(name).is_some())
    }
}

/// Credential handling requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialsMode {
    Omit,
    SameOrigin,
    Include,
}

/// Whether stored credentials (cookies, auth cache) may be sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredCredentials {
    Allow,
    DoNotAllow,
}

/// Origin constraint applied before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginRestriction {
    UseDefaultRestriction,
    RestrictToSameOrigin,
    NoRestriction,
}

/// Defer policy requested by the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferPolicy {
    NoDefer,
    LazyLoad,
    DeferredByClient,
}

/// Whether the caller blocks on the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynchronousPolicy {
    RequestAsynchronously,
    RequestSynchronously,
}

/// Load options attached to a resource for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceOptions {
    pub credentials_mode: CredentialsMode,
    pub stored_credentials: StoredCredentials,
    pub cors_enabled: bool,
    pub initiator_name: String,
    pub security_origin: Option<SecurityOrigin>,
    pub synchronous_policy: SynchronousPolicy,
}

impl Default for ResourceOptions {
    fn default() -> Self {
        Self {
            credentials_mode: CredentialsMode::SameOrigin,
            stored_credentials: StoredCredentials::Allow,
            cors_enabled: false,
            initiator_name: String::new(),
            security_origin: None,
            synchronous_policy: SynchronousPolicy::RequestAsynchronously,
        }
    }
}

impl ResourceOptions {
    /// A cached entry may only satisfy callers whose CORS posture matches
    /// the one it was fetched under.
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        self.credentials_mode == other.credentials_mode && self.cors_enabled == other.cors_enabled
    }
}

/// A single fetch intent. Immutable after handoff to the fetcher except
/// for header augmentation performed by the fetch context before the
/// cache lookup.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    resource_request: ResourceRequest,
    initiator: String,
    charset: String,
    options: ResourceOptions,
    for_preload: bool,
    defer: DeferPolicy,
    origin_restriction: OriginRestriction,
}

impl FetchRequest {
    pub fn new(resource_request: ResourceRequest, initiator: &str) -> Self {
        Self {
            resource_request,
            initiator: initiator.to_owned(),
            charset: String::new(),
            options: ResourceOptions::default(),
            for_preload: false,
            defer: DeferPolicy::NoDefer,
            origin_restriction: OriginRestriction::UseDefaultRestriction,
        }
    }

    pub fn with_options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_charset(mut self, charset: &str) -> Self {
        self.charset = charset.to_owned();
        self
    }

    pub fn with_defer(mut self, defer: DeferPolicy) -> Self {
        self.defer = defer;
        self
    }

    pub fn for_preload(mut self) -> Self {
        self.for_preload = true;
        self
    }

    pub fn with_origin_restriction(mut self, restriction: OriginRestriction) -> Self {
        self.origin_restriction = restriction;
        self
    }

    pub fn resource_request(&self) -> &ResourceRequest {
        &self.resource_request
    }

    /// Header-augmentation access for fetch-context mutators; only valid
    /// before the cache lookup.
    pub fn resource_request_mut(&mut self) -> &mut ResourceRequest {
        &mut self.resource_request
    }

    pub fn url(&self) -> &FetchUrl {
        &self.resource_request.url
    }

    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    pub fn is_for_preload(&self) -> bool {
        self.for_preload
    }

    pub fn defer(&self) -> DeferPolicy {
        self.defer
    }

    pub fn origin_restriction(&self) -> OriginRestriction {
        self.origin_restriction
    }
}

#[cfg(test)]
mod tests {
    use super::FetchRequest;
    use super::ResourceOptions;
    use super::ResourceRequest;
    use nb_net::FetchUrl;
    use nb_net::Header;

    fn request(input: &str) -> ResourceRequest {
        match FetchUrl::parse(input) {
            Ok(url) => ResourceRequest::new(url),
            Err(error) => panic!("{error}"),
        }
    }

    fn header(name: &str, value: &str) -> Header {
        match Header::new(name, value) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn conditional_headers_are_detected() {
        let mut plain = request("https://a.test/script.js");
        assert!(!plain.is_conditional());

        plain.set_header(header("If-None-Match", "\"abc\""));
        assert!(plain.is_conditional());
    }

    #[test]
    fn set_header_replaces_existing_value() {
        let mut req = request("https://a.test/");
        req.set_header(header("Accept", "text/html"));
        req.set_header(header("accept", "*/*"));

        assert_eq!(req.header("Accept"), Some("*/*"));
        assert_eq!(req.headers.len(), 1);
    }

    #[test]
    fn options_compatibility_tracks_cors_posture() {
        let base = ResourceOptions::default();
        let cors = ResourceOptions {
            cors_enabled: true,
            ..ResourceOptions::default()
        };

        assert!(base.is_compatible_with(&base.clone()));
        assert!(!base.is_compatible_with(&cors));
    }

    #[test]
    fn preload_flag_survives_construction() {
        let fetch = FetchRequest::new(request("https://a.test/font.woff2"), "css").for_preload();
        assert!(fetch.is_for_preload());
        assert_eq!(fetch.initiator(), "css");
    }
}
