//! The fetch orchestrator: cache consultation, revalidation policy,
//! cross-origin enforcement, preload and in-flight load tracking.

use crate::access_control::passes_access_control_check;
use crate::context::CachePolicy;
use crate::context::FetchContext;
use crate::loader::LoaderFactory;
use crate::loader::ResourceLoader;
use crate::memory_cache::MemoryCache;
use crate::request::DeferPolicy;
use crate::request::FetchRequest;
use crate::request::OriginRestriction;
use crate::request::RequestCachePolicy;
use crate::request::SynchronousPolicy;
use crate::resource::Resource;
use crate::resource::ResourceFactory;
use crate::resource::ResourceHandle;
use crate::resource::ResourceStatus;
use crate::resource::ResourceType;
use crate::resource::notify_clients;
use crate::response::ResourceResponse;
use log::debug;
use log::warn;
use nb_core::EngineError;
use nb_net::Header;
use nb_net::Scheme;
use nb_net::http::header_contains;
use nb_security::SecurityOrigin;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::rc::Rc;
use std::rc::Weak;
use std::time::SystemTime;

// Bounds memory growth on pages with very many distinct subresource
// URLs; the set is cleared wholesale on overflow.
const MAX_VALIDATED_URLS: usize = 10_000;

/// How an existing cache entry is treated for a new request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationPolicy {
    Use,
    Revalidate,
    Reload,
    Load,
}

/// Orchestrates fetches for one context: consults the cache, decides the
/// revalidation policy, starts loaders, and tracks preloads.
pub struct ResourceFetcher {
    cache: Rc<RefCell<MemoryCache>>,
    context: Rc<dyn FetchContext>,
    loader_factory: Box<dyn LoaderFactory>,
    cache_partition: String,
    document_resources: HashMap<String, Weak<RefCell<Resource>>>,
    validated_urls: HashSet<String>,
    preloads: Vec<ResourceHandle>,
    // Keyed by resource identity: two loads for the same URL may be in
    // flight at once (an optimistic reload racing the entry it replaced).
    active_loaders: HashMap<*const RefCell<Resource>, Box<dyn ResourceLoader>>,
    allow_stale_resources: bool,
    images_enabled: bool,
    gc_scheduled: bool,
}

impl ResourceFetcher {
    pub fn new(
        cache: Rc<RefCell<MemoryCache>>,
        context: Rc<dyn FetchContext>,
        loader_factory: Box<dyn LoaderFactory>,
        cache_partition: &str,
    ) -> Self {
        Self {
            cache,
            context,
            loader_factory,
            cache_partition: cache_partition.to_owned(),
            document_resources: HashMap::new(),
            validated_urls: HashSet::new(),
            preloads: Vec::new(),
            active_loaders: HashMap::new(),
            allow_stale_resources: false,
            images_enabled: true,
            gc_scheduled: false,
        }
    }

    /// Explicit "allow stale" scope used by error pages and the like.
    pub fn set_allow_stale_resources(&mut self, allow: bool) {
        self.allow_stale_resources = allow;
    }

    pub fn set_images_enabled(&mut self, enabled: bool) {
        self.images_enabled = enabled;
    }

    /// Per-context lookup by final URL, for later cross-origin and
    /// inspection queries.
    pub fn cached_resource(&self, url: &str) -> Option<ResourceHandle> {
        self.document_resources.get(url).and_then(Weak::upgrade)
    }

    pub fn count_preloads(&self) -> usize {
        self.preloads.len()
    }

    /// Turns a fetch intent into a shared resource, reusing the cache
    /// when the revalidation policy allows it. `None` means the request
    /// was rejected before dispatch or failed to start synchronously.
    pub fn request_resource(
        &mut self,
        mut fetch_request: FetchRequest,
        factory: &ResourceFactory,
    ) -> Option<ResourceHandle> {
        let kind = factory.kind();

        {
            let request = fetch_request.resource_request_mut();
            self.context.upgrade_insecure_request(request);
            self.context.add_client_hints_if_necessary(request);
            self.context.add_csp_header_if_necessary(request, kind);
            self.context.add_additional_request_headers(request, kind);
        }

        let url = fetch_request.url().clone();

        if kind == ResourceType::Image && !self.context.allow_image(self.images_enabled, &url) {
            debug!("image load for `{}` not allowed", url.as_str());
            return None;
        }

        if !self.context.can_request(
            kind,
            fetch_request.resource_request(),
            fetch_request.options(),
            fetch_request.is_for_preload(),
        ) {
            warn!("request for `{}` denied by fetch context", url.as_str());
            return None;
        }

        if fetch_request.origin_restriction() == OriginRestriction::RestrictToSameOrigin {
            let origin = fetch_request
                .options()
                .security_origin
                .clone()
                .or_else(|| self.context.security_origin());
            let allowed = origin.is_some_and(|origin| origin.can_request(&url));
            if !allowed {
                warn!(
                    "same-origin-restricted request for `{}` is cross-origin",
                    url.as_str()
                );
                return None;
            }
        }

        self.context.dispatch_will_request_resource(&fetch_request);

        let existing = self
            .cache
            .borrow()
            .resource_for_url(url.as_str(), &self.cache_partition);
        let policy = self.determine_revalidation_policy(kind, &fetch_request, existing.as_ref());
        debug!(
            "revalidation policy for `{}` ({}): {policy:?}",
            url.as_str(),
            kind.as_str()
        );

        let resource = match (policy, existing) {
            (RevalidationPolicy::Use, Some(existing)) => {
                self.cache.borrow_mut().update_for_access(&existing);
                existing
            }
            (RevalidationPolicy::Revalidate, Some(existing)) => {
                self.revalidate_resource(&fetch_request, factory, existing)
            }
            (RevalidationPolicy::Reload, Some(existing)) => {
                self.cache.borrow_mut().remove(&existing);
                self.create_resource_for_loading(&fetch_request, factory)
            }
            _ => self.create_resource_for_loading(&fetch_request, factory),
        };

        // A cache hit of the wrong category is cache poisoning, not
        // reuse; only the preload-speculation path tolerates it.
        if resource.borrow().kind() != kind && !fetch_request.is_for_preload() {
            warn!(
                "resource type mismatch for `{}`: cached {}, requested {}",
                url.as_str(),
                resource.borrow().kind().as_str(),
                kind.as_str()
            );
            return None;
        }

        if fetch_request.is_for_preload() {
            resource.borrow_mut().increase_preload_count();
            self.preloads.push(resource.clone());
        } else if resource.borrow().is_unused_preload() {
            resource.borrow_mut().mark_preload_referenced();
        }

        resource
            .borrow_mut()
            .promote_priority(fetch_request.resource_request().priority);

        // A `Use` hit can still be a deferred entry that never started its
        // load; status, not policy, decides whether a loader is owed.
        let needs_start = resource.borrow().status() == ResourceStatus::Pending
            && fetch_request.defer() == DeferPolicy::NoDefer
            && !self.context.defers_loading();

        if needs_start && !self.start_load(&resource) {
            // Synchronous callers get the errored resource back so the
            // failure can be inspected; asynchronous callers get nothing.
            if fetch_request.options().synchronous_policy
                == SynchronousPolicy::RequestSynchronously
            {
                return Some(resource);
            }
            return None;
        }

        self.document_resources
            .insert(url.as_str().to_owned(), Rc::downgrade(&resource));
        if self.validated_urls.len() >= MAX_VALIDATED_URLS {
            self.validated_urls.clear();
        }
        self.validated_urls.insert(url.as_str().to_owned());
        self.gc_scheduled = true;

        Some(resource)
    }

    /// The decision table. Evaluated strictly top to bottom; the first
    /// matching rule wins, and the ordering is observable behavior, so
    /// reordering is a compatibility break.
    fn determine_revalidation_policy(
        &self,
        kind: ResourceType,
        fetch_request: &FetchRequest,
        existing: Option<&ResourceHandle>,
    ) -> RevalidationPolicy {
        let Some(existing) = existing else {
            return RevalidationPolicy::Load;
        };
        let resource = existing.borrow();
        let request = fetch_request.resource_request();

        // A preload probe may piggyback on an earlier preload, as long as
        // no real request has referenced it yet.
        if fetch_request.is_for_preload()
            && resource.is_preloaded()
            && resource.is_unused_preload()
        {
            return RevalidationPolicy::Use;
        }

        if resource.kind() != kind {
            return RevalidationPolicy::Reload;
        }

        if fetch_request.defer() == DeferPolicy::DeferredByClient {
            return RevalidationPolicy::Reload;
        }

        // Data URIs are content-addressed and never stale.
        if kind == ResourceType::Image && request.url.scheme() == Scheme::Data {
            return RevalidationPolicy::Use;
        }

        if kind == ResourceType::Document && self.context.has_substitute_data() {
            return RevalidationPolicy::Use;
        }

        if !resource.can_reuse(fetch_request) {
            return RevalidationPolicy::Reload;
        }

        // The cache cannot serve a streamed delivery.
        if request.download_to_file {
            return RevalidationPolicy::Reload;
        }

        if request.is_conditional() || resource.response().is_some_and(ResourceResponse::is_not_modified)
        {
            return RevalidationPolicy::Reload;
        }

        if self.allow_stale_resources {
            return RevalidationPolicy::Use;
        }

        if request.cache_policy == RequestCachePolicy::ReloadBypassingCache {
            return RevalidationPolicy::Reload;
        }

        if !resource.options().is_compatible_with(fetch_request.options()) {
            return RevalidationPolicy::Reload;
        }

        if resource.is_preloaded() {
            return RevalidationPolicy::Use;
        }

        if self.context.cache_policy(kind) == CachePolicy::HistoryBuffer {
            return RevalidationPolicy::Use;
        }

        if resource.response().is_some_and(ResourceResponse::is_no_store) {
            return RevalidationPolicy::Reload;
        }

        // A credentials-policy change must never reuse bytes fetched
        // under the other policy.
        if resource.options().stored_credentials != fetch_request.options().stored_credentials {
            return RevalidationPolicy::Reload;
        }

        // Single in-flight de-duplication within one top-level load.
        if kind != ResourceType::Raw
            && (resource.is_loading()
                || (!self.context.is_load_complete()
                    && self.validated_urls.contains(request.url.as_str())))
        {
            return RevalidationPolicy::Use;
        }

        if self.context.cache_policy(kind) == CachePolicy::Reload {
            return RevalidationPolicy::Reload;
        }

        if resource.errored() {
            return RevalidationPolicy::Reload;
        }

        if kind == ResourceType::Image
            && self
                .document_resources
                .get(request.url.as_str())
                .and_then(Weak::upgrade)
                .is_some_and(|held| Rc::ptr_eq(&held, existing))
        {
            return RevalidationPolicy::Use;
        }

        if !resource.has_cacheable_redirect_chain() {
            return RevalidationPolicy::Reload;
        }

        let mandates_revalidation = resource.response().is_some_and(|response| {
            response.must_be_revalidated() || response.is_expired(SystemTime::now())
        }) || header_contains(&request.headers, "Cache-Control", "no-cache")
            || self.context.cache_policy(kind) == CachePolicy::Revalidate;

        if mandates_revalidation {
            let has_validator = resource
                .response()
                .is_some_and(ResourceResponse::has_cache_validator);
            if has_validator && !self.context.is_controlled_by_service_worker() {
                return RevalidationPolicy::Revalidate;
            }
            // Without a validator there is no safe conditional request.
            return RevalidationPolicy::Reload;
        }

        RevalidationPolicy::Use
    }

    fn create_resource_for_loading(
        &mut self,
        fetch_request: &FetchRequest,
        factory: &ResourceFactory,
    ) -> ResourceHandle {
        let resource = factory.create(
            fetch_request.resource_request().clone(),
            &self.cache_partition,
            fetch_request.options().clone(),
            fetch_request.charset(),
        );
        self.cache.borrow_mut().add(resource.clone());
        resource
    }

    /// Builds a conditional re-fetch wrapping the prior entry, and
    /// replaces the cache slot optimistically: a 304 adopts the old
    /// payload, anything else supersedes it.
    fn revalidate_resource(
        &mut self,
        fetch_request: &FetchRequest,
        factory: &ResourceFactory,
        existing: ResourceHandle,
    ) -> ResourceHandle {
        let mut request = fetch_request.resource_request().clone();

        {
            let inner = existing.borrow();
            if let Some(response) = inner.response() {
                if let Some(etag) = response.header("ETag") {
                    if let Ok(header) = Header::new("If-None-Match", etag) {
                        request.set_header(header);
                    }
                }
                if let Some(modified) = response.header("Last-Modified") {
                    if let Ok(header) = Header::new("If-Modified-Since", modified) {
                        request.set_header(header);
                    }
                }
            }
        }

        let resource = factory.create(
            request,
            &self.cache_partition,
            fetch_request.options().clone(),
            fetch_request.charset(),
        );
        resource
            .borrow_mut()
            .set_resource_to_revalidate(existing.clone());

        let mut cache = self.cache.borrow_mut();
        cache.remove(&existing);
        cache.add(resource.clone());
        resource
    }

    fn start_load(&mut self, resource: &ResourceHandle) -> bool {
        let request = resource.borrow().request().clone();
        let mut loader = self.loader_factory.create_loader();
        resource.borrow_mut().start_loading();

        match loader.start(&request) {
            Ok(()) => {
                self.active_loaders.insert(Rc::as_ptr(resource), loader);
                true
            }
            Err(error) => {
                warn!(
                    "loader dispatch for `{}` failed synchronously: {error}",
                    request.url.as_str()
                );
                self.cache.borrow_mut().remove(resource);
                resource.borrow_mut().fail(error.clone());
                self.context.dispatch_did_fail(&request.url, &error);
                false
            }
        }
    }

    /// Transport callback: headers arrived. Runs the cross-origin check
    /// for CORS-enabled loads and resolves optimistic revalidations.
    pub fn did_receive_response(&mut self, resource: &ResourceHandle, response: ResourceResponse) {
        if resource.borrow().is_finished() {
            return;
        }
        let url = resource.borrow().url().clone();

        if let Some(origin) = self.cors_origin_for(resource) {
            if !origin.can_request(&url) {
                let stored = resource.borrow().options().stored_credentials;
                if let Err(description) =
                    passes_access_control_check(&response, stored, &origin)
                {
                    warn!(
                        "cross-origin response for `{}` denied: {description}",
                        url.as_str()
                    );
                    resource.borrow_mut().set_cors_failed();
                    self.did_fail(resource, EngineError::new("fetch.cors.denied", description));
                    return;
                }
            }
        }

        let revalidating = resource.borrow().resource_to_revalidate().is_some();
        if revalidating {
            if response.is_not_modified() {
                resource.borrow_mut().revalidation_succeeded(&response);
                self.context.dispatch_did_receive_response(&url, &response);
                return;
            }
            resource.borrow_mut().revalidation_failed();
        }

        if response.is_no_store() {
            self.cache.borrow_mut().remove(resource);
        }

        resource.borrow_mut().set_response(response.clone());
        self.context.dispatch_did_receive_response(&url, &response);
    }

    /// Transport callback: a body chunk arrived.
    pub fn did_receive_data(&mut self, resource: &ResourceHandle, data: &[u8]) {
        resource.borrow_mut().append_data(data);
    }

    /// Transport callback: the load completed.
    pub fn did_finish_loading(&mut self, resource: &ResourceHandle) {
        if resource.borrow().is_finished() {
            return;
        }
        let url = resource.borrow().url().clone();

        self.active_loaders.remove(&Rc::as_ptr(resource));
        resource.borrow_mut().finish();
        self.context.dispatch_did_finish_loading(&url);
        notify_clients(resource);
        self.gc_scheduled = true;
    }

    /// Transport callback: the load failed. The entry is evicted so a
    /// later request does not reuse a known-bad resource.
    pub fn did_fail(&mut self, resource: &ResourceHandle, error: EngineError) {
        if resource.borrow().is_finished() {
            return;
        }
        let url = resource.borrow().url().clone();

        self.active_loaders.remove(&Rc::as_ptr(resource));
        self.cache.borrow_mut().remove(resource);
        resource.borrow_mut().fail(error.clone());
        warn!("load failed for `{}`: {error}", url.as_str());
        self.context.dispatch_did_fail(&url, &error);
        notify_clients(resource);
        self.gc_scheduled = true;
    }

    /// Cooperative cancellation: the loader is asked to stop and the
    /// resource stops honoring data callbacks.
    pub fn cancel(&mut self, resource: &ResourceHandle) {
        if let Some(mut loader) = self.active_loaders.remove(&Rc::as_ptr(resource)) {
            loader.cancel();
        }
        resource.borrow_mut().cancel();
    }

    /// Drops the fetcher's preload references; preloads never referenced
    /// by a real request are reported.
    pub fn clear_preloads(&mut self) {
        for resource in self.preloads.drain(..) {
            let mut inner = resource.borrow_mut();
            inner.decrease_preload_count();
            if inner.is_unused_preload() {
                warn!("preload `{}` was never used", inner.url().as_str());
            }
        }
        self.gc_scheduled = true;
    }

    /// Runs deferred bookkeeping: entries in the per-context table whose
    /// reference count has dropped to the cache's own hold are released,
    /// then the cache sweeps entries nothing else references. Deferred
    /// rather than inline so neither structure is mutated during a
    /// notification pass.
    pub fn run_pending_tasks(&mut self) {
        if !self.gc_scheduled {
            return;
        }
        self.gc_scheduled = false;

        let cache = self.cache.borrow();
        self.document_resources.retain(|_, weak| match weak.upgrade() {
            // The upgrade itself holds one strong reference here.
            Some(resource) => !(Rc::strong_count(&resource) == 2 && cache.contains(&resource)),
            None => false,
        });
        drop(cache);

        self.cache.borrow_mut().sweep_dead_resources();
    }

    fn cors_origin_for(&self, resource: &ResourceHandle) -> Option<SecurityOrigin> {
        let inner = resource.borrow();
        if !inner.options().cors_enabled {
            return None;
        }

        inner
            .options()
            .security_origin
            .clone()
            .or_else(|| self.context.security_origin())
    }
}
