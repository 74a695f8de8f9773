//! Cacheable resources, their load state machine, and their clients.

use crate::request::FetchRequest;
use crate::request::ResourceOptions;
use crate::request::ResourcePriority;
use crate::request::ResourceRequest;
use crate::response::ResourceResponse;
use nb_core::EngineError;
use nb_net::FetchUrl;
use std::cell::RefCell;
use std::rc::Rc;
use std::rc::Weak;

/// Enumerated resource category. The cache is polymorphic over this
/// closed set; a factory keyed on it replaces virtual dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Document,
    Stylesheet,
    Script,
    Image,
    Font,
    Raw,
    Media,
    TextTrack,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Stylesheet => "stylesheet",
            Self::Script => "script",
            Self::Image => "image",
            Self::Font => "font",
            Self::Raw => "raw",
            Self::Media => "media",
            Self::TextTrack => "text-track",
        }
    }
}

/// Load state machine. `Pending → Loading → {Cached, LoadError}`, with
/// `Canceled` terminal reachable while a load is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceStatus {
    Pending,
    Loading,
    Cached,
    LoadError,
    Canceled,
}

/// Shared handle to a resource. The memory cache holds a strong reference
/// while the resource is cacheable; clients observe through weak handles.
pub type ResourceHandle = Rc<RefCell<Resource>>;

/// Observer interface for parties interested in a resource's outcome.
pub trait ResourceClient {
    fn notify_finished(&self, resource: &ResourceHandle);
}

/// A cacheable artifact plus its load state and interested clients.
#[derive(Debug)]
pub struct Resource {
    request: ResourceRequest,
    kind: ResourceType,
    cache_partition: String,
    charset: String,
    options: ResourceOptions,
    status: ResourceStatus,
    response: Option<ResourceResponse>,
    body: Vec<u8>,
    error: Option<EngineError>,
    clients: Vec<Weak<dyn ResourceClient>>,
    preload_count: usize,
    unused_preload: bool,
    cors_failed: bool,
    redirect_chain_cacheable: bool,
    resource_to_revalidate: Option<ResourceHandle>,
}

impl Resource {
    pub fn new(
        request: ResourceRequest,
        kind: ResourceType,
        cache_partition: &str,
        options: ResourceOptions,
        charset: &str,
    ) -> Self {
        Self {
            request,
            kind,
            cache_partition: cache_partition.to_owned(),
            charset: charset.to_owned(),
            options,
            status: ResourceStatus::Pending,
            response: None,
            body: Vec::new(),
            error: None,
            clients: Vec::new(),
            preload_count: 0,
            unused_preload: false,
            cors_failed: false,
            redirect_chain_cacheable: true,
            resource_to_revalidate: None,
        }
    }

    pub fn url(&self) -> &FetchUrl {
        &self.request.url
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn cache_partition(&self) -> &str {
        &self.cache_partition
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn status(&self) -> ResourceStatus {
        self.status
    }

    pub fn options(&self) -> &ResourceOptions {
        &self.options
    }

    pub fn request(&self) -> &ResourceRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut ResourceRequest {
        &mut self.request
    }

    pub fn response(&self) -> Option<&ResourceResponse> {
        self.response.as_ref()
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn error(&self) -> Option<&EngineError> {
        self.error.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.status == ResourceStatus::Loading
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            ResourceStatus::Cached | ResourceStatus::LoadError | ResourceStatus::Canceled
        )
    }

    pub fn errored(&self) -> bool {
        self.status == ResourceStatus::LoadError
    }

    /// A cached entry can satisfy a new request only if the wire-level
    /// shape matches: same method, same byte-range window.
    pub fn can_reuse(&self, fetch_request: &FetchRequest) -> bool {
        let incoming = fetch_request.resource_request();
        self.request.method == incoming.method
            && self.request.header("Range") == incoming.header("Range")
    }

    /// Entries with `no-store` and canceled loads never enter the cache.
    pub fn is_cacheable(&self) -> bool {
        if self.status == ResourceStatus::Canceled {
            return false;
        }

        !self
            .response
            .as_ref()
            .is_some_and(ResourceResponse::is_no_store)
    }

    pub fn start_loading(&mut self) {
        if self.status == ResourceStatus::Pending {
            self.status = ResourceStatus::Loading;
        }
    }

    pub fn set_response(&mut self, response: ResourceResponse) {
        if self.status == ResourceStatus::Canceled {
            return;
        }
        self.response = Some(response);
    }

    pub fn append_data(&mut self, data: &[u8]) {
        if matches!(
            self.status,
            ResourceStatus::Pending | ResourceStatus::Loading
        ) {
            self.body.extend_from_slice(data);
        }
    }

    pub fn finish(&mut self) {
        if matches!(
            self.status,
            ResourceStatus::Pending | ResourceStatus::Loading
        ) {
            self.status = ResourceStatus::Cached;
        }
    }

    pub fn fail(&mut self, error: EngineError) {
        if matches!(
            self.status,
            ResourceStatus::Pending | ResourceStatus::Loading
        ) {
            self.status = ResourceStatus::LoadError;
            self.error = Some(error);
        }
    }

    pub fn cancel(&mut self) {
        if matches!(
            self.status,
            ResourceStatus::Pending | ResourceStatus::Loading
        ) {
            self.status = ResourceStatus::Canceled;
        }
    }

    pub fn is_preloaded(&self) -> bool {
        self.preload_count > 0
    }

    pub fn is_unused_preload(&self) -> bool {
        self.unused_preload
    }

    pub fn increase_preload_count(&mut self) {
        self.preload_count += 1;
        self.unused_preload = true;
    }

    pub fn decrease_preload_count(&mut self) {
        self.preload_count = self.preload_count.saturating_sub(1);
    }

    pub fn mark_preload_referenced(&mut self) {
        self.unused_preload = false;
    }

    pub fn cors_failed(&self) -> bool {
        self.cors_failed
    }

    pub fn set_cors_failed(&mut self) {
        self.cors_failed = true;
    }

    pub fn has_cacheable_redirect_chain(&self) -> bool {
        self.redirect_chain_cacheable
    }

    pub fn mark_redirect_chain_uncacheable(&mut self) {
        self.redirect_chain_cacheable = false;
    }

    pub fn loading_priority(&self) -> ResourcePriority {
        self.request.priority
    }

    /// Raises the effective priority; lowering is refused so an already
    /// scheduled fetch is never starved by a later, lazier requester.
    pub fn promote_priority(&mut self, priority: ResourcePriority) -> bool {
        if priority > self.request.priority {
            self.request.priority = priority;
            return true;
        }

        false
    }

    pub fn resource_to_revalidate(&self) -> Option<&ResourceHandle> {
        self.resource_to_revalidate.as_ref()
    }

    pub fn set_resource_to_revalidate(&mut self, resource: ResourceHandle) {
        self.resource_to_revalidate = Some(resource);
    }

    /// Adopts the prior entry's payload after a 304, folding the fresh
    /// headers into the retained response.
    pub fn revalidation_succeeded(&mut self, revalidation_response: &ResourceResponse) {
        let Some(previous) = self.resource_to_revalidate.take() else {
            return;
        };

        let previous = previous.borrow();
        let mut adopted = previous.response.clone();
        if let Some(response) = adopted.as_mut() {
            response.update_from_not_modified(revalidation_response);
        }
        self.response = adopted;
        self.body = previous.body.clone();
    }

    /// The server sent a full response; the prior entry is dropped.
    pub fn revalidation_failed(&mut self) {
        self.resource_to_revalidate = None;
    }

    pub fn has_clients(&self) -> bool {
        self.clients.iter().any(|weak| weak.strong_count() > 0)
    }
}

/// Type-specific creation seam: one factory per resource category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceFactory {
    kind: ResourceType,
}

impl ResourceFactory {
    pub fn new(kind: ResourceType) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn create(
        &self,
        request: ResourceRequest,
        cache_partition: &str,
        options: ResourceOptions,
        charset: &str,
    ) -> ResourceHandle {
        Rc::new(RefCell::new(Resource::new(
            request,
            self.kind,
            cache_partition,
            options,
            charset,
        )))
    }
}

/// Registers a client and replays a terminal state to late joiners. The
/// client is added to the list before the replay so a reentrant detach
/// from inside the callback stays consistent.
pub fn attach_client(resource: &ResourceHandle, client: &Rc<dyn ResourceClient>) {
    let finished = {
        let mut inner = resource.borrow_mut();
        inner.clients.push(Rc::downgrade(client));
        inner.is_finished()
    };

    if finished {
        client.notify_finished(resource);
    }
}

pub fn detach_client(resource: &ResourceHandle, client: &Rc<dyn ResourceClient>) {
    let target = Rc::downgrade(client);
    resource
        .borrow_mut()
        .clients
        .retain(|weak| !Weak::ptr_eq(weak, &target));
}

/// Notifies every attached client that the resource reached a terminal
/// state. The client list is snapshotted first: a callback may run script
/// that attaches, detaches, or re-requests mid-iteration.
pub fn notify_clients(resource: &ResourceHandle) {
    let snapshot: Vec<Rc<dyn ResourceClient>> = {
        let mut inner = resource.borrow_mut();
        inner.clients.retain(|weak| weak.strong_count() > 0);
        inner.clients.iter().filter_map(Weak::upgrade).collect()
    };

    for client in snapshot {
        client.notify_finished(resource);
    }
}

#[cfg(test)]
mod tests {
    use super::Resource;
    use super::ResourceClient;
    use super::ResourceFactory;
    use super::ResourceHandle;
    use super::ResourceStatus;
    use super::ResourceType;
    use super::attach_client;
    use super::detach_client;
    use super::notify_clients;
    use crate::request::FetchRequest;
    use crate::request::ResourceOptions;
    use crate::request::ResourcePriority;
    use crate::request::ResourceRequest;
    use crate::response::ResourceResponse;
    use nb_core::EngineError;
    use nb_net::FetchUrl;
    use nb_net::Header;
    use nb_net::HttpMethod;
    use std::cell::Cell;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn resource_request(input: &str) -> ResourceRequest {
        match FetchUrl::parse(input) {
            Ok(url) => ResourceRequest::new(url),
            Err(error) => panic!("{error}"),
        }
    }

    fn handle(input: &str, kind: ResourceType) -> ResourceHandle {
        ResourceFactory::new(kind).create(
            resource_request(input),
            "partition",
            ResourceOptions::default(),
            "",
        )
    }

    struct RecordingClient {
        finished: Cell<usize>,
    }

    impl ResourceClient for RecordingClient {
        fn notify_finished(&self, _resource: &ResourceHandle) {
            self.finished.set(self.finished.get() + 1);
        }
    }

    #[test]
    fn state_machine_walks_pending_loading_cached() {
        let resource = handle("https://a.test/app.js", ResourceType::Script);

        assert_eq!(resource.borrow().status(), ResourceStatus::Pending);
        resource.borrow_mut().start_loading();
        assert!(resource.borrow().is_loading());
        resource.borrow_mut().finish();
        assert_eq!(resource.borrow().status(), ResourceStatus::Cached);

        // Terminal states stay terminal.
        resource.borrow_mut().fail(EngineError::new("x", "late"));
        assert_eq!(resource.borrow().status(), ResourceStatus::Cached);
    }

    #[test]
    fn canceled_resource_ignores_further_data() {
        let resource = handle("https://a.test/big.bin", ResourceType::Raw);
        resource.borrow_mut().start_loading();
        resource.borrow_mut().cancel();

        resource.borrow_mut().append_data(b"late bytes");
        assert!(resource.borrow().body().is_empty());
        assert_eq!(resource.borrow().status(), ResourceStatus::Canceled);
        assert!(!resource.borrow().is_cacheable());
    }

    #[test]
    fn attaching_to_finished_resource_replays_notification() {
        let resource = handle("https://a.test/done.css", ResourceType::Stylesheet);
        resource.borrow_mut().start_loading();
        resource.borrow_mut().finish();

        let client = Rc::new(RecordingClient {
            finished: Cell::new(0),
        });
        let client_dyn: Rc<dyn ResourceClient> = client.clone();
        attach_client(&resource, &client_dyn);

        assert_eq!(client.finished.get(), 1);
    }

    struct DetachingClient {
        resource: RefCell<Option<ResourceHandle>>,
        victim: RefCell<Option<Rc<dyn ResourceClient>>>,
        finished: Cell<usize>,
    }

    impl ResourceClient for DetachingClient {
        fn notify_finished(&self, _resource: &ResourceHandle) {
            self.finished.set(self.finished.get() + 1);
            let resource = self.resource.borrow().clone();
            let victim = self.victim.borrow_mut().take();
            if let (Some(resource), Some(victim)) = (resource, victim) {
                detach_client(&resource, &victim);
            }
        }
    }

    #[test]
    fn notification_snapshot_survives_reentrant_detach() {
        let resource = handle("https://a.test/event.js", ResourceType::Script);
        resource.borrow_mut().start_loading();

        let bystander = Rc::new(RecordingClient {
            finished: Cell::new(0),
        });
        let bystander_dyn: Rc<dyn ResourceClient> = bystander.clone();

        let saboteur = Rc::new(DetachingClient {
            resource: RefCell::new(Some(resource.clone())),
            victim: RefCell::new(Some(bystander_dyn.clone())),
            finished: Cell::new(0),
        });
        let saboteur_dyn: Rc<dyn ResourceClient> = saboteur.clone();

        attach_client(&resource, &saboteur_dyn);
        attach_client(&resource, &bystander_dyn);

        resource.borrow_mut().finish();
        notify_clients(&resource);

        // The snapshot was taken before the saboteur ran, so the
        // bystander still hears about this pass.
        assert_eq!(saboteur.finished.get(), 1);
        assert_eq!(bystander.finished.get(), 1);

        // The detach took effect for future passes.
        notify_clients(&resource);
        assert_eq!(bystander.finished.get(), 1);
        assert_eq!(saboteur.finished.get(), 2);
    }

    #[test]
    fn reuse_requires_matching_method_and_range() {
        let resource = handle("https://a.test/video.mp4", ResourceType::Media);

        let same = FetchRequest::new(resource_request("https://a.test/video.mp4"), "media");
        assert!(resource.borrow().can_reuse(&same));

        let mut head = resource_request("https://a.test/video.mp4");
        head.method = HttpMethod::Head;
        assert!(!resource.borrow().can_reuse(&FetchRequest::new(head, "media")));

        let mut ranged = resource_request("https://a.test/video.mp4");
        let range = match Header::new("Range", "bytes=0-1023") {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        };
        ranged.set_header(range);
        assert!(!resource.borrow().can_reuse(&FetchRequest::new(ranged, "media")));
    }

    #[test]
    fn priority_promotion_is_monotonic() {
        let resource = handle("https://a.test/hero.png", ResourceType::Image);

        assert!(resource.borrow_mut().promote_priority(ResourcePriority::High));
        assert!(!resource.borrow_mut().promote_priority(ResourcePriority::Low));
        assert_eq!(
            resource.borrow().loading_priority(),
            ResourcePriority::High
        );
    }

    #[test]
    fn revalidation_304_adopts_previous_payload() {
        let old = handle("https://a.test/lib.js", ResourceType::Script);
        {
            let mut inner = old.borrow_mut();
            inner.start_loading();
            let response = ResourceResponse::new(inner.url().clone());
            inner.set_response(response);
            inner.append_data(b"cached body");
            inner.finish();
        }

        let fresh = handle("https://a.test/lib.js", ResourceType::Script);
        fresh.borrow_mut().set_resource_to_revalidate(old.clone());

        let not_modified = ResourceResponse::new(old.borrow().url().clone());
        fresh.borrow_mut().revalidation_succeeded(&not_modified);

        assert_eq!(fresh.borrow().body(), b"cached body");
        assert!(fresh.borrow().resource_to_revalidate().is_none());
    }
}
