//! Embedder capability interface consulted by the fetcher.

use crate::request::FetchRequest;
use crate::request::ResourceOptions;
use crate::request::ResourceRequest;
use crate::resource::ResourceType;
use crate::response::ResourceResponse;
use nb_core::EngineError;
use nb_net::FetchUrl;
use nb_security::SecurityOrigin;

/// Frame-level cache directive for an entire navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    Verify,
    Revalidate,
    Reload,
    HistoryBuffer,
}

/// Capability set through which the fetcher asks embedder-specific
/// questions. Defaults are permissive no-ops; embedders override the
/// capabilities they actually have.
pub trait FetchContext {
    /// Security gate: CSP, mixed content, and origin checks live behind
    /// this single question.
    fn can_request(
        &self,
        _kind: ResourceType,
        _request: &ResourceRequest,
        _options: &ResourceOptions,
        _for_preload: bool,
    ) -> bool {
        true
    }

    fn cache_policy(&self, _kind: ResourceType) -> CachePolicy {
        CachePolicy::Verify
    }

    fn is_controlled_by_service_worker(&self) -> bool {
        false
    }

    fn service_worker_id(&self) -> i64 {
        -1
    }

    fn add_additional_request_headers(&self, _request: &mut ResourceRequest, _kind: ResourceType) {}

    fn upgrade_insecure_request(&self, _request: &mut ResourceRequest) {}

    fn add_client_hints_if_necessary(&self, _request: &mut ResourceRequest) {}

    fn add_csp_header_if_necessary(&self, _request: &mut ResourceRequest, _kind: ResourceType) {}

    fn dispatch_will_request_resource(&self, _request: &FetchRequest) {}

    fn dispatch_did_receive_response(&self, _url: &FetchUrl, _response: &ResourceResponse) {}

    fn dispatch_did_finish_loading(&self, _url: &FetchUrl) {}

    fn dispatch_did_fail(&self, _url: &FetchUrl, _error: &EngineError) {}

    fn security_origin(&self) -> Option<SecurityOrigin> {
        None
    }

    fn allow_image(&self, images_enabled: bool, _url: &FetchUrl) -> bool {
        images_enabled
    }

    fn is_main_frame(&self) -> bool {
        true
    }

    fn has_substitute_data(&self) -> bool {
        false
    }

    fn defers_loading(&self) -> bool {
        false
    }

    fn is_load_complete(&self) -> bool {
        false
    }
}

/// The named "do everything by default" context, for embedders and tests
/// that need no policy of their own.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullFetchContext;

impl FetchContext for NullFetchContext {}
