//! Cross-origin access control: preflight construction, response
//! validation, and redirect re-checks. Stateless pure functions; failures
//! carry human-readable diagnostics and never expose response contents.

use crate::request::ResourceRequest;
use crate::request::StoredCredentials;
use crate::response::ResourceResponse;
use nb_core::EngineError;
use nb_core::EngineResult;
use nb_net::FetchUrl;
use nb_net::Header;
use nb_net::HttpMethod;
use nb_security::SecurityOrigin;

/// Builds the `OPTIONS` probe sent ahead of a non-simple cross-origin
/// request. The advertised header set is lower-cased, lexicographically
/// sorted, and excludes `Referer`, which the transport layer owns.
pub fn create_preflight_request(
    request: &ResourceRequest,
    origin: &SecurityOrigin,
) -> EngineResult<ResourceRequest> {
    let mut preflight = ResourceRequest::new(request.url.clone());
    preflight.method = HttpMethod::Options;
    preflight.priority = request.priority;

    preflight.set_header(Header::new("Origin", &origin.serialized())?);
    preflight.set_header(Header::new(
        "Access-Control-Request-Method",
        request.method.as_str(),
    )?);

    let mut names: Vec<String> = request
        .headers
        .iter()
        .filter(|header| !header.name.eq_ignore_ascii_case("referer"))
        .map(|header| header.name.to_ascii_lowercase())
        .collect();
    names.sort();
    names.dedup();

    if !names.is_empty() {
        preflight.set_header(Header::new(
            "Access-Control-Request-Headers",
            &names.join(","),
        )?);
    }

    Ok(preflight)
}

/// Validates a cross-origin response against the requesting origin.
pub fn passes_access_control_check(
    response: &ResourceResponse,
    stored_credentials: StoredCredentials,
    origin: &SecurityOrigin,
) -> Result<(), String> {
    if response.status.is_none() {
        return Err("Invalid response: missing status line.".to_owned());
    }

    let include_credentials = stored_credentials == StoredCredentials::Allow;

    let Some(allow_origin) = response.header("Access-Control-Allow-Origin") else {
        return Err(format!(
            "No 'Access-Control-Allow-Origin' header is present on the requested resource. \
             Origin '{}' is therefore not allowed access.",
            origin.serialized()
        ));
    };

    if allow_origin == "*" {
        // The wildcard exempts everything except credentialed requests
        // from a real HTTP(S) origin.
        if include_credentials && origin.scheme_is_http_family() {
            return Err(format!(
                "A wildcard '*' cannot be used in the 'Access-Control-Allow-Origin' header \
                 when the credentials flag is true. Origin '{}' is therefore not allowed access.",
                origin.serialized()
            ));
        }
    } else if allow_origin.contains(',') || allow_origin.contains(' ') {
        return Err(format!(
            "The 'Access-Control-Allow-Origin' header contains multiple values '{allow_origin}', \
             but only one is allowed. Origin '{}' is therefore not allowed access.",
            origin.serialized()
        ));
    } else if allow_origin != origin.serialized() {
        return Err(format!(
            "The 'Access-Control-Allow-Origin' header has a value '{allow_origin}' that is not \
             equal to the supplied origin. Origin '{}' is therefore not allowed access.",
            origin.serialized()
        ));
    }

    if include_credentials {
        let allow_credentials = response
            .header("Access-Control-Allow-Credentials")
            .unwrap_or_default();
        if allow_credentials != "true" {
            return Err(format!(
                "The value of the 'Access-Control-Allow-Credentials' header in the response \
                 is '{allow_credentials}' which must be 'true' when the request's credentials \
                 mode is 'include'."
            ));
        }
    }

    Ok(())
}

/// Preflight responses must be plain 2xx; redirects and errors both fail.
pub fn passes_preflight_status_check(response: &ResourceResponse) -> Result<(), String> {
    match response.status {
        Some(status) if status.is_success() => Ok(()),
        Some(status) => Err(format!(
            "Response for preflight has invalid HTTP status code {}.",
            status.as_u16()
        )),
        None => Err("Response for preflight is missing a status line.".to_owned()),
    }
}

/// Validates a redirect target before it is followed: HTTP(S) scheme and
/// no embedded user-info.
pub fn check_redirect_location(location: &str) -> EngineResult<FetchUrl> {
    let url = FetchUrl::parse(location)?;

    if !url.is_http_family() {
        return Err(EngineError::new(
            "fetch.cors.redirect_scheme_disallowed",
            format!(
                "redirect location `{}` must use an HTTP(S) scheme",
                url.as_str()
            ),
        ));
    }

    Ok(url)
}

/// Applies the CORS redirect rules and returns the effective request
/// origin for the rest of the chain. A hop whose target origin matches
/// neither the requester nor the redirecting server downgrades the
/// effective origin to a fresh unique origin, so a same-origin
/// intermediate cannot launder the caller's origin.
pub fn handle_redirect(
    effective_origin: &SecurityOrigin,
    original_was_cross_origin: bool,
    redirect_response: &ResourceResponse,
    new_url: &FetchUrl,
    stored_credentials: StoredCredentials,
) -> Result<SecurityOrigin, String> {
    if !new_url.is_http_family() {
        return Err(format!(
            "Redirect location '{}' has a disallowed scheme for cross-origin requests.",
            new_url.as_str()
        ));
    }

    if original_was_cross_origin {
        passes_access_control_check(redirect_response, stored_credentials, effective_origin)?;
    }

    let new_origin = SecurityOrigin::from_url(new_url);
    let response_origin = SecurityOrigin::from_url(&redirect_response.url);

    if !new_origin.is_same_origin(effective_origin) && !new_origin.is_same_origin(&response_origin)
    {
        return Ok(SecurityOrigin::unique());
    }

    Ok(effective_origin.clone())
}
