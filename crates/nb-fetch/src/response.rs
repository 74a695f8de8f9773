//! Response metadata and cache-freshness interpretation.

use nb_net::FetchUrl;
use nb_net::Header;
use nb_net::HttpStatusCode;
use nb_net::http::find_header;
use std::time::Duration;
use std::time::SystemTime;

/// Response metadata attached to a resource.
///
/// The status is optional: a response whose status line never arrived
/// (aborted transport, synthesized response) carries `None`, and the
/// access-control check treats that as failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResponse {
    pub url: FetchUrl,
    pub status: Option<HttpStatusCode>,
    pub headers: Vec<Header>,
    pub response_time: SystemTime,
}

impl ResourceResponse {
    pub fn new(url: FetchUrl) -> Self {
        Self {
            url,
            status: None,
            headers: Vec::new(),
            response_time: SystemTime::now(),
        }
    }

    pub fn with_status(mut self, status: HttpStatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, header: Header) -> Self {
        self.headers.push(header);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status.is_some_and(|status| status.as_u16() == 304)
    }

    pub fn cache_control_contains(&self, directive: &str) -> bool {
        self.header("Cache-Control").is_some_and(|value| {
            value
                .split(',')
                .any(|token| directive_name(token).eq_ignore_ascii_case(directive))
        })
    }

    pub fn is_no_store(&self) -> bool {
        self.cache_control_contains("no-store")
    }

    pub fn must_be_revalidated(&self) -> bool {
        self.cache_control_contains("must-revalidate")
    }

    /// `max-age` in seconds, if present and well-formed.
    pub fn max_age(&self) -> Option<u64> {
        let value = self.header("Cache-Control")?;

        for token in value.split(',') {
            let token = token.trim();
            if let Some(seconds) = token.strip_prefix("max-age=") {
                return seconds.trim().parse::<u64>().ok();
            }
        }

        None
    }

    /// Freshness lifetime; a response without an explicit `max-age`
    /// expires immediately and must be revalidated before reuse.
    pub fn freshness_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_age().unwrap_or(0))
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        let age = now
            .duration_since(self.response_time)
            .unwrap_or(Duration::ZERO);
        age > self.freshness_lifetime()
    }

    /// True if the response carries a validator usable for a conditional
    /// revalidation request.
    pub fn has_cache_validator(&self) -> bool {
        self.header("ETag").is_some() || self.header("Last-Modified").is_some()
    }

    /// Folds the headers of a 304 revalidation response into this one.
    /// The stored body and status are kept; refreshed metadata wins.
    pub fn update_from_not_modified(&mut self, revalidation: &ResourceResponse) {
        for header in &revalidation.headers {
            self.headers
                .retain(|existing| !existing.name.eq_ignore_ascii_case(&header.name));
            self.headers.push(header.clone());
        }
        self.response_time = revalidation.response_time;
    }
}

fn directive_name(token: &str) -> &str {
    token.trim().split('=').next().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::ResourceResponse;
    use nb_net::FetchUrl;
    use nb_net::Header;
    use nb_net::HttpStatusCode;
    use std::time::Duration;
    use std::time::SystemTime;

    fn response(input: &str) -> ResourceResponse {
        match FetchUrl::parse(input) {
            Ok(url) => ResourceResponse::new(url),
            Err(error) => panic!("{error}"),
        }
    }

    fn header(name: &str, value: &str) -> Header {
        match Header::new(name, value) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    fn status(code: u16) -> HttpStatusCode {
        match HttpStatusCode::new(code) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn cache_control_directives_are_parsed() {
        let response = response("https://a.test/style.css")
            .with_header(header("Cache-Control", "no-store, max-age=60"));

        assert!(response.is_no_store());
        assert!(!response.must_be_revalidated());
        assert_eq!(response.max_age(), Some(60));
    }

    #[test]
    fn responses_without_max_age_expire_immediately() {
        let fresh = response("https://a.test/a.js");
        let now = SystemTime::now() + Duration::from_secs(1);
        assert!(fresh.is_expired(now));

        let cached = response("https://a.test/b.js").with_header(header("Cache-Control", "max-age=300"));
        assert!(!cached.is_expired(now));
    }

    #[test]
    fn validators_are_detected() {
        let none = response("https://a.test/x");
        assert!(!none.has_cache_validator());

        let etag = response("https://a.test/x").with_header(header("ETag", "\"v1\""));
        assert!(etag.has_cache_validator());

        let modified = response("https://a.test/x")
            .with_header(header("Last-Modified", "Tue, 01 Jan 2030 00:00:00 GMT"));
        assert!(modified.has_cache_validator());
    }

    #[test]
    fn not_modified_refreshes_headers_in_place() {
        let mut cached = response("https://a.test/x")
            .with_status(status(200))
            .with_header(header("Cache-Control", "max-age=0"))
            .with_header(header("Content-Type", "text/css"));

        let revalidation = response("https://a.test/x")
            .with_status(status(304))
            .with_header(header("Cache-Control", "max-age=600"));

        assert!(revalidation.is_not_modified());
        cached.update_from_not_modified(&revalidation);

        assert_eq!(cached.status, Some(status(200)));
        assert_eq!(cached.max_age(), Some(600));
        assert_eq!(cached.header("Content-Type"), Some("text/css"));
    }
}
