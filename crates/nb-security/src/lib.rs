//! Security origins: tuple origins and unique (opaque) origins.

use nb_net::FetchUrl;
use nb_net::Scheme;
use std::cell::Cell;

thread_local! {
    static NEXT_UNIQUE_ID: Cell<u64> = const { Cell::new(0) };
}

/// A web security origin.
///
/// Tuple origins compare by `(scheme, host, port)`. Unique origins carry a
/// freshly allocated identity: two separately created unique origins are
/// never the same origin, but a clone aliases the origin it was cloned
/// from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityOrigin {
    Tuple {
        scheme: Scheme,
        host: String,
        port: u16,
    },
    Unique {
        id: u64,
    },
}

impl SecurityOrigin {
    pub fn from_url(url: &FetchUrl) -> Self {
        if !url.is_http_family() {
            return Self::unique();
        }

        Self::Tuple {
            scheme: url.scheme(),
            host: url.host().to_owned(),
            port: url.port(),
        }
    }

    /// Allocates a fresh opaque origin that is same-origin with nothing
    /// created before it.
    pub fn unique() -> Self {
        let id = NEXT_UNIQUE_ID.with(|next| {
            let id = next.get();
            next.set(id + 1);
            id
        });

        Self::Unique { id }
    }

    pub fn is_unique(&self) -> bool {
        matches!(self, Self::Unique { .. })
    }

    pub fn scheme_is_http_family(&self) -> bool {
        match self {
            Self::Tuple { scheme, .. } => scheme.is_http_family(),
            Self::Unique { .. } => false,
        }
    }

    /// Serialized form as sent in an `Origin` header.
    pub fn serialized(&self) -> String {
        match self {
            Self::Tuple { scheme, host, port } => {
                if *port == default_port(*scheme) {
                    format!("{}://{host}", scheme.as_str())
                } else {
                    format!("{}://{host}:{port}", scheme.as_str())
                }
            }
            Self::Unique { .. } => "null".to_owned(),
        }
    }

    pub fn is_same_origin(&self, other: &Self) -> bool {
        self == other
    }

    /// True if a document with this origin may address `url` same-origin.
    pub fn can_request(&self, url: &FetchUrl) -> bool {
        match self {
            Self::Tuple { scheme, host, port } => {
                url.scheme() == *scheme && url.host() == *host && url.port() == *port
            }
            Self::Unique { .. } => false,
        }
    }
}

fn default_port(scheme: Scheme) -> u16 {
    match scheme {
        Scheme::Http => 80,
        Scheme::Https => 443,
        Scheme::Data => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::SecurityOrigin;
    use nb_net::FetchUrl;

    fn url(input: &str) -> FetchUrl {
        match FetchUrl::parse(input) {
            Ok(value) => value,
            Err(error) => panic!("{error}"),
        }
    }

    #[test]
    fn tuple_origin_serializes_without_default_port() {
        let origin = SecurityOrigin::from_url(&url("https://example.com/index.html"));
        assert_eq!(origin.serialized(), "https://example.com");

        let origin = SecurityOrigin::from_url(&url("http://example.com:8080/"));
        assert_eq!(origin.serialized(), "http://example.com:8080");
    }

    #[test]
    fn same_origin_requires_scheme_host_port() {
        let a = SecurityOrigin::from_url(&url("https://a.test/x"));
        let b = SecurityOrigin::from_url(&url("https://a.test/y"));
        let c = SecurityOrigin::from_url(&url("http://a.test/x"));

        assert!(a.is_same_origin(&b));
        assert!(!a.is_same_origin(&c));
        assert!(a.can_request(&url("https://a.test/other")));
        assert!(!a.can_request(&url("https://b.test/other")));
    }

    #[test]
    fn fresh_unique_origins_never_match() {
        let first = SecurityOrigin::unique();
        let second = SecurityOrigin::unique();
        assert!(!first.is_same_origin(&second));
        assert_eq!(first.serialized(), "null");

        let alias = first.clone();
        assert!(first.is_same_origin(&alias));
    }

    #[test]
    fn data_url_origin_is_unique() {
        let origin = SecurityOrigin::from_url(&url("data:text/plain,hi"));
        assert!(origin.is_unique());
        assert!(!origin.can_request(&url("https://a.test/")));
    }
}
