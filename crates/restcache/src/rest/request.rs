use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use sha2::{Digest, Sha256};
use url::Url;

use crate::caching::CacheKey;
use crate::config::Config;
use crate::error::ConfigError;

use super::url::{QueryParams, RequestUrl, find_invalid_char};

/// The HTTP methods supported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
    Connect,
    Options,
    Put,
    Post,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Connect => "CONNECT",
            Method::Options => "OPTIONS",
            Method::Put => "PUT",
            Method::Post => "POST",
            Method::Delete => "DELETE",
        }
    }

    /// Whether responses to this method are served from the cache.
    pub fn is_cacheable(self) -> bool {
        matches!(
            self,
            Method::Get | Method::Head | Method::Connect | Method::Options
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "HEAD" => Method::Head,
            "CONNECT" => Method::Connect,
            "OPTIONS" => Method::Options,
            "PUT" => Method::Put,
            "POST" => Method::Post,
            "DELETE" => Method::Delete,
            _ => return Err(ConfigError::UnknownMethod(s.to_owned())),
        })
    }
}

/// Credentials sent with a request.
#[derive(Clone, PartialEq, Eq)]
pub enum Authorization {
    /// HTTP basic authentication, optionally qualified with a domain.
    Basic {
        user: String,
        password: String,
        domain: Option<String>,
    },
    /// A bearer token.
    Token(String),
    /// A raw `Authorization` header value.
    Custom(String),
}

impl Authorization {
    /// The identity this authorization stands for, as it enters the cache key.
    ///
    /// Passwords never contribute. Tokens and custom values do, but only hashed.
    pub fn principal(&self) -> String {
        match self {
            Authorization::Basic {
                user,
                domain: Some(domain),
                ..
            } => format!("{domain}\\{user}"),
            Authorization::Basic { user, .. } => user.clone(),
            Authorization::Token(token) => format!("token:{}", hex_sha256(token)),
            Authorization::Custom(value) => format!("custom:{}", hex_sha256(value)),
        }
    }
}

impl fmt::Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authorization::Basic { user, domain, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("domain", domain)
                .finish_non_exhaustive(),
            Authorization::Token(_) => f.write_str("Token(..)"),
            Authorization::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

fn hex_sha256(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// The body of a write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Contents of a file.
    File(PathBuf),
    /// An in-memory document of the given content type.
    Document { content_type: String, data: Bytes },
}

impl Body {
    /// An XML document.
    pub fn xml(document: impl Into<String>) -> Self {
        Body::Document {
            content_type: "application/xml".into(),
            data: Bytes::from(document.into()),
        }
    }

    /// A JSON document.
    pub fn json(value: &serde_json::Value) -> Self {
        Body::Document {
            content_type: "application/json".into(),
            data: Bytes::from(value.to_string()),
        }
    }
}

/// How long a caller is willing to block for a network call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPolicy {
    /// Block up to the configured ceiling.
    Default,
    /// Wait at most this long, then fail with `504 Gateway Timeout`. Cached entries are never
    /// served past their expiry.
    Timeout(Duration),
    /// Wait at most this long, then serve an expired cached entry as prefetch.
    MaxBlock(Duration),
    /// Wait at most this long, then serve an expired cached entry as stale, or fail with
    /// `504 Gateway Timeout` if there is none.
    StaleBlock(Duration),
}

#[derive(Debug, Clone)]
enum ParamOp {
    Add(String, String),
    Set(String, String),
}

/// Builds a [`RestRequest`].
///
/// Setters can be called in any order. All validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    url: String,
    method: Option<Method>,
    authorization: Option<Authorization>,
    body: Option<Body>,
    min_cache_period: Duration,
    error_cache_period: Duration,
    timeout: Option<Duration>,
    max_block_period: Option<Duration>,
    stale_block_period: Option<Duration>,
    agent: String,
    check_url_length: bool,
    max_url_length: usize,
    disable_gzip: bool,
    strict_url_validation: bool,
    params: Vec<ParamOp>,
    content_type: Option<String>,
    disposition_type: Option<String>,
}

impl RequestBuilder {
    /// Creates a builder for `url` with defaults taken from `config`.
    pub fn new(url: impl Into<String>, config: &Config) -> Self {
        Self {
            url: url.into(),
            method: None,
            authorization: None,
            body: None,
            min_cache_period: config.min_cache_period,
            error_cache_period: config.error_cache_period,
            timeout: None,
            max_block_period: None,
            stale_block_period: None,
            agent: config.user_agent.clone(),
            check_url_length: true,
            max_url_length: config.max_url_length,
            disable_gzip: false,
            strict_url_validation: false,
            params: Vec::new(),
            content_type: None,
            disposition_type: None,
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    pub fn authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = Some(authorization);
        self
    }

    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Minimum time a successful response is considered fresh.
    pub fn min_cache_period(mut self, period: Duration) -> Self {
        self.min_cache_period = period;
        self
    }

    /// Time an error response is considered fresh.
    pub fn error_cache_period(mut self, period: Duration) -> Self {
        self.error_cache_period = period;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_block_period(mut self, period: Duration) -> Self {
        self.max_block_period = Some(period);
        self
    }

    pub fn stale_block_period(mut self, period: Duration) -> Self {
        self.stale_block_period = Some(period);
        self
    }

    pub fn agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn disable_url_length_check(mut self, disable: bool) -> Self {
        self.check_url_length = !disable;
        self
    }

    pub fn disable_gzip(mut self, disable: bool) -> Self {
        self.disable_gzip = disable;
        self
    }

    /// Rejects URLs containing characters outside of RFC 3986 instead of encoding them.
    pub fn strict_url_validation(mut self, strict: bool) -> Self {
        self.strict_url_validation = strict;
        self
    }

    /// Appends a value to a query parameter.
    pub fn add_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(ParamOp::Add(name.into(), value.into()));
        self
    }

    /// Replaces all values of a query parameter.
    pub fn set_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(ParamOp::Set(name.into(), value.into()));
        self
    }

    /// The `Content-Type` of a file body.
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// The disposition type of a file body, e.g. `attachment`.
    pub fn disposition_type(mut self, disposition_type: impl Into<String>) -> Self {
        self.disposition_type = Some(disposition_type.into());
        self
    }

    /// Validates the configuration and finalizes the request.
    pub fn build(self) -> Result<RestRequest, ConfigError> {
        let policies = [self.timeout, self.max_block_period, self.stale_block_period];
        let positive = policies
            .iter()
            .filter(|p| p.is_some_and(|d| !d.is_zero()))
            .count();
        if positive > 1 {
            return Err(ConfigError::ConflictingTimingPolicy);
        }
        let policy = match (self.timeout, self.max_block_period, self.stale_block_period) {
            (Some(d), _, _) if !d.is_zero() => BlockPolicy::Timeout(d),
            (_, Some(d), _) if !d.is_zero() => BlockPolicy::MaxBlock(d),
            (_, _, Some(d)) if !d.is_zero() => BlockPolicy::StaleBlock(d),
            _ => BlockPolicy::Default,
        };

        if self.strict_url_validation {
            if let Some(c) = find_invalid_char(&self.url) {
                return Err(ConfigError::InvalidUrlCharacter(c));
            }
        }

        let ops = self.params;
        let url = RequestUrl::build(&self.url, |params: &mut QueryParams| {
            for op in &ops {
                match op {
                    ParamOp::Add(name, value) => params.add(name, value),
                    ParamOp::Set(name, value) => params.set(name, value),
                }
            }
        })?;

        let embedded = match url.params.get("_method").and_then(|v| v.first()) {
            Some(value) => Some(value.parse::<Method>()?),
            None => None,
        };
        let method = match (self.method, embedded) {
            (Some(explicit), Some(embedded)) if explicit != embedded && explicit != Method::Post => {
                return Err(ConfigError::MethodConflict { explicit, embedded });
            }
            (_, Some(embedded)) => embedded,
            (Some(explicit), None) => explicit,
            (None, None) => Method::Get,
        };
        let wire_method = self.method.unwrap_or(method);

        if method.is_cacheable() && self.body.is_some() {
            return Err(ConfigError::BodyNotAllowed(method));
        }

        let principal = self.authorization.as_ref().map(Authorization::principal);
        let key = CacheKey::from_request(&url.canonical, principal.as_deref(), &self.agent);

        Ok(RestRequest {
            method,
            wire_method,
            url: url.url,
            canonical_url: url.canonical,
            key,
            authorization: self.authorization,
            body: self.body,
            min_cache_period: self.min_cache_period,
            error_cache_period: self.error_cache_period,
            policy,
            agent: self.agent,
            max_url_length: self.check_url_length.then_some(self.max_url_length),
            disable_gzip: self.disable_gzip,
            content_type: self.content_type,
            disposition_type: self.disposition_type,
        })
    }
}

/// A validated, immutable request.
#[derive(Debug, Clone)]
pub struct RestRequest {
    method: Method,
    wire_method: Method,
    url: Url,
    canonical_url: String,
    key: CacheKey,
    authorization: Option<Authorization>,
    body: Option<Body>,
    min_cache_period: Duration,
    error_cache_period: Duration,
    policy: BlockPolicy,
    agent: String,
    max_url_length: Option<usize>,
    disable_gzip: bool,
    content_type: Option<String>,
    disposition_type: Option<String>,
}

impl RestRequest {
    /// The verb this request stands for, taking `_method=` into account.
    pub fn method(&self) -> Method {
        self.method
    }

    /// The verb sent on the wire.
    pub fn wire_method(&self) -> Method {
        self.wire_method
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn canonical_url(&self) -> &str {
        &self.canonical_url
    }

    pub fn cache_key(&self) -> &CacheKey {
        &self.key
    }

    pub fn authorization(&self) -> Option<&Authorization> {
        self.authorization.as_ref()
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn min_cache_period(&self) -> Duration {
        self.min_cache_period
    }

    pub fn error_cache_period(&self) -> Duration {
        self.error_cache_period
    }

    pub fn policy(&self) -> BlockPolicy {
        self.policy
    }

    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Whether the URL is longer than allowed.
    pub fn exceeds_url_length(&self) -> bool {
        self.max_url_length
            .is_some_and(|max| self.url.as_str().len() > max)
    }

    pub fn disable_gzip(&self) -> bool {
        self.disable_gzip
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn disposition_type(&self) -> Option<&str> {
        self.disposition_type.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(url: &str) -> RequestBuilder {
        RequestBuilder::new(url, &Config::default())
    }

    #[test]
    fn test_get_with_body() {
        let err = builder("http://x/api")
            .body(Body::xml("<a/>"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::BodyNotAllowed(Method::Get)));

        let request = builder("http://x/api")
            .method(Method::Post)
            .body(Body::xml("<a/>"))
            .build()
            .unwrap();
        assert_eq!(request.method(), Method::Post);
    }

    #[test]
    fn test_conflicting_timing_policy() {
        let err = builder("http://x/api")
            .timeout(Duration::from_secs(1))
            .max_block_period(Duration::from_secs(2))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingTimingPolicy));

        // the order of the setters does not matter
        let err = builder("http://x/api")
            .stale_block_period(Duration::from_secs(2))
            .timeout(Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingTimingPolicy));

        // zero does not count as set
        let request = builder("http://x/api")
            .timeout(Duration::ZERO)
            .stale_block_period(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(
            request.policy(),
            BlockPolicy::StaleBlock(Duration::from_secs(2))
        );
    }

    #[test]
    fn test_embedded_method() {
        let request = builder("http://x/api?_method=delete").build().unwrap();
        assert_eq!(request.method(), Method::Delete);
        assert_eq!(request.wire_method(), Method::Delete);

        // POST may tunnel any other verb
        let request = builder("http://x/api?_method=PUT")
            .method(Method::Post)
            .build()
            .unwrap();
        assert_eq!(request.method(), Method::Put);
        assert_eq!(request.wire_method(), Method::Post);

        let err = builder("http://x/api?_method=PUT")
            .method(Method::Get)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MethodConflict {
                explicit: Method::Get,
                embedded: Method::Put
            }
        ));

        let err = builder("http://x/api?_method=PATCH").build().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMethod(_)));
    }

    #[test]
    fn test_strict_url() {
        let err = builder("http://x/a b")
            .strict_url_validation(true)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUrlCharacter(' ')));

        let request = builder("http://x/a b").build().unwrap();
        assert_eq!(request.url().as_str(), "http://x/a%20b");
    }

    #[test]
    fn test_cache_key_identity() {
        let a = builder("http://x/api?b=2&a=1").build().unwrap();
        let b = builder("http://x/api")
            .add_param("a", "1")
            .add_param("b", "2")
            .build()
            .unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_ne!(a.url(), b.url());

        let with_password = |password: &str| {
            builder("http://x/api")
                .authorization(Authorization::Basic {
                    user: "alice".into(),
                    password: password.into(),
                    domain: None,
                })
                .build()
                .unwrap()
        };
        assert_eq!(
            with_password("one").cache_key(),
            with_password("two").cache_key()
        );
        assert!(!with_password("secret")
            .cache_key()
            .metadata()
            .contains("secret"));
        assert_ne!(a.cache_key(), with_password("one").cache_key());

        let other_agent = builder("http://x/api?b=2&a=1").agent("other").build().unwrap();
        assert_ne!(a.cache_key(), other_agent.cache_key());
    }

    #[test]
    fn test_url_length() {
        let long = format!("http://x/{}", "a".repeat(3000));
        assert!(builder(&long).build().unwrap().exceeds_url_length());
        assert!(!builder(&long)
            .disable_url_length_check(true)
            .build()
            .unwrap()
            .exceeds_url_length());
    }

    #[test]
    fn test_authorization_debug_redacts() {
        let auth = Authorization::Token("very-secret".into());
        assert!(!format!("{auth:?}").contains("very-secret"));
        assert!(auth.principal().starts_with("token:"));
        assert!(!auth.principal().contains("very-secret"));
    }
}
