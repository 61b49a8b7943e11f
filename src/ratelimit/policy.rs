//! Rate limit policy: quota, identity, access rules and response shaping.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::request::Parts;
use http::StatusCode;

use super::counter::{CounterRecord, Quota, DEFAULT_DURATION, DEFAULT_MAX};
use super::identity::{FnResolver, Identity, IdentityResolver, PeerAddr};
use super::rules::{AccessRule, FnRule};
use crate::error::{QuotaGuardError, Result};

/// Default name of the remaining-requests header.
pub const DEFAULT_REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Default name of the reset-time header.
pub const DEFAULT_RESET_HEADER: &str = "X-RateLimit-Reset";
/// Default name of the quota header.
pub const DEFAULT_TOTAL_HEADER: &str = "X-RateLimit-Limit";

/// Names of the three rate limit headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderNames {
    pub remaining: HeaderName,
    pub reset: HeaderName,
    pub total: HeaderName,
}

impl HeaderNames {
    /// Parse header names, failing on anything that is not a valid token.
    pub fn parse(remaining: &str, reset: &str, total: &str) -> Result<Self> {
        let parse = |name: &str| {
            HeaderName::try_from(name).map_err(|e| {
                QuotaGuardError::Config(format!("invalid header name '{}': {}", name, e))
            })
        };
        Ok(Self {
            remaining: parse(remaining)?,
            reset: parse(reset)?,
            total: parse(total)?,
        })
    }

    /// Render the headers for a counter record.
    ///
    /// Remaining is reported after the current request is counted, and reset
    /// as epoch seconds.
    pub fn render(&self, record: &CounterRecord) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(3);
        headers.insert(
            self.remaining.clone(),
            HeaderValue::from(record.remaining_after()),
        );
        headers.insert(self.reset.clone(), HeaderValue::from(record.reset_secs()));
        headers.insert(self.total.clone(), HeaderValue::from(record.total));
        headers
    }
}

impl Default for HeaderNames {
    fn default() -> Self {
        Self {
            remaining: HeaderName::from_static("x-ratelimit-remaining"),
            reset: HeaderName::from_static("x-ratelimit-reset"),
            total: HeaderName::from_static("x-ratelimit-limit"),
        }
    }
}

/// Body sent with a quota-exceeded response.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorBody {
    /// Plain text
    Text(String),
    /// Structured JSON document
    Json(serde_json::Value),
}

impl ErrorBody {
    /// Content type matching the body.
    pub fn content_type(&self) -> HeaderValue {
        match self {
            ErrorBody::Text(_) => HeaderValue::from_static("text/plain; charset=utf-8"),
            ErrorBody::Json(_) => HeaderValue::from_static("application/json"),
        }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorBody::Text(text) => f.write_str(text),
            ErrorBody::Json(value) => write!(f, "{}", value),
        }
    }
}

impl From<&str> for ErrorBody {
    fn from(text: &str) -> Self {
        ErrorBody::Text(text.to_string())
    }
}

impl From<String> for ErrorBody {
    fn from(text: String) -> Self {
        ErrorBody::Text(text)
    }
}

impl From<serde_json::Value> for ErrorBody {
    fn from(value: serde_json::Value) -> Self {
        ErrorBody::Json(value)
    }
}

/// Details handed to the limit-exceeded hook.
#[derive(Debug, Clone)]
pub struct LimitExceeded {
    /// Identity that ran out of quota
    pub identity: String,
    /// Window state at the time of the denial
    pub record: CounterRecord,
    /// Time until the window resets
    pub retry_after: Duration,
}

/// Hook invoked for every quota-exceeded denial.
pub type LimitHook = Arc<dyn Fn(&LimitExceeded) + Send + Sync>;

/// Immutable rate limit policy.
#[derive(Clone)]
pub struct RateLimitPolicy {
    pub(crate) quota: Quota,
    pub(crate) identity: Arc<dyn IdentityResolver>,
    pub(crate) whitelist: Option<Arc<dyn AccessRule>>,
    pub(crate) blacklist: Option<Arc<dyn AccessRule>>,
    pub(crate) headers: Option<HeaderNames>,
    pub(crate) on_limit_exceeded: Option<LimitHook>,
    pub(crate) error_body: Option<ErrorBody>,
    pub(crate) status: StatusCode,
    pub(crate) throw: bool,
}

impl RateLimitPolicy {
    /// Start building a policy from the defaults.
    pub fn builder() -> RateLimitPolicyBuilder {
        RateLimitPolicyBuilder::default()
    }

    /// The quota applied per identity.
    pub fn quota(&self) -> Quota {
        self.quota
    }

    /// Header names, or `None` when headers are disabled.
    pub fn headers(&self) -> Option<&HeaderNames> {
        self.headers.as_ref()
    }

    /// Status used for quota-exceeded denials.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Configured error body, if any.
    pub fn error_body(&self) -> Option<&ErrorBody> {
        self.error_body.as_ref()
    }

    /// Whether denials are surfaced as errors instead of responses.
    pub fn throws(&self) -> bool {
        self.throw
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            quota: Quota::default(),
            identity: Arc::new(PeerAddr),
            whitelist: None,
            blacklist: None,
            headers: Some(HeaderNames::default()),
            on_limit_exceeded: None,
            error_body: None,
            status: StatusCode::TOO_MANY_REQUESTS,
            throw: false,
        }
    }
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("quota", &self.quota)
            .field("whitelist", &self.whitelist.is_some())
            .field("blacklist", &self.blacklist.is_some())
            .field("headers", &self.headers)
            .field("on_limit_exceeded", &self.on_limit_exceeded.is_some())
            .field("error_body", &self.error_body)
            .field("status", &self.status)
            .field("throw", &self.throw)
            .finish()
    }
}

/// Builder for [`RateLimitPolicy`].
pub struct RateLimitPolicyBuilder {
    max: u64,
    duration: Duration,
    identity: Arc<dyn IdentityResolver>,
    whitelist: Option<Arc<dyn AccessRule>>,
    blacklist: Option<Arc<dyn AccessRule>>,
    header_names: (String, String, String),
    disable_headers: bool,
    on_limit_exceeded: Option<LimitHook>,
    error_body: Option<ErrorBody>,
    status: u16,
    throw: bool,
}

impl Default for RateLimitPolicyBuilder {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            duration: DEFAULT_DURATION,
            identity: Arc::new(PeerAddr),
            whitelist: None,
            blacklist: None,
            header_names: (
                DEFAULT_REMAINING_HEADER.to_string(),
                DEFAULT_RESET_HEADER.to_string(),
                DEFAULT_TOTAL_HEADER.to_string(),
            ),
            disable_headers: false,
            on_limit_exceeded: None,
            error_body: None,
            status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
            throw: false,
        }
    }
}

impl RateLimitPolicyBuilder {
    /// Requests granted per window.
    pub fn max(mut self, max: u64) -> Self {
        self.max = max;
        self
    }

    /// Window length.
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Derive identities with a closure.
    pub fn identity<F>(self, f: F) -> Self
    where
        F: Fn(&Parts) -> Identity + Send + Sync + 'static,
    {
        self.identity_resolver(FnResolver(f))
    }

    /// Derive identities with a resolver.
    pub fn identity_resolver(mut self, resolver: impl IdentityResolver + 'static) -> Self {
        self.identity = Arc::new(resolver);
        self
    }

    /// Admit matching requests without counting them.
    pub fn whitelist<F>(self, f: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.whitelist_rule(FnRule(f))
    }

    /// Admit requests matching `rule` without counting them.
    pub fn whitelist_rule(mut self, rule: impl AccessRule + 'static) -> Self {
        self.whitelist = Some(Arc::new(rule));
        self
    }

    /// Reject matching requests with 403.
    pub fn blacklist<F>(self, f: F) -> Self
    where
        F: Fn(&Parts) -> bool + Send + Sync + 'static,
    {
        self.blacklist_rule(FnRule(f))
    }

    /// Reject requests matching `rule` with 403.
    pub fn blacklist_rule(mut self, rule: impl AccessRule + 'static) -> Self {
        self.blacklist = Some(Arc::new(rule));
        self
    }

    /// Custom names for the remaining, reset and total headers.
    pub fn header_names(
        mut self,
        remaining: impl Into<String>,
        reset: impl Into<String>,
        total: impl Into<String>,
    ) -> Self {
        self.header_names = (remaining.into(), reset.into(), total.into());
        self
    }

    /// Suppress the rate limit headers entirely.
    pub fn disable_headers(mut self, disable: bool) -> Self {
        self.disable_headers = disable;
        self
    }

    /// Called for every quota-exceeded denial, on a blocking thread after the
    /// denial is produced. Panics are logged and ignored.
    pub fn on_limit_exceeded<F>(mut self, hook: F) -> Self
    where
        F: Fn(&LimitExceeded) + Send + Sync + 'static,
    {
        self.on_limit_exceeded = Some(Arc::new(hook));
        self
    }

    /// Body for quota-exceeded responses, replacing the default message.
    pub fn error_body(mut self, body: impl Into<ErrorBody>) -> Self {
        self.error_body = Some(body.into());
        self
    }

    /// Status for quota-exceeded responses.
    pub fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Surface denials as errors for an outer handler.
    pub fn throw(mut self, throw: bool) -> Self {
        self.throw = throw;
        self
    }

    /// Validate and build the policy.
    pub fn build(self) -> Result<RateLimitPolicy> {
        if self.duration.as_millis() == 0 {
            return Err(QuotaGuardError::Config(
                "duration must be at least one millisecond".to_string(),
            ));
        }

        let status = StatusCode::from_u16(self.status).map_err(|_| {
            QuotaGuardError::Config(format!("invalid status code {}", self.status))
        })?;

        let (remaining, reset, total) = &self.header_names;
        let names = HeaderNames::parse(remaining, reset, total)?;

        Ok(RateLimitPolicy {
            quota: Quota::new(self.max, self.duration),
            identity: self.identity,
            whitelist: self.whitelist,
            blacklist: self.blacklist,
            headers: (!self.disable_headers).then_some(names),
            on_limit_exceeded: self.on_limit_exceeded,
            error_body: self.error_body,
            status,
            throw: self.throw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RateLimitPolicy::builder().build().unwrap();

        assert_eq!(policy.quota(), Quota::new(2500, Duration::from_secs(3600)));
        assert_eq!(policy.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(policy.headers(), Some(&HeaderNames::default()));
        assert!(policy.error_body().is_none());
        assert!(!policy.throws());
    }

    #[test]
    fn test_builder_rejects_zero_duration() {
        let result = RateLimitPolicy::builder().duration(Duration::ZERO).build();
        assert!(matches!(result, Err(QuotaGuardError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_bad_header_name() {
        let result = RateLimitPolicy::builder()
            .header_names("Rate Limit", "Reset", "Total")
            .build();
        assert!(matches!(result, Err(QuotaGuardError::Config(_))));
    }

    #[test]
    fn test_builder_rejects_bad_status() {
        let result = RateLimitPolicy::builder().status(42).build();
        assert!(matches!(result, Err(QuotaGuardError::Config(_))));
    }

    #[test]
    fn test_disabled_headers() {
        let policy = RateLimitPolicy::builder().disable_headers(true).build().unwrap();
        assert!(policy.headers().is_none());
    }

    #[test]
    fn test_render_headers() {
        let names = HeaderNames::parse("Rate-Limit-Remaining", "Rate-Limit-Reset", "Rate-Limit-Total")
            .unwrap();
        let record = CounterRecord {
            identity: "a".to_string(),
            total: 10,
            remaining: 4,
            reset: 1_700_000_000_500,
        };

        let headers = names.render(&record);
        assert_eq!(headers.len(), 3);
        assert_eq!(headers["rate-limit-remaining"], "3");
        assert_eq!(headers["rate-limit-reset"], "1700000001");
        assert_eq!(headers["rate-limit-total"], "10");
    }

    #[test]
    fn test_error_body_rendering() {
        let text = ErrorBody::from("Slow down");
        assert_eq!(text.to_string(), "Slow down");
        assert_eq!(text.content_type(), "text/plain; charset=utf-8");

        let json = ErrorBody::from(serde_json::json!({"error": "slow down"}));
        assert_eq!(json.to_string(), r#"{"error":"slow down"}"#);
        assert_eq!(json.content_type(), "application/json");
    }
}
