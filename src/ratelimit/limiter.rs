//! The rate limit decision engine.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::request::Parts;
use http::StatusCode;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use super::backend::CounterStore;
use super::clock::{Clock, SystemClock};
use super::counter::CounterRecord;
use super::identity::Identity;
use super::policy::{ErrorBody, LimitExceeded, LimitHook, RateLimitPolicy};
use crate::config::RateLimitingConfig;
use crate::error::{Result, StoreError};

/// The outcome of checking one request.
#[derive(Debug)]
pub enum Decision {
    /// The identity resolver opted the request out of limiting
    Skipped,
    /// The request matched the whitelist
    Whitelisted,
    /// The request fits in its identity's quota
    Admitted {
        /// Rate limit headers for the response; empty when disabled
        headers: HeaderMap,
        /// Window state after this request
        record: CounterRecord,
    },
    /// The request is rejected
    Denied(Denial),
}

impl Decision {
    /// Whether the request may proceed.
    pub fn is_admitted(&self) -> bool {
        !matches!(self, Decision::Denied(_))
    }

    /// Headers to add to the response, if any.
    pub fn headers(&self) -> Option<&HeaderMap> {
        match self {
            Decision::Admitted { headers, .. } => Some(headers),
            Decision::Denied(denial) => Some(&denial.headers),
            Decision::Skipped | Decision::Whitelisted => None,
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenialKind {
    /// The request matched the blacklist
    Forbidden,
    /// The identity's quota for the window is spent
    QuotaExceeded {
        /// Time until the window resets
        retry_after: Duration,
    },
}

/// A rejected request: everything needed to answer it.
///
/// A denial is both rendered directly as a response and, when the policy
/// throws, returned as an error; the headers travel with it either way.
#[derive(Debug, Clone, Error)]
#[error("{body}")]
pub struct Denial {
    /// Why the request was rejected
    pub kind: DenialKind,
    /// Response status
    pub status: StatusCode,
    /// Response headers, including `Retry-After` for quota denials
    pub headers: HeaderMap,
    /// Response body
    pub body: ErrorBody,
}

impl Denial {
    /// The fixed blacklist rejection. Carries no rate limit headers.
    pub fn forbidden() -> Self {
        let body = ErrorBody::from("Forbidden");
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, body.content_type());
        Self {
            kind: DenialKind::Forbidden,
            status: StatusCode::FORBIDDEN,
            headers,
            body,
        }
    }

    /// Time until the client may retry, for quota denials.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.kind {
            DenialKind::QuotaExceeded { retry_after } => Some(retry_after),
            DenialKind::Forbidden => None,
        }
    }

    /// Convert into an HTTP response with any body type built from text.
    pub fn into_http_response<B: From<String>>(self) -> http::Response<B> {
        let mut response = http::Response::new(B::from(self.body.to_string()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

/// Render a delay the way people say it: `999 ms`, `1 second`, `59 minutes`.
///
/// The count is rounded to the nearest unit and pluralised from 1.5 units up.
pub fn long_duration(delay: Duration) -> String {
    const SECOND: u64 = 1000;
    const MINUTE: u64 = 60 * SECOND;
    const HOUR: u64 = 60 * MINUTE;
    const DAY: u64 = 24 * HOUR;

    let millis = delay.as_millis() as u64;
    let (unit, name) = match millis {
        m if m >= DAY => (DAY, "day"),
        m if m >= HOUR => (HOUR, "hour"),
        m if m >= MINUTE => (MINUTE, "minute"),
        m if m >= SECOND => (SECOND, "second"),
        m => return format!("{} ms", m),
    };

    let count = (2 * millis + unit) / (2 * unit);
    let plural = 2 * millis >= 3 * unit;
    format!("{} {}{}", count, name, if plural { "s" } else { "" })
}

/// The rate limiter: resolves identities, applies access rules, counts
/// requests and shapes denials.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter over any counter store.
    pub fn new(policy: RateLimitPolicy, store: impl CounterStore + 'static) -> Self {
        Self {
            policy,
            store: Arc::new(store),
            clock: Arc::new(SystemClock::new()),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Build a rate limiter from configuration, connecting to the shared
    /// store if the driver needs one.
    pub async fn from_settings(settings: &RateLimitingConfig) -> Result<Self> {
        let policy = settings.to_policy()?;
        let backend = settings.backend().await?;
        info!(
            driver = %backend.kind(),
            max = policy.quota().max,
            duration_ms = policy.quota().duration_millis(),
            "Rate limiter initialized"
        );
        Ok(Self::new(policy, backend))
    }

    /// The policy in effect.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Check a request.
    ///
    /// Steps, short-circuiting: identity (skip admits), blacklist (403),
    /// whitelist (admits uncounted), then one counted request against the
    /// store. Store failures are returned as errors, never as a decision.
    pub async fn check(&self, parts: &Parts) -> std::result::Result<Decision, StoreError> {
        let identity = match self.policy.identity.resolve(parts) {
            Identity::Skip => {
                trace!(uri = %parts.uri, "Identity resolver skipped rate limiting");
                return Ok(Decision::Skipped);
            }
            Identity::Key(key) => key,
        };

        if let Some(blacklist) = &self.policy.blacklist {
            if blacklist.matches(parts).await {
                debug!(identity = %identity, "Request blacklisted");
                return Ok(Decision::Denied(Denial::forbidden()));
            }
        }

        if let Some(whitelist) = &self.policy.whitelist {
            if whitelist.matches(parts).await {
                trace!(identity = %identity, "Request whitelisted");
                return Ok(Decision::Whitelisted);
            }
        }

        let quota = self.policy.quota;
        let now = self.clock.now_millis();
        let record = self.store.get(&identity, quota, now).await?;

        let headers = match &self.policy.headers {
            Some(names) => names.render(&record),
            None => HeaderMap::new(),
        };

        debug!(
            identity = %identity,
            remaining = record.remaining_after(),
            total = record.total,
            "Rate limit checked"
        );

        if record.admits() {
            return Ok(Decision::Admitted { headers, record });
        }

        Ok(Decision::Denied(self.quota_exceeded(identity, record, headers, now)))
    }

    /// Shape a quota-exceeded denial and notify the hook.
    fn quota_exceeded(
        &self,
        identity: String,
        record: CounterRecord,
        mut headers: HeaderMap,
        now: u64,
    ) -> Denial {
        let retry_after = record.retry_after(now);

        debug!(
            identity = %identity,
            retry_after_ms = retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );

        let body = match &self.policy.error_body {
            Some(body) => body.clone(),
            None => ErrorBody::Text(format!(
                "Rate limit exceeded, retry in {}.",
                long_duration(retry_after)
            )),
        };

        headers.insert(RETRY_AFTER, HeaderValue::from(retry_after.as_secs()));
        headers.insert(CONTENT_TYPE, body.content_type());

        if let Some(hook) = &self.policy.on_limit_exceeded {
            let event = LimitExceeded {
                identity,
                record,
                retry_after,
            };
            notify(Arc::clone(hook), event);
        }

        Denial {
            kind: DenialKind::QuotaExceeded { retry_after },
            status: self.policy.status,
            headers,
            body,
        }
    }
}

/// Run the limit-exceeded hook off the response path.
///
/// The hook gets a blocking thread of its own; a panic there is logged and
/// otherwise ignored. Outside a tokio runtime it runs inline instead.
fn notify(hook: LimitHook, event: LimitExceeded) {
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        if catch_unwind(AssertUnwindSafe(|| hook(&event))).is_err() {
            warn!(identity = %event.identity, "Limit exceeded hook panicked");
        }
        return;
    };

    let identity = event.identity.clone();
    let task = runtime.spawn_blocking(move || hook(&event));
    runtime.spawn(async move {
        match task.await {
            Err(e) if e.is_panic() => {
                warn!(identity = %identity, "Limit exceeded hook panicked");
            }
            Err(e) => debug!(identity = %identity, error = %e, "Limit exceeded hook cancelled"),
            Ok(()) => {}
        }
    });
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("policy", &self.policy)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
