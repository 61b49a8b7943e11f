use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use http::{Request, Response};
use tower::{BoxError, Service};
use tracing::{debug, error, instrument};

use crate::ratelimit::{Decision, RateLimiter};

/// Rate limiting middleware service.
///
/// Admitted requests reach the inner service and get the rate limit headers
/// added to their response. Denied requests never reach it: they are answered
/// directly, or returned as a [`Denial`](crate::ratelimit::Denial) error when
/// the policy throws. Counter store failures are always returned as errors.
#[derive(Debug, Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S> RateLimitService<S> {
    pub fn new(inner: S, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }

    /// The limiter used by this service.
    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }
}

impl<S, B, ResBody> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
    B: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        // Keep the service that was driven to readiness; leave a fresh clone behind
        let clone = self.inner.clone();
        let inner = std::mem::replace(&mut self.inner, clone);
        let limiter = Arc::clone(&self.limiter);

        Box::pin(rate_limit(limiter, inner, req))
    }
}

#[instrument(skip_all, fields(method = %req.method(), uri = %req.uri()))]
async fn rate_limit<S, B, ResBody>(
    limiter: Arc<RateLimiter>,
    mut inner: S,
    req: Request<B>,
) -> Result<Response<ResBody>, BoxError>
where
    S: Service<Request<B>, Response = Response<ResBody>>,
    S::Error: Into<BoxError>,
    ResBody: From<String>,
{
    let (parts, body) = req.into_parts();

    let decision = limiter.check(&parts).await.map_err(|e| {
        error!(error = %e, "Rate limit check failed");
        BoxError::from(e)
    })?;

    match decision {
        Decision::Denied(denial) => {
            if limiter.policy().throws() {
                debug!(status = %denial.status, "Surfacing denial as error");
                return Err(BoxError::from(denial));
            }
            Ok(denial.into_http_response())
        }
        Decision::Admitted { headers, .. } => {
            let mut response = inner
                .call(Request::from_parts(parts, body))
                .await
                .map_err(Into::into)?;
            response.headers_mut().extend(headers);
            Ok(response)
        }
        Decision::Skipped | Decision::Whitelisted => inner
            .call(Request::from_parts(parts, body))
            .await
            .map_err(Into::into),
    }
}
