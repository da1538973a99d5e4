//! Throttling middleware - enforces every configured policy per client.

use actix_web::{
    Error, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderMap, HeaderName, HeaderValue},
};
use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::rc::Rc;
use std::sync::Arc;

use quota_core::ports::RateLimiter;
use quota_core::{RateKey, ThrottleDecision, ThrottlePolicy};

use crate::config::ThrottleConfig;
use crate::middleware::error::AppError;

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";
const RESET_HEADER: &str = "x-ratelimit-reset";

/// Throttling middleware factory.
pub struct ThrottleMiddleware {
    limiter: Arc<dyn RateLimiter>,
    config: Arc<ThrottleConfig>,
}

impl ThrottleMiddleware {
    pub fn new(limiter: Arc<dyn RateLimiter>, config: Arc<ThrottleConfig>) -> Self {
        Self { limiter, config }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ThrottleMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = ThrottleMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ThrottleMiddlewareService {
            service: Rc::new(service),
            limiter: self.limiter.clone(),
            config: self.config.clone(),
        }))
    }
}

pub struct ThrottleMiddlewareService<S> {
    service: Rc<S>,
    limiter: Arc<dyn RateLimiter>,
    config: Arc<ThrottleConfig>,
}

impl<S, B> Service<ServiceRequest> for ThrottleMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let limiter = self.limiter.clone();
        let config = self.config.clone();

        Box::pin(async move {
            if config.is_skipped(req.path()) {
                let res = service.call(req).await?;
                return Ok(res.map_into_left_body());
            }

            let tracker = client_tracker(&req, config.trust_proxy);

            // Policies run in order and the first one over quota rejects the
            // request; later policies are not charged for it.
            let mut tightest: Option<(&ThrottlePolicy, ThrottleDecision)> = None;
            for policy in &config.policies {
                let key = match RateKey::scoped(&config.key_prefix, &policy.name, &tracker) {
                    Ok(key) => key,
                    Err(e) => {
                        tracing::warn!(error = %e, "Could not build rate key, skipping throttling");
                        break;
                    }
                };

                let decision = limiter.check_and_increment(&key, policy).await;

                if decision.is_blocked {
                    tracing::warn!(
                        client = %tracker,
                        policy = %policy.name,
                        total_hits = decision.total_hits,
                        "Rate limit exceeded"
                    );

                    let mut response = AppError::TooManyRequests {
                        retry_after_secs: decision.retry_after_secs(),
                    }
                    .error_response();
                    set_rate_limit_headers(response.headers_mut(), policy, &decision);

                    let (http_req, _payload) = req.into_parts();
                    let srv_response = ServiceResponse::new(http_req, response);
                    return Ok(srv_response.map_into_right_body());
                }

                // A fail-open decision carries no counter state worth reporting.
                if decision.total_hits == 0 {
                    continue;
                }

                let tighter = tightest.as_ref().is_none_or(|(current, seen)| {
                    decision.remaining(policy.limit) < seen.remaining(current.limit)
                });
                if tighter {
                    tightest = Some((policy, decision));
                }
            }

            let mut res = service.call(req).await?;
            if let Some((policy, decision)) = tightest {
                set_rate_limit_headers(res.headers_mut(), policy, &decision);
            }
            Ok(res.map_into_left_body())
        })
    }
}

/// Identify the caller: the proxy-reported client IP when the proxy is
/// trusted, otherwise the socket peer.
fn client_tracker(req: &ServiceRequest, trust_proxy: bool) -> String {
    let tracker = if trust_proxy {
        req.connection_info()
            .realip_remote_addr()
            .map(strip_port)
    } else {
        req.peer_addr().map(|addr| addr.ip().to_string())
    };

    tracker.unwrap_or_else(|| "unknown".to_string())
}

/// `realip_remote_addr` may carry a port (`1.2.3.4:5678`, `[::1]:80`).
fn strip_port(addr: &str) -> String {
    if let Ok(socket) = addr.parse::<std::net::SocketAddr>() {
        return socket.ip().to_string();
    }
    addr.to_string()
}

fn set_rate_limit_headers(
    headers: &mut HeaderMap,
    policy: &ThrottlePolicy,
    decision: &ThrottleDecision,
) {
    headers.insert(
        HeaderName::from_static(LIMIT_HEADER),
        HeaderValue::from(policy.limit),
    );
    headers.insert(
        HeaderName::from_static(REMAINING_HEADER),
        HeaderValue::from(decision.remaining(policy.limit)),
    );
    headers.insert(
        HeaderName::from_static(RESET_HEADER),
        HeaderValue::from(decision.time_to_expire_ms.div_ceil(1000)),
    );
}
