//! Rate limiting logic and state management.

mod backend;
mod clock;
mod counter;
mod distributed;
mod identity;
mod limiter;
mod local;
mod policy;
mod rules;

pub use backend::{namespaced_key, Backend, CounterStore, DriverKind, DEFAULT_NAMESPACE};
pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{advance, CounterRecord, Quota, DEFAULT_DURATION, DEFAULT_MAX};
pub use distributed::SharedStore;
pub use identity::{peer_addr, FnResolver, HeaderValueResolver, Identity, IdentityResolver, PeerAddr};
pub use limiter::{long_duration, Decision, Denial, DenialKind, RateLimiter};
pub use local::LocalStore;
pub use policy::{
    ErrorBody, HeaderNames, LimitExceeded, LimitHook, RateLimitPolicy, RateLimitPolicyBuilder,
    DEFAULT_REMAINING_HEADER, DEFAULT_RESET_HEADER, DEFAULT_TOTAL_HEADER,
};
pub use rules::{AccessRule, AddrList, FnRule};
