//! Rate limiting logic and state management.

mod clock;
mod counter;
mod key;
mod limiter;
mod policy;
mod reaper;
mod store;
mod strategy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::{CounterRecord, Limit, Transition, MAX_WINDOW};
pub use key::{RateLimitKey, RequestAttributes, UNKNOWN_CLIENT};
pub use limiter::{ChainOutcome, Decision, LimiterChain, RateLimiter};
pub use policy::{Verdict, WindowPolicy};
pub use reaper::{Reaper, ReaperHandle};
pub use store::KeyedCounterStore;
pub use strategy::{
    ApiKeyStrategy, IpStrategy, KeyStrategy, KeyStrategyKind, UserStrategy, API_KEY_HEADER,
    USER_ID_HEADER, USER_ID_QUERY,
};
