//! Domain entities - throttling policies, keys and decisions.

mod decision;
mod key;
mod policy;

pub use decision::{CounterRecord, ThrottleDecision};
pub use key::RateKey;
pub use policy::ThrottlePolicy;
