//! Rate limiting logic: configuration lookup, algorithms, and the facade.

pub mod algorithms;
mod backend;
mod key;
mod limiter;
mod model;
mod resolver;
mod rules;

pub use algorithms::{AlgorithmEngine, Strategy};
pub use backend::{AdmissionCheck, FailurePolicy};
pub use key::RateLimitKey;
pub use limiter::RateLimiter;
pub use model::{AlgorithmKind, LimitConfig, StoredLimitConfig};
pub use resolver::ConfigResolver;
pub use rules::{ConfigPublisher, EndpointRule, LimitRule, RulesDocument, ServiceRules};
