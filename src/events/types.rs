//! Event Bus data types.

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

static LAST_TIMESTAMP_MS: AtomicI64 = AtomicI64::new(0);

/// Returns a millisecond epoch timestamp guaranteed to be monotonic within
/// this process, even across rapid successive calls or clock adjustments.
pub fn monotonic_now_ms() -> i64 {
    let wall = chrono::Utc::now().timestamp_millis();
    loop {
        let prev = LAST_TIMESTAMP_MS.load(Ordering::SeqCst);
        let next = wall.max(prev + 1);
        if LAST_TIMESTAMP_MS
            .compare_exchange(prev, next, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            return next;
        }
    }
}

/// A single event flowing through the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub type_: String,
    pub domain: String,
    pub payload: Value,
    pub timestamp: i64,
    pub correlation_id: String,
}

impl Event {
    pub fn new(
        type_: impl Into<String>,
        domain: impl Into<String>,
        payload: Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_: type_.into(),
            domain: domain.into(),
            payload,
            timestamp: monotonic_now_ms(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// A filter predicate a subscription must satisfy. A subscription's full
/// filter list must match for it to receive an event (logical AND).
pub type FilterPredicate = Box<dyn Fn(&Event) -> bool + Send + Sync>;

pub fn by_type(type_: impl Into<String>) -> FilterPredicate {
    let type_ = type_.into();
    Box::new(move |e: &Event| e.type_ == type_)
}

pub fn by_domain(domain: impl Into<String>) -> FilterPredicate {
    let domain = domain.into();
    Box::new(move |e: &Event| e.domain == domain)
}

pub fn by_types(types: Vec<String>) -> FilterPredicate {
    Box::new(move |e: &Event| types.iter().any(|t| t == &e.type_))
}

pub fn by_domains(domains: Vec<String>) -> FilterPredicate {
    Box::new(move |e: &Event| domains.iter().any(|d| d == &e.domain))
}

/// Handler invoked for a matching event. Errors are logged and swallowed so one
/// failing subscriber cannot stall delivery to the others.
pub type Handler = Box<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

pub struct Subscription {
    pub id: Uuid,
    pub filters: Vec<FilterPredicate>,
    pub handler: Handler,
}

impl Subscription {
    pub fn matches(&self, event: &Event) -> bool {
        self.filters.iter().all(|f| f(event))
    }
}
