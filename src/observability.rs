use biometrics::{Collector, Counter, Moments};

pub(crate) static RELAY_REQUESTS: Counter = Counter::new("relaychat.relay.requests");
pub(crate) static RELAY_REJECTED: Counter = Counter::new("relaychat.relay.rejected");
pub(crate) static RELAY_FRAGMENTS: Counter = Counter::new("relaychat.relay.fragments");
pub(crate) static RELAY_COMPLETED: Counter = Counter::new("relaychat.relay.completed");
pub(crate) static RELAY_FAILED: Counter = Counter::new("relaychat.relay.failed");
pub(crate) static RELAY_TIMEOUTS: Counter = Counter::new("relaychat.relay.timeouts");
pub(crate) static RELAY_ABANDONED: Counter = Counter::new("relaychat.relay.abandoned");
pub(crate) static RELAY_TTFB: Moments = Moments::new("relaychat.relay.ttfb_seconds");
pub(crate) static RELAY_DURATION: Moments = Moments::new("relaychat.relay.duration_seconds");

pub(crate) static PROVIDER_REQUESTS: Counter = Counter::new("relaychat.provider.requests");
pub(crate) static PROVIDER_ERRORS: Counter = Counter::new("relaychat.provider.errors");

pub(crate) static SESSION_SUBMITS: Counter = Counter::new("relaychat.session.submits");
pub(crate) static SESSION_REJECTED: Counter = Counter::new("relaychat.session.rejected");
pub(crate) static SESSION_COMPLETED: Counter = Counter::new("relaychat.session.completed");
pub(crate) static SESSION_FAILED: Counter = Counter::new("relaychat.session.failed");
pub(crate) static SESSION_CANCELLED: Counter = Counter::new("relaychat.session.cancelled");
pub(crate) static SESSION_STALE_EVENTS: Counter = Counter::new("relaychat.session.stale_events");
pub(crate) static SESSION_PREVIEWS: Counter = Counter::new("relaychat.session.previews");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&RELAY_REQUESTS);
    collector.register_counter(&RELAY_REJECTED);
    collector.register_counter(&RELAY_FRAGMENTS);
    collector.register_counter(&RELAY_COMPLETED);
    collector.register_counter(&RELAY_FAILED);
    collector.register_counter(&RELAY_TIMEOUTS);
    collector.register_counter(&RELAY_ABANDONED);
    collector.register_moments(&RELAY_TTFB);
    collector.register_moments(&RELAY_DURATION);

    collector.register_counter(&PROVIDER_REQUESTS);
    collector.register_counter(&PROVIDER_ERRORS);

    collector.register_counter(&SESSION_SUBMITS);
    collector.register_counter(&SESSION_REJECTED);
    collector.register_counter(&SESSION_COMPLETED);
    collector.register_counter(&SESSION_FAILED);
    collector.register_counter(&SESSION_CANCELLED);
    collector.register_counter(&SESSION_STALE_EVENTS);
    collector.register_counter(&SESSION_PREVIEWS);
}
