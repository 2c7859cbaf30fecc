use biometrics::{Collector, Counter, Moments};

pub(crate) static VENDOR_REQUESTS: Counter = Counter::new("quill.vendor.requests");
pub(crate) static VENDOR_REQUEST_ERRORS: Counter = Counter::new("quill.vendor.request_errors");
pub(crate) static VENDOR_REQUEST_DURATION: Moments =
    Moments::new("quill.vendor.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("quill.stream.chunks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("quill.stream.errors");

pub(crate) static CACHE_HITS: Counter = Counter::new("quill.cache.hits");
pub(crate) static CACHE_MISSES: Counter = Counter::new("quill.cache.misses");
pub(crate) static CACHE_COMMITS: Counter = Counter::new("quill.cache.commits");
pub(crate) static CACHE_EVICTIONS: Counter = Counter::new("quill.cache.evictions");
pub(crate) static CACHE_CORRUPTIONS: Counter = Counter::new("quill.cache.corruptions");

pub(crate) static CHAT_WRITES: Counter = Counter::new("quill.chat.writes");

pub(crate) static FUNCTION_CALLS: Counter = Counter::new("quill.function.calls");
pub(crate) static FUNCTION_ERRORS: Counter = Counter::new("quill.function.errors");
pub(crate) static FUNCTION_DURATION: Moments = Moments::new("quill.function.duration_seconds");

pub(crate) static MARKDOWN_REDRAWS: Counter = Counter::new("quill.render.markdown_redraws");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&VENDOR_REQUESTS);
    collector.register_counter(&VENDOR_REQUEST_ERRORS);
    collector.register_moments(&VENDOR_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_ERRORS);

    collector.register_counter(&CACHE_HITS);
    collector.register_counter(&CACHE_MISSES);
    collector.register_counter(&CACHE_COMMITS);
    collector.register_counter(&CACHE_EVICTIONS);
    collector.register_counter(&CACHE_CORRUPTIONS);

    collector.register_counter(&CHAT_WRITES);

    collector.register_counter(&FUNCTION_CALLS);
    collector.register_counter(&FUNCTION_ERRORS);
    collector.register_moments(&FUNCTION_DURATION);

    collector.register_counter(&MARKDOWN_REDRAWS);
}
