use std::time::Duration;

use tracing::{Span, field};

use super::TraceId;

/// Root span for one trading cycle. `state` is recorded as the cycle advances.
pub fn cycle_span(name: &'static str, trace_id: &TraceId, symbol: &str) -> Span {
    tracing::info_span!(
        "cycle",
        name = %name,
        trace_id = %trace_id,
        symbol = %symbol,
        state = field::Empty
    )
}

/// Child span; inherits trace_id from the enclosing cycle span.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!("step", name = %name)
}

/// Awaits `fut` and warns under the `performance` target when it ran longer than `max`.
pub async fn warn_if_slow<F, T>(label: &'static str, max: Duration, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = std::time::Instant::now();
    let out = fut.await;
    let elapsed = start.elapsed();
    if elapsed > max {
        tracing::warn!(
            target: "performance",
            label = label,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow operation detected"
        );
    }
    out
}
