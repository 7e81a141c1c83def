//! Prometheus collectors and per-request stage timing.
//!
//! Collectors are registered once with the default registry. Each
//! request carries a [`StageTimer`] in its extensions; stages feed both
//! the duration histograms and a `Server-Timing` response header.

use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge, HistogramVec,
    IntCounterVec, IntGauge,
};

fn http_requests_total() -> &'static IntCounterVec {
    static METRIC: OnceLock<IntCounterVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_counter_vec!(
            "trellis_http_requests_total",
            "Total HTTP requests.",
            &["method", "route", "status"]
        )
        .expect("metric registration is infallible at startup")
    })
}

fn http_request_duration() -> &'static HistogramVec {
    static METRIC: OnceLock<HistogramVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_histogram_vec!(
            "trellis_http_request_duration_seconds",
            "HTTP request duration.",
            &["method", "route", "status"]
        )
        .expect("metric registration is infallible at startup")
    })
}

fn stage_duration() -> &'static HistogramVec {
    static METRIC: OnceLock<HistogramVec> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_histogram_vec!(
            "trellis_request_stage_duration_seconds",
            "Per-stage request durations (acl, read, tok, pack, app).",
            &["stage"]
        )
        .expect("metric registration is infallible at startup")
    })
}

/// Live WebSocket subscriber count.
pub fn ws_active() -> &'static IntGauge {
    static METRIC: OnceLock<IntGauge> = OnceLock::new();
    METRIC.get_or_init(|| {
        register_int_gauge!(
            "trellis_ws_active_subscriptions",
            "Open WebSocket subscriptions."
        )
        .expect("metric registration is infallible at startup")
    })
}

/// Record one finished request.
pub fn observe_request(method: &str, route: &str, status: u16, duration: Duration) {
    let status = status.to_string();
    http_requests_total()
        .with_label_values(&[method, route, &status])
        .inc();
    http_request_duration()
        .with_label_values(&[method, route, &status])
        .observe(duration.as_secs_f64());
}

/// Render the default registry in text exposition format.
pub fn render() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut out = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut out).is_err() {
        return String::new();
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Accumulates named stage durations for one request.
///
/// Attached to the request extensions; not shared across requests.
#[derive(Debug, Default)]
pub struct StageTimer {
    stages: Mutex<Vec<(&'static str, Duration)>>,
}

impl StageTimer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, stage: &'static str, duration: Duration) {
        stage_duration()
            .with_label_values(&[stage])
            .observe(duration.as_secs_f64());
        if let Ok(mut stages) = self.stages.lock() {
            stages.push((stage, duration));
        }
    }

    /// Time a closure-free async block via an explicit guard.
    pub fn start(&self, stage: &'static str) -> StageGuard<'_> {
        StageGuard {
            timer: self,
            stage,
            started: Instant::now(),
        }
    }

    /// `Server-Timing` header value, e.g. `acl;dur=1.2, read;dur=8.0`
    /// (durations in milliseconds).
    pub fn server_timing_header(&self) -> String {
        let stages = match self.stages.lock() {
            Ok(stages) => stages,
            Err(_) => return String::new(),
        };
        stages
            .iter()
            .map(|(stage, duration)| {
                format!("{stage};dur={:.1}", duration.as_secs_f64() * 1000.0)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Records the elapsed stage time when dropped.
pub struct StageGuard<'a> {
    timer: &'a StageTimer,
    stage: &'static str,
    started: Instant,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.timer.record(self.stage, self.started.elapsed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_timer_accumulates_and_formats() {
        let timer = StageTimer::new();
        timer.record("acl", Duration::from_millis(2));
        {
            let _guard = timer.start("read");
        }
        let header = timer.server_timing_header();
        assert!(header.starts_with("acl;dur=2.0"));
        assert!(header.contains("read;dur="));
    }

    #[test]
    fn render_includes_registered_metrics() {
        observe_request("GET", "/metadata/{path}", 200, Duration::from_millis(1));
        let text = render();
        assert!(text.contains("trellis_http_requests_total"));
    }
}
