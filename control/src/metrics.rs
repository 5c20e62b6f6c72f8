use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use serde_json::{Value, json};

/// In-process request metrics: rolling latency window plus counters. This is
/// the source behind `/api/monitoring/stats`; the Prometheus layer in
/// armada-common covers external scraping separately.
pub struct RequestMetrics {
    started_at: Instant,
    window_size: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    total: u64,
    status_counts: HashMap<u16, u64>,
    by_route: HashMap<(String, String), u64>,
    latencies_ms: VecDeque<f64>,
}

impl RequestMetrics {
    pub fn new(window_size: usize) -> Arc<Self> {
        Arc::new(Self {
            started_at: Instant::now(),
            window_size,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn observe(&self, method: &str, path: &str, status: u16, duration_ms: f64) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.total += 1;
        *inner.status_counts.entry(status).or_default() += 1;
        *inner
            .by_route
            .entry((method.to_uppercase(), path.to_string()))
            .or_default() += 1;
        if inner.latencies_ms.len() >= self.window_size {
            inner.latencies_ms.pop_front();
        }
        inner.latencies_ms.push_back(duration_ms);
    }

    pub fn snapshot(&self) -> Value {
        let (total, status_counts, top_routes, latencies) = {
            let inner = self.inner.lock().expect("metrics lock poisoned");
            let mut routes: Vec<_> = inner
                .by_route
                .iter()
                .map(|((method, path), count)| (format!("{} {}", method, path), *count))
                .collect();
            routes.sort_by(|a, b| b.1.cmp(&a.1));
            routes.truncate(50);
            (
                inner.total,
                inner
                    .status_counts
                    .iter()
                    .map(|(code, count)| (code.to_string(), *count))
                    .collect::<HashMap<_, _>>(),
                routes.into_iter().collect::<HashMap<_, _>>(),
                inner.latencies_ms.iter().copied().collect::<Vec<_>>(),
            )
        };

        let summary = summarize_latencies(&latencies);
        json!({
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "total_requests": total,
            "status_counts": status_counts,
            "top_routes": top_routes,
            "latency_ms": summary,
        })
    }
}

fn summarize_latencies(latencies: &[f64]) -> Value {
    if latencies.is_empty() {
        return json!({"count": 0, "avg": 0.0, "p95": 0.0, "max": 0.0});
    }
    let mut sorted = latencies.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let count = sorted.len();
    let avg = sorted.iter().sum::<f64>() / count as f64;
    let p95_idx = ((count as f64 * 0.95) as usize)
        .saturating_sub(1)
        .min(count - 1);
    json!({
        "count": count,
        "avg": (avg * 100.0).round() / 100.0,
        "p95": (sorted[p95_idx] * 100.0).round() / 100.0,
        "max": (sorted[count - 1] * 100.0).round() / 100.0,
    })
}

/// Axum middleware observing every request. Uses `MatchedPath` so route
/// templates, not raw URLs, key the counters.
pub async fn observe_requests(
    State(metrics): State<Arc<RequestMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().as_str().to_owned();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let start = Instant::now();
    let response = next.run(req).await;
    metrics.observe(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64() * 1000.0,
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_summarizes_latencies() {
        let metrics = RequestMetrics::new(100);
        for i in 1..=100 {
            metrics.observe("get", "/api/pods", 200, i as f64);
        }
        metrics.observe("POST", "/api/pods", 503, 5.0);

        let snap = metrics.snapshot();
        assert_eq!(snap["total_requests"], 101);
        assert_eq!(snap["status_counts"]["200"], 100);
        assert_eq!(snap["status_counts"]["503"], 1);
        assert_eq!(snap["latency_ms"]["count"], 100);
        assert_eq!(snap["latency_ms"]["max"], 100.0);
        // p95 over the retained window of 2..=100 plus the 5ms outlier.
        let p95 = snap["latency_ms"]["p95"].as_f64().unwrap();
        assert!((90.0..=100.0).contains(&p95), "p95 was {}", p95);
    }

    #[test]
    fn window_is_bounded() {
        let metrics = RequestMetrics::new(10);
        for i in 0..50 {
            metrics.observe("GET", "/x", 200, i as f64);
        }
        let snap = metrics.snapshot();
        assert_eq!(snap["latency_ms"]["count"], 10);
        assert_eq!(snap["total_requests"], 50);
    }

    #[test]
    fn routes_are_keyed_by_uppercased_method() {
        let metrics = RequestMetrics::new(10);
        metrics.observe("get", "/api/nodes", 200, 1.0);
        metrics.observe("GET", "/api/nodes", 200, 1.0);
        let snap = metrics.snapshot();
        assert_eq!(snap["top_routes"]["GET /api/nodes"], 2);
    }
}
