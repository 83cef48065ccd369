/// Burst behaviour of the shared rate limiter under concurrent callers
use recap_engine::rate_limiter::RateLimiter;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

async fn burst(qps: usize, requests: usize) -> Vec<Duration> {
    let limiter = Arc::new(RateLimiter::new(qps));
    let cancel = CancellationToken::new();
    let start = Instant::now();

    let handles: Vec<_> = (0..requests)
        .map(|_| {
            let limiter = Arc::clone(&limiter);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                limiter.admit(&cancel).await.unwrap();
                Instant::now() - start
            })
        })
        .collect();

    let mut admitted = Vec::new();
    for handle in handles {
        admitted.push(handle.await.unwrap());
    }
    admitted.sort();
    admitted
}

#[tokio::test(start_paused = true)]
async fn test_burst_is_spread_over_windows() {
    let (qps, n) = (4, 10);
    let admitted = burst(qps, n).await;

    // The first `qps` requests pass immediately
    assert!(admitted[..qps].iter().all(|d| *d == Duration::ZERO));

    // The Nth is admitted no earlier than ceil((N - Q) / Q) seconds in
    let windows = (n - qps).div_ceil(qps) as u64;
    assert!(admitted[n - 1] >= Duration::from_secs(windows));
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_never_exceeded() {
    let qps = 3;
    let admitted = burst(qps, 12).await;

    for (i, at) in admitted.iter().enumerate() {
        let in_window = admitted[..i]
            .iter()
            .filter(|earlier| *at - **earlier < Duration::from_secs(1))
            .count();
        assert!(in_window < qps, "request {} saw {} admissions in its window", i, in_window);
    }
}
