use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ::geo::{coord, Point};
use tokio::time::Instant;

use super::cache::{route_key, CacheEntry, RouteCache};
use super::*;
use crate::geo::haversine_distance;
use crate::routing::{Profile, RoutePoint, RouteResult, RouteSource};

const ROAD_DISTANCE: f64 = 1234.5;

/// Scripted upstream: fails the first `failures` route calls, then
/// succeeds, counting every attempt.
struct ScriptedSource {
    calls: AtomicUsize,
    failures: usize,
}

impl ScriptedSource {
    fn reliable() -> Arc<Self> {
        Arc::new(ScriptedSource {
            calls: AtomicUsize::new(0),
            failures: 0,
        })
    }

    fn failing(failures: usize) -> Arc<Self> {
        Arc::new(ScriptedSource {
            calls: AtomicUsize::new(0),
            failures,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl RouteSource for ScriptedSource {
    async fn route(
        &self,
        start: Point<f64>,
        end: Point<f64>,
        _profile: Profile,
    ) -> Option<RouteResult> {
        let attempt = self.calls.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return None;
        }

        Some(RouteResult {
            coordinates: vec![
                start.into(),
                RoutePoint {
                    lat: (start.y() + end.y()) / 2.0,
                    lng: (start.x() + end.x()) / 2.0,
                },
                end.into(),
            ],
            distance_meters: ROAD_DISTANCE,
            duration_seconds: 98.0,
        })
    }

    async fn snap(&self, _: Point<f64>, _: f64) -> Option<Point<f64>> {
        None
    }
}

fn pickup() -> Point<f64> {
    Point(coord! { x: 151.2093, y: -33.8688 })
}

fn dropoff() -> Point<f64> {
    Point(coord! { x: 151.1957, y: -33.8523 })
}

#[tokio::test(start_paused = true)]
async fn burst_within_debounce_window_reaches_upstream_once() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let first = tokio::spawn({
        let optimizer = optimizer.clone();
        async move { optimizer.route(pickup(), dropoff(), TravelContext::Delivery).await }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;

    let second = tokio::spawn({
        let optimizer = optimizer.clone();
        async move { optimizer.route(pickup(), dropoff(), TravelContext::Delivery).await }
    });

    let first = first.await.expect("task").expect("route");
    let second = second.await.expect("task").expect("route");

    assert_eq!(source.calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_computation() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let mut handles = Vec::new();
    for _ in 0..5 {
        handles.push(tokio::spawn({
            let optimizer = optimizer.clone();
            async move { optimizer.route(pickup(), dropoff(), TravelContext::Delivery).await }
        }));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.expect("task").expect("route"));
    }

    assert_eq!(source.calls(), 1);
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
}

#[tokio::test(start_paused = true)]
async fn completed_route_is_served_from_cache() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let first = optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");

    let second = optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");

    assert_eq!(source.calls(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(optimizer.cache_len(), 1);
    assert_eq!(optimizer.inner.pending.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn expired_cache_entry_triggers_a_fresh_fetch() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");
    assert_eq!(source.calls(), 1);

    // Six minutes against the five minute TTL.
    tokio::time::advance(Duration::from_secs(360)).await;

    optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn contexts_do_not_share_cache_entries() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");
    optimizer
        .route(pickup(), dropoff(), TravelContext::Customer)
        .await
        .expect("route");

    assert_eq!(source.calls(), 2);
    assert_eq!(optimizer.cache_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn displaced_endpoint_evicts_the_entry_inside_the_ttl() {
    let cache = RouteCache::new(Duration::from_secs(300), 50.0);
    let key = route_key(&pickup(), &dropoff(), TravelContext::Delivery);

    let route = Arc::new(RouteResult {
        coordinates: vec![pickup().into(), dropoff().into()],
        distance_meters: ROAD_DISTANCE,
        duration_seconds: 98.0,
    });

    cache.insert(
        key.clone(),
        CacheEntry {
            route: Arc::clone(&route),
            written: Instant::now(),
            start: pickup(),
            end: dropoff(),
        },
    );

    // Unmoved endpoints inside the TTL: served.
    assert!(cache.get(&key, &pickup(), &dropoff()).is_some());

    // Start displaced ~111m north, threshold is 50m: evicted.
    let displaced = Point(coord! { x: pickup().x(), y: pickup().y() + 0.001 });
    assert!(cache.get(&key, &displaced, &dropoff()).is_none());
    assert_eq!(cache.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn eviction_spares_an_entry_rewritten_after_the_stale_read() {
    let cache = RouteCache::new(Duration::from_secs(300), 50.0);
    let key = route_key(&pickup(), &dropoff(), TravelContext::Delivery);
    let route = Arc::new(RouteResult {
        coordinates: vec![pickup().into(), dropoff().into()],
        distance_meters: ROAD_DISTANCE,
        duration_seconds: 98.0,
    });

    let observed = Instant::now();
    cache.insert(
        key.clone(),
        CacheEntry {
            route: Arc::clone(&route),
            written: observed,
            start: pickup(),
            end: dropoff(),
        },
    );

    // Another writer replaces the entry between a reader observing it as
    // stale and that reader's eviction landing.
    tokio::time::advance(Duration::from_millis(1)).await;
    let rewritten = Instant::now();
    cache.insert(
        key.clone(),
        CacheEntry {
            route,
            written: rewritten,
            start: pickup(),
            end: dropoff(),
        },
    );

    // The late eviction carries the pre-rewrite instant: it must miss.
    cache.evict_if_unchanged(&key, observed);
    assert!(cache.get(&key, &pickup(), &dropoff()).is_some());

    // Carrying the live instant, it lands.
    cache.evict_if_unchanged(&key, rewritten);
    assert_eq!(cache.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn sweep_on_write_drops_expired_entries_for_other_keys() {
    let cache = RouteCache::new(Duration::from_secs(300), 50.0);
    let route = Arc::new(RouteResult {
        coordinates: vec![],
        distance_meters: 0.0,
        duration_seconds: 0.0,
    });

    cache.insert(
        "stale".into(),
        CacheEntry {
            route: Arc::clone(&route),
            written: Instant::now(),
            start: pickup(),
            end: dropoff(),
        },
    );

    tokio::time::advance(Duration::from_secs(301)).await;

    cache.insert(
        "fresh".into(),
        CacheEntry {
            route,
            written: Instant::now(),
            start: pickup(),
            end: dropoff(),
        },
    );

    assert_eq!(cache.len(), 1);
    assert!(cache.get("fresh", &pickup(), &dropoff()).is_some());
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_fall_back_to_a_straight_line() {
    let source = ScriptedSource::failing(usize::MAX);
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let route = optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("fallback should still resolve");

    assert_eq!(source.calls(), 3);
    assert_eq!(route.distance_meters, haversine_distance(&pickup(), &dropoff()));
    assert_eq!(
        route.coordinates,
        vec![RoutePoint::from(pickup()), RoutePoint::from(dropoff())]
    );

    // The fallback is cached like any other result.
    assert_eq!(optimizer.cache_len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_before_exhaustion() {
    let source = ScriptedSource::failing(2);
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let route = optimizer
        .route(pickup(), dropoff(), TravelContext::Delivery)
        .await
        .expect("route");

    // Failed twice, succeeded on the third and final attempt: the road
    // route wins, not the fallback.
    assert_eq!(source.calls(), 3);
    assert_eq!(route.distance_meters, ROAD_DISTANCE);
    assert_eq!(route.coordinates.len(), 3);
}

#[tokio::test]
async fn invalid_coordinates_are_rejected_before_any_network_activity() {
    let source = ScriptedSource::reliable();
    let optimizer = RouteOptimizer::new(Arc::clone(&source));

    let nan = Point(coord! { x: f64::NAN, y: 0.0 });
    assert!(optimizer
        .route(nan, dropoff(), TravelContext::Delivery)
        .await
        .is_err());

    let out_of_range = Point(coord! { x: 0.0, y: 120.0 });
    assert!(optimizer
        .route(pickup(), out_of_range, TravelContext::Delivery)
        .await
        .is_err());

    assert_eq!(source.calls(), 0);
    assert_eq!(optimizer.inner.pending.len(), 0);
}

#[test]
fn backoff_schedule_is_non_decreasing_and_capped() {
    let base = Duration::from_millis(1000);
    let cap = Duration::from_millis(5000);

    let delays: Vec<Duration> = (1..=6)
        .map(|attempt| backoff_delay(attempt, base, cap))
        .collect();

    assert_eq!(delays[0], Duration::from_millis(1000));
    assert_eq!(delays[1], Duration::from_millis(2000));
    assert_eq!(delays[2], Duration::from_millis(4000));
    assert_eq!(delays[3], Duration::from_millis(5000));

    for pair in delays.windows(2) {
        assert!(pair[0] <= pair[1]);
    }
    assert!(delays.iter().all(|delay| *delay <= cap));
}

#[test]
fn route_keys_round_onto_the_grid() {
    let a = Point(coord! { x: 151.20931, y: -33.86881 });
    let b = Point(coord! { x: 151.20929, y: -33.86879 });

    // Within the ~11m rounding cell: identical keys.
    assert_eq!(
        route_key(&a, &dropoff(), TravelContext::Delivery),
        route_key(&b, &dropoff(), TravelContext::Delivery)
    );

    // Same coordinates, different context: distinct keys.
    assert_ne!(
        route_key(&a, &dropoff(), TravelContext::Delivery),
        route_key(&a, &dropoff(), TravelContext::Customer)
    );
}
