//! Route optimisation over a shared cache: debounces bursts of
//! identical requests, coalesces concurrent callers onto a single
//! upstream computation, retries with capped backoff and degrades to a
//! straight-line estimate when the routing service is unreachable.
//!
//! The optimizer is shared process-wide: the cache and pending-request
//! registry are keyed by route, not by session, so every tracking
//! session funnels through the same instance.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ::geo::Point;
use log::{debug, warn};
use scc::hash_map::Entry;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::Result;
use crate::geo::{eta_seconds, haversine_distance, validate_coordinate};
use crate::routing::{Profile, RouteResult, RouteSource};

pub(crate) mod cache;

#[cfg(test)]
mod test;

use cache::{route_key, CacheEntry, RouteCache};

/// Who the route is computed for; part of the cache key so delivery and
/// customer views never share entries.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum TravelContext {
    #[default]
    Delivery,
    Customer,
}

impl TravelContext {
    /// Both contexts currently route by road vehicle.
    pub fn profile(&self) -> Profile {
        Profile::Driving
    }
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizerConfig {
    /// Quiet period collapsing bursts of identical requests.
    pub debounce: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Upper bound on any single backoff pause.
    pub retry_max_delay: Duration,
    pub cache_ttl: Duration,
    /// Endpoint movement beyond this invalidates a cached route even
    /// inside the TTL.
    pub displacement_threshold_meters: f64,
    /// Assumed speed for the straight-line fallback ETA.
    pub fallback_speed_kmh: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            debounce: Duration::from_millis(2000),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_millis(5000),
            cache_ttl: Duration::from_millis(300_000),
            displacement_threshold_meters: 50.0,
            fallback_speed_kmh: 25.0,
        }
    }
}

/// Backoff pause before the attempt following `attempt`: doubling from
/// the base, capped. The schedule is non-decreasing.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    base.checked_mul(factor).map_or(cap, |delay| delay.min(cap))
}

/// One in-flight computation per cache key. Waiters subscribe to `tx`;
/// joiners re-arm `deadline` until `fired` flips, after which the fetch
/// runs to completion and cannot be restarted.
#[derive(Debug)]
struct Pending {
    tx: watch::Sender<Option<Arc<RouteResult>>>,
    deadline: Mutex<Instant>,
    fired: AtomicBool,
}

#[derive(Debug)]
struct Inner<S: RouteSource> {
    source: Arc<S>,
    config: OptimizerConfig,
    cache: RouteCache,
    pending: scc::HashMap<String, Arc<Pending>>,
}

/// Shared route optimizer. Cheap to clone; all clones observe the same
/// cache and pending-request registry.
#[derive(Debug)]
pub struct RouteOptimizer<S: RouteSource> {
    inner: Arc<Inner<S>>,
}

impl<S: RouteSource> Clone for RouteOptimizer<S> {
    fn clone(&self) -> Self {
        RouteOptimizer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RouteSource> RouteOptimizer<S> {
    pub fn new(source: Arc<S>) -> Self {
        Self::with_config(source, OptimizerConfig::default())
    }

    pub fn with_config(source: Arc<S>, config: OptimizerConfig) -> Self {
        RouteOptimizer {
            inner: Arc::new(Inner {
                source,
                cache: RouteCache::new(config.cache_ttl, config.displacement_threshold_meters),
                config,
                pending: scc::HashMap::new(),
            }),
        }
    }

    /// Resolves a route for `(start, end, context)`, from cache when
    /// possible. Resolves exactly once per call with a road route, a
    /// cached route or a straight-line fallback; the only error is
    /// invalid input, rejected before any network activity.
    pub async fn route(
        &self,
        start: Point<f64>,
        end: Point<f64>,
        context: TravelContext,
    ) -> Result<Arc<RouteResult>> {
        validate_coordinate(start.y(), start.x())?;
        validate_coordinate(end.y(), end.x())?;

        let key = route_key(&start, &end, context);

        if let Some(route) = self.inner.cache.get(&key, &start, &end) {
            debug!("route cache hit for {}", key);
            return Ok(route);
        }

        let mut rx = self.join_or_spawn(key, start, end, context);

        // The channel retains the published value, so inspect it before
        // waiting: a late joiner may arrive after completion.
        loop {
            if let Some(route) = rx.borrow_and_update().clone() {
                return Ok(route);
            }

            if rx.changed().await.is_err() {
                warn!("route computation dropped before publishing; serving fallback");
                return Ok(Arc::new(self.inner.straight_line(&start, &end)));
            }
        }
    }

    /// Joins the pending computation for `key`, or registers a new one
    /// and spawns its driver task.
    fn join_or_spawn(
        &self,
        key: String,
        start: Point<f64>,
        end: Point<f64>,
        context: TravelContext,
    ) -> watch::Receiver<Option<Arc<RouteResult>>> {
        match self.inner.pending.entry(key.clone()) {
            Entry::Occupied(occupied) => {
                let pending = Arc::clone(occupied.get());
                drop(occupied);

                // Restarting the quiet period only cancels the delay; a
                // fetch that has begun runs to completion.
                if !pending.fired.load(Ordering::SeqCst) {
                    let mut deadline = pending
                        .deadline
                        .lock()
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                    *deadline = Instant::now() + self.inner.config.debounce;
                }

                pending.tx.subscribe()
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let pending = Arc::new(Pending {
                    tx,
                    deadline: Mutex::new(Instant::now() + self.inner.config.debounce),
                    fired: AtomicBool::new(false),
                });

                vacant.insert_entry(Arc::clone(&pending));
                tokio::spawn(Inner::drive(
                    Arc::clone(&self.inner),
                    key,
                    start,
                    end,
                    context,
                    pending,
                ));

                rx
            }
        }
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }
}

impl<S: RouteSource> Inner<S> {
    /// Single-flight driver for one cache key: waits out the debounce
    /// window (re-armed by joiners), fetches with retry, caches the
    /// outcome and publishes it to every waiter.
    async fn drive(
        self: Arc<Self>,
        key: String,
        start: Point<f64>,
        end: Point<f64>,
        context: TravelContext,
        pending: Arc<Pending>,
    ) {
        loop {
            let deadline = *pending
                .deadline
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());

            if Instant::now() >= deadline {
                break;
            }

            tokio::time::sleep_until(deadline).await;
        }

        pending.fired.store(true, Ordering::SeqCst);

        let route = match self.fetch_with_retry(&start, &end, context).await {
            Some(route) => route,
            None => {
                debug!("routing exhausted for {}; using straight-line fallback", key);
                self.straight_line(&start, &end)
            }
        };

        let route = Arc::new(route);
        self.cache.insert(
            key.clone(),
            CacheEntry {
                route: Arc::clone(&route),
                written: Instant::now(),
                start,
                end,
            },
        );

        // Unregister before publishing so a caller racing the broadcast
        // starts a fresh computation instead of joining a finished one.
        self.pending.remove(&key);
        let _ = pending.tx.send(Some(route));
    }

    async fn fetch_with_retry(
        &self,
        start: &Point<f64>,
        end: &Point<f64>,
        context: TravelContext,
    ) -> Option<RouteResult> {
        let retries = self.config.max_retries;

        for attempt in 1..=retries {
            if let Some(route) = self.source.route(*start, *end, context.profile()).await {
                return Some(route);
            }

            warn!("routing attempt {}/{} failed ({})", attempt, retries, context);

            if attempt < retries {
                let pause = backoff_delay(
                    attempt,
                    self.config.retry_base_delay,
                    self.config.retry_max_delay,
                );
                tokio::time::sleep(pause).await;
            }
        }

        None
    }

    /// Deterministic two-point fallback: haversine distance, duration at
    /// the configured assumed speed.
    fn straight_line(&self, start: &Point<f64>, end: &Point<f64>) -> RouteResult {
        let distance = haversine_distance(start, end);

        RouteResult {
            coordinates: vec![(*start).into(), (*end).into()],
            distance_meters: distance,
            duration_seconds: eta_seconds(distance, self.config.fallback_speed_kmh),
        }
    }
}
