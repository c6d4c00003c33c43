// ── Allowed-plans cache ──
//
// Load-once cache of the plans the server accepts. The fetch runs on a
// background task; the map itself is only ever replaced on the event
// loop. A compare-and-set on `loading` keeps concurrent callers down to a
// single fetch, and the epoch discards fetches that outlive a `reset`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use qserver_api::{PlansAllowedResponse, PlansMap, RunEngineService};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::event_loop::EventLoop;
use crate::lifecycle::Resettable;
use crate::observable::Observable;
use crate::scheduler::PollCenter;

/// Shared cache of allowed plans.
#[derive(Clone)]
pub struct PlansCache {
    inner: Arc<PlansCacheInner>,
}

struct PlansCacheInner {
    service: Arc<dyn RunEngineService>,
    event_loop: EventLoop,
    poll_center: PollCenter,
    plans: Observable<Arc<PlansMap>>,
    loaded: AtomicBool,
    loading: AtomicBool,
    epoch: AtomicU64,
}

impl PlansCache {
    pub fn new(service: Arc<dyn RunEngineService>, event_loop: EventLoop, poll_center: PollCenter) -> Self {
        Self {
            inner: Arc::new(PlansCacheInner {
                service,
                event_loop,
                poll_center,
                plans: Observable::new(Arc::new(PlansMap::new())),
                loaded: AtomicBool::new(false),
                loading: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
            }),
        }
    }

    /// The observable plans map. Empty until the first successful load.
    pub fn plans(&self) -> &Observable<Arc<PlansMap>> {
        &self.inner.plans
    }

    pub fn get(&self) -> Arc<PlansMap> {
        self.inner.plans.get()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::SeqCst)
    }

    /// Start a background fetch unless the plans are loaded or a fetch is
    /// already in flight.
    pub fn load_if_needed(&self) {
        let inner = &self.inner;
        if inner.loaded.load(Ordering::SeqCst) {
            return;
        }
        if inner
            .loading
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("plans load already in flight");
            return;
        }
        // A load may have finished between the two checks.
        if inner.loaded.load(Ordering::SeqCst) {
            inner.loading.store(false, Ordering::SeqCst);
            return;
        }

        let epoch = inner.epoch.load(Ordering::SeqCst);
        let task_inner = Arc::clone(inner);
        debug!(epoch, "loading allowed plans");
        let _task = inner.poll_center.submit(move || async move {
            let result = fetch_plans(task_inner.service.as_ref()).await;
            let publisher = Arc::clone(&task_inner);
            task_inner
                .event_loop
                .run_later(move || publisher.finish_load(epoch, result));
        });
    }

    /// Drop the loaded flag and fetch again.
    pub fn reload(&self) {
        self.inner.loaded.store(false, Ordering::SeqCst);
        self.load_if_needed();
    }

    /// Detach listeners, clear the map, and forget any fetch in flight.
    pub fn reset(&self) {
        let inner = &self.inner;
        let detached = inner.plans.clear_listeners();
        inner.epoch.fetch_add(1, Ordering::SeqCst);
        inner.loaded.store(false, Ordering::SeqCst);
        inner.loading.store(false, Ordering::SeqCst);

        let cleared = Arc::clone(inner);
        inner.event_loop.run_or_defer(move || {
            cleared.plans.set(Arc::new(PlansMap::new()));
        });
        debug!(detached, "plans cache reset");
    }
}

impl PlansCacheInner {
    fn finish_load(&self, epoch: u64, result: Result<PlansMap, CoreError>) {
        if epoch != self.epoch.load(Ordering::SeqCst) {
            debug!(epoch, "discarding plans fetched before reset");
            return;
        }

        match result {
            Ok(plans) => {
                info!(count = plans.len(), "allowed plans loaded");
                self.plans.set(Arc::new(plans));
                self.loaded.store(true, Ordering::SeqCst);
            }
            Err(e) => warn!(error = %e, "failed to load allowed plans"),
        }
        self.loading.store(false, Ordering::SeqCst);
    }
}

async fn fetch_plans(service: &dyn RunEngineService) -> Result<PlansMap, CoreError> {
    let raw = service.plans_allowed_raw().await?;
    let plans = PlansAllowedResponse::from_raw(raw)?.into_plans()?;
    Ok(plans)
}

impl Resettable for PlansCache {
    fn name(&self) -> &str {
        "plans cache"
    }

    fn reset(&self) -> Result<(), CoreError> {
        PlansCache::reset(self);
        Ok(())
    }
}
