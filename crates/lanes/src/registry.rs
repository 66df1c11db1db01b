//! Process-wide lane registry and facade
//!
//! One global registry owns every named lane plus the two shared pools.
//! `initialize` creates the built-in "main" and "background" lanes and the
//! static and dynamic pools; everything else here is lookup, posting and
//! switching against that table.
//!
//! A single mutex guards the id and name maps together, so the two are
//! always consistent with each other.

use crate::completion::CompletionHandle;
use crate::current::{self, Slot};
use crate::error::{LaneError, Result};
use crate::lane::{Dispatcher, Lane, LaneId};
use crate::pool::{DynamicPool, StaticPool};
use crate::switch::Switch;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::{Arc, LazyLock};
use std::thread;
use std::time::Duration;

/// Name reserved for the built-in main lane.
pub const MAIN_LANE: &str = "main";
/// Name reserved for the built-in background lane.
pub const BACKGROUND_LANE: &str = "background";

/// Startup configuration for [`initialize_with`].
#[derive(Default)]
pub struct InitOptions {
    /// Host-side execution for the main lane. When set, no worker thread is
    /// spawned for "main"; prepared jobs are handed to this dispatcher.
    pub main_dispatcher: Option<Arc<dyn Dispatcher>>,
    /// Worker count for the static pool. Defaults to twice the logical CPU
    /// count.
    pub static_pool_size: Option<usize>,
    /// Worker cap for the dynamic pool. Defaults to 64.
    pub dynamic_pool_cap: Option<usize>,
    /// Stack size for lane worker threads, built-in and created alike.
    pub lane_stack_size: Option<usize>,
}

/// What kind of target the calling thread is executing on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    Main,
    Background,
    Lane,
    StaticPool,
    DynamicPool,
    /// A thread this runtime does not manage.
    Undefined,
}

/// Lane lookup key, by id or by name.
#[derive(Debug, Clone)]
pub enum LaneKey {
    Id(LaneId),
    Name(String),
}

impl From<LaneId> for LaneKey {
    fn from(id: LaneId) -> Self {
        LaneKey::Id(id)
    }
}

impl From<&str> for LaneKey {
    fn from(name: &str) -> Self {
        LaneKey::Name(name.to_string())
    }
}

impl From<String> for LaneKey {
    fn from(name: String) -> Self {
        LaneKey::Name(name)
    }
}

#[derive(Default)]
struct Inner {
    initialized: bool,
    by_id: FxHashMap<LaneId, Arc<Lane>>,
    by_name: FxHashMap<String, Arc<Lane>>,
    main: Option<LaneId>,
    background: Option<LaneId>,
    static_pool: Option<Arc<StaticPool>>,
    dynamic_pool: Option<Arc<DynamicPool>>,
    lane_stack_size: Option<usize>,
}

impl Inner {
    fn lane(&self, key: &LaneKey) -> Result<Arc<Lane>> {
        if !self.initialized {
            return Err(LaneError::Uninitialized);
        }
        match key {
            LaneKey::Id(id) => self
                .by_id
                .get(id)
                .cloned()
                .ok_or(LaneError::NotFoundId(*id)),
            LaneKey::Name(name) => self
                .by_name
                .get(name)
                .cloned()
                .ok_or_else(|| LaneError::NotFound(name.clone())),
        }
    }

    fn insert(&mut self, lane: Arc<Lane>) {
        self.by_id.insert(lane.id(), lane.clone());
        self.by_name.insert(lane.name().to_string(), lane);
    }
}

static REGISTRY: LazyLock<Mutex<Inner>> = LazyLock::new(|| Mutex::new(Inner::default()));

// ==== Lifecycle ====

/// Initialize with defaults. Idempotent; later calls are no-ops.
pub fn initialize() {
    initialize_with(InitOptions::default());
}

/// Initialize the runtime: built-in "main" and "background" lanes plus the
/// static and dynamic pools. Idempotent; later calls are no-ops and their
/// options are ignored.
pub fn initialize_with(options: InitOptions) {
    let mut inner = REGISTRY.lock();
    if inner.initialized {
        return;
    }

    let main = match options.main_dispatcher {
        Some(dispatcher) => Lane::with_dispatcher(MAIN_LANE, dispatcher),
        None => Lane::with_stack_size(MAIN_LANE, options.lane_stack_size),
    };
    let background = Lane::with_stack_size(BACKGROUND_LANE, options.lane_stack_size);

    inner.main = Some(main.id());
    inner.background = Some(background.id());
    inner.insert(main);
    inner.insert(background);

    let static_size = options
        .static_pool_size
        .unwrap_or_else(|| num_cpus::get() * 2);
    inner.static_pool = Some(StaticPool::new("static-pool", static_size));
    inner.dynamic_pool = Some(DynamicPool::new(
        "dynamic-pool",
        options.dynamic_pool_cap.unwrap_or(64),
    ));
    inner.lane_stack_size = options.lane_stack_size;
    inner.initialized = true;
}

/// Whether [`initialize`] has run.
pub fn is_initialized() -> bool {
    REGISTRY.lock().initialized
}

/// Tear the runtime down: dispose every lane and both pools, then return
/// to the uninitialized state. Queued lane actions and static pool jobs
/// finish; queued dynamic pool jobs are cancelled.
pub fn shutdown() {
    let inner = std::mem::take(&mut *REGISTRY.lock());

    #[cfg(debug_assertions)]
    if inner.initialized {
        eprintln!("Runtime shutting down: {} lanes", inner.by_id.len());
    }

    // All outside the lock: dropping the maps below releases the
    // registry's lane Arcs, and the final Drop of each lane joins its
    // worker thread.
    for lane in inner.by_id.values() {
        lane.dispose();
    }
    drop(inner.by_id);
    drop(inner.by_name);
    if let Some(pool) = inner.static_pool {
        pool.dispose();
    }
    if let Some(pool) = inner.dynamic_pool {
        pool.dispose();
    }
}

// ==== Lane management ====

/// Create and register a new lane with a dedicated worker thread.
pub fn create_lane(name: impl Into<String>) -> Result<Arc<Lane>> {
    register_lane(name.into(), None)
}

/// Create and register a lane without a worker; prepared jobs go to
/// `dispatcher`.
pub fn create_lane_with_dispatcher(
    name: impl Into<String>,
    dispatcher: Arc<dyn Dispatcher>,
) -> Result<Arc<Lane>> {
    register_lane(name.into(), Some(dispatcher))
}

fn register_lane(name: String, dispatcher: Option<Arc<dyn Dispatcher>>) -> Result<Arc<Lane>> {
    let mut inner = REGISTRY.lock();
    if !inner.initialized {
        return Err(LaneError::Uninitialized);
    }
    if inner.by_name.contains_key(&name) {
        return Err(LaneError::AlreadyExists(name));
    }
    let lane = match dispatcher {
        Some(dispatcher) => Lane::with_dispatcher(name, dispatcher),
        None => Lane::with_stack_size(name, inner.lane_stack_size),
    };
    inner.insert(lane.clone());
    Ok(lane)
}

/// Remove a lane from the registry and dispose it. Already queued actions
/// still run before its worker exits. The built-in lanes cannot be removed.
pub fn remove_lane(key: impl Into<LaneKey>) -> Result<()> {
    let key = key.into();
    let lane = {
        let mut inner = REGISTRY.lock();
        let lane = inner.lane(&key)?;
        let id = lane.id();
        if Some(id) == inner.main || Some(id) == inner.background {
            return Err(LaneError::BuiltIn(lane.name().to_string()));
        }
        inner.by_id.remove(&id);
        inner.by_name.remove(lane.name());
        lane
    };
    // Disposal joins the worker; never under the registry lock.
    lane.dispose();
    Ok(())
}

/// Whether a lane is currently registered under `key`.
pub fn contains_lane(key: impl Into<LaneKey>) -> Result<bool> {
    let key = key.into();
    let inner = REGISTRY.lock();
    if !inner.initialized {
        return Err(LaneError::Uninitialized);
    }
    Ok(match &key {
        LaneKey::Id(id) => inner.by_id.contains_key(id),
        LaneKey::Name(name) => inner.by_name.contains_key(name),
    })
}

/// Look up a registered lane.
pub fn lane(key: impl Into<LaneKey>) -> Result<Arc<Lane>> {
    let key = key.into();
    REGISTRY.lock().lane(&key)
}

/// The built-in main lane.
pub fn main_lane() -> Result<Arc<Lane>> {
    lane(MAIN_LANE)
}

/// The built-in background lane.
pub fn background_lane() -> Result<Arc<Lane>> {
    lane(BACKGROUND_LANE)
}

/// The shared static pool.
pub fn static_pool() -> Result<Arc<StaticPool>> {
    REGISTRY.lock().static_pool.clone().ok_or(LaneError::Uninitialized)
}

/// The shared dynamic pool.
pub fn dynamic_pool() -> Result<Arc<DynamicPool>> {
    REGISTRY.lock().dynamic_pool.clone().ok_or(LaneError::Uninitialized)
}

// ==== Current-thread introspection ====

/// Id of the lane the calling thread is executing on, if any.
pub fn current_lane_id() -> Option<LaneId> {
    match current::current() {
        Some(Slot::Lane(id)) => Some(id),
        _ => None,
    }
}

/// Name of the lane the calling thread is executing on, if any and still
/// registered.
pub fn current_lane_name() -> Option<String> {
    let id = current_lane_id()?;
    let inner = REGISTRY.lock();
    inner.by_id.get(&id).map(|lane| lane.name().to_string())
}

/// Classify what the calling thread is executing on.
pub fn current_kind() -> TargetKind {
    let slot = match current::current() {
        Some(slot) => slot,
        None => return TargetKind::Undefined,
    };
    let inner = REGISTRY.lock();
    match slot {
        Slot::Lane(id) => {
            if Some(id) == inner.main {
                TargetKind::Main
            } else if Some(id) == inner.background {
                TargetKind::Background
            } else {
                TargetKind::Lane
            }
        }
        Slot::StaticPool(id) => match &inner.static_pool {
            Some(pool) if pool.id() == id => TargetKind::StaticPool,
            _ => TargetKind::Undefined,
        },
        Slot::DynamicPool(id) => match &inner.dynamic_pool {
            Some(pool) if pool.id() == id => TargetKind::DynamicPool,
            _ => TargetKind::Undefined,
        },
    }
}

/// Whether the calling thread is on the main lane. False when the runtime
/// is not initialized.
pub fn is_main() -> bool {
    current_kind() == TargetKind::Main
}

/// Whether the calling thread is on the background lane.
pub fn is_background() -> bool {
    current_kind() == TargetKind::Background
}

/// Whether the calling thread is a static pool worker.
pub fn is_static_pool() -> bool {
    current_kind() == TargetKind::StaticPool
}

/// Whether the calling thread is a dynamic pool worker.
pub fn is_dynamic_pool() -> bool {
    current_kind() == TargetKind::DynamicPool
}

/// Human-readable description of where the calling thread is executing.
/// Diagnostic only; the format is not stable.
pub fn where_am_i() -> String {
    match current_kind() {
        TargetKind::Main => "main lane".to_string(),
        TargetKind::Background => "background lane".to_string(),
        TargetKind::Lane => match current_lane_name() {
            Some(name) => format!("lane '{name}'"),
            None => "removed lane".to_string(),
        },
        TargetKind::StaticPool => "static pool".to_string(),
        TargetKind::DynamicPool => "dynamic pool".to_string(),
        TargetKind::Undefined => {
            let thread = thread::current();
            format!("unmanaged thread '{}'", thread.name().unwrap_or("?"))
        }
    }
}

// ==== Switching and posting ====

/// Switch handle targeting a registered lane.
pub fn switch_to_lane(key: impl Into<LaneKey>) -> Result<Switch> {
    Ok(Switch::to_lane(lane(key)?))
}

/// Switch handle targeting the main lane.
pub fn switch_to_main() -> Result<Switch> {
    switch_to_lane(MAIN_LANE)
}

/// Switch handle targeting the background lane.
pub fn switch_to_background() -> Result<Switch> {
    switch_to_lane(BACKGROUND_LANE)
}

/// Switch handle targeting the static pool.
pub fn switch_to_static_pool() -> Result<Switch> {
    Ok(Switch::to_static(static_pool()?))
}

/// Switch handle targeting the dynamic pool.
pub fn switch_to_dynamic_pool() -> Result<Switch> {
    Ok(Switch::to_dynamic(dynamic_pool()?))
}

/// Post to a registered lane. Always enqueues, even from the lane itself.
pub fn post_to_lane(
    key: impl Into<LaneKey>,
    action: impl FnOnce() + Send + 'static,
) -> Result<CompletionHandle> {
    lane(key)?.post(action)
}

/// Post to the main lane. Always enqueues.
pub fn post_to_main(action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
    post_to_lane(MAIN_LANE, action)
}

/// Post to the background lane. Always enqueues.
pub fn post_to_background(action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
    post_to_lane(BACKGROUND_LANE, action)
}

/// Queue a job on the static pool.
pub fn post_to_static_pool(action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
    static_pool()?.queue_task(action)
}

/// Queue a job on the dynamic pool.
pub fn post_to_dynamic_pool(action: impl FnOnce() + Send + 'static) -> Result<CompletionHandle> {
    dynamic_pool()?.queue_task(action)
}

// ==== Delayed dispatch ====

/// Switch handle for the calling thread's own target, falling back to the
/// background lane for unmanaged threads or removed lanes.
fn current_or_background() -> Result<Switch> {
    let inner = REGISTRY.lock();
    if !inner.initialized {
        return Err(LaneError::Uninitialized);
    }
    let fallback = |inner: &Inner| -> Result<Switch> {
        let key = LaneKey::Name(BACKGROUND_LANE.to_string());
        Ok(Switch::to_lane(inner.lane(&key)?))
    };
    match current::current() {
        Some(Slot::Lane(id)) => match inner.by_id.get(&id) {
            Some(lane) => Ok(Switch::to_lane(lane.clone())),
            None => fallback(&inner),
        },
        Some(Slot::StaticPool(id)) => match &inner.static_pool {
            Some(pool) if pool.id() == id => Ok(Switch::to_static(pool.clone())),
            _ => fallback(&inner),
        },
        Some(Slot::DynamicPool(id)) => match &inner.dynamic_pool {
            Some(pool) if pool.id() == id => Ok(Switch::to_dynamic(pool.clone())),
            _ => fallback(&inner),
        },
        None => fallback(&inner),
    }
}

/// Run `action` after `duration`, back on the calling thread's current
/// target. Called from an unmanaged thread, the action runs on the
/// background lane.
pub fn delay(
    duration: Duration,
    action: impl FnOnce() + Send + 'static,
) -> Result<CompletionHandle> {
    Ok(current_or_background()?.dispatch_after(duration, action))
}

// Shutdown and uninitialized-state behavior are covered in dedicated
// integration test binaries; every test here shares the one registry.
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn test_initialize_is_idempotent() {
        initialize();
        initialize_with(InitOptions {
            static_pool_size: Some(1),
            ..Default::default()
        });
        assert!(is_initialized());

        // The second call's options were ignored.
        let pool = static_pool().unwrap();
        assert_eq!(pool.max_concurrency(), num_cpus::get() * 2);
    }

    #[test]
    fn test_create_lookup_remove_lane() {
        initialize();
        let lane = create_lane("reg-worker").unwrap();

        assert!(contains_lane("reg-worker").unwrap());
        assert!(contains_lane(lane.id()).unwrap());
        assert_eq!(super::lane("reg-worker").unwrap().id(), lane.id());

        remove_lane("reg-worker").unwrap();
        assert!(!contains_lane("reg-worker").unwrap());
        assert!(matches!(
            super::lane(lane.id()),
            Err(LaneError::NotFoundId(_))
        ));
    }

    #[test]
    fn test_duplicate_lane_name_rejected() {
        initialize();
        let _lane = create_lane("reg-dup").unwrap();
        assert!(matches!(
            create_lane("reg-dup"),
            Err(LaneError::AlreadyExists(_))
        ));
        remove_lane("reg-dup").unwrap();
    }

    #[test]
    fn test_dispatcher_lane_via_registry() {
        struct Inline;
        impl Dispatcher for Inline {
            fn dispatch(&self, job: crate::lane::Job) {
                job();
            }
        }

        initialize();
        let lane = create_lane_with_dispatcher("reg-host", Arc::new(Inline)).unwrap();

        let handle = lane
            .post(|| assert_eq!(current_lane_name().as_deref(), Some("reg-host")))
            .unwrap();
        // The inline dispatcher ran the job during post.
        assert!(handle.outcome().is_some_and(|o| o.is_completed()));

        remove_lane("reg-host").unwrap();
    }

    #[test]
    fn test_builtin_lanes_cannot_be_removed() {
        initialize();
        assert!(matches!(remove_lane(MAIN_LANE), Err(LaneError::BuiltIn(_))));
        assert!(matches!(
            remove_lane(BACKGROUND_LANE),
            Err(LaneError::BuiltIn(_))
        ));
    }

    #[test]
    fn test_posted_actions_know_where_they_are() {
        initialize();

        post_to_main(|| {
            assert!(is_main());
            assert!(!is_background());
            assert_eq!(current_kind(), TargetKind::Main);
            assert_eq!(where_am_i(), "main lane");
        })
        .unwrap()
        .wait();

        post_to_background(|| {
            assert!(is_background());
            assert_eq!(current_lane_name().as_deref(), Some(BACKGROUND_LANE));
        })
        .unwrap()
        .wait();

        post_to_static_pool(|| {
            assert!(is_static_pool());
            assert_eq!(current_kind(), TargetKind::StaticPool);
            assert_eq!(current_lane_id(), None);
        })
        .unwrap()
        .wait();

        post_to_dynamic_pool(|| assert!(is_dynamic_pool()))
            .unwrap()
            .wait();

        assert_eq!(current_kind(), TargetKind::Undefined);
    }

    #[test]
    fn test_switch_roundtrip_between_lanes() {
        initialize();
        let lane = create_lane("reg-switch").unwrap();

        let to_lane = switch_to_lane("reg-switch").unwrap();
        let handle = to_lane
            .dispatch(|| {
                assert_eq!(current_lane_name().as_deref(), Some("reg-switch"));
                let back = switch_to_background().unwrap();
                assert!(!back.is_on_target());
                back.dispatch(|| assert!(is_background())).unwrap().wait();
            })
            .unwrap();
        assert!(handle.wait().is_completed());

        remove_lane(lane.id()).unwrap();
    }

    #[test]
    fn test_delay_runs_on_background_for_unmanaged_thread() {
        initialize();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let start = Instant::now();
        let handle = delay(Duration::from_millis(30), move || {
            assert!(is_background());
            flag.store(true, Ordering::SeqCst);
        })
        .unwrap();

        assert!(handle.wait().is_completed());
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_delay_returns_to_originating_lane() {
        initialize();
        let lane = create_lane("reg-delay").unwrap();

        let slot: Arc<Mutex<Option<CompletionHandle>>> = Arc::new(Mutex::new(None));
        let out = slot.clone();
        let outer = lane
            .post(move || {
                // Not waited on here; the delayed action needs this worker.
                let handle = delay(Duration::from_millis(20), || {
                    assert_eq!(current_lane_name().as_deref(), Some("reg-delay"));
                })
                .unwrap();
                *out.lock() = Some(handle);
            })
            .unwrap();
        assert!(outer.wait().is_completed());

        let delayed = slot.lock().take().unwrap();
        assert!(delayed.wait().is_completed());
        remove_lane("reg-delay").unwrap();
    }
}
