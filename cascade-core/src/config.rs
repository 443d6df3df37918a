//! Runtime Configuration
//!
//! Settings that apply to every node on the current thread:
//!
//! - debug mode (capture node creation sites, append them to errors)
//! - the equality override consulted by the dedup gates
//! - the scheduler used for end-of-tick maintenance
//!
//! Configuration is thread-local, like the rest of the runtime. Tests that
//! change it only affect their own thread.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

use crate::reactive::{Scheduler, TickQueue};

/// A global equality hook. Returning `None` defers to `PartialEq`.
pub type EqualityOverride = Rc<dyn Fn(&dyn Any, &dyn Any) -> Option<bool>>;

/// Per-thread runtime settings.
pub struct RuntimeConfig {
    /// Capture creation sites of nodes and attach them to errors.
    pub debug_mode: bool,

    equality: Option<EqualityOverride>,

    /// The built-in queue, drained by [`tick`](crate::reactive::tick).
    tick_queue: Rc<TickQueue>,

    /// The scheduler maintenance tasks are handed to.
    scheduler: Rc<dyn Scheduler>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let tick_queue = Rc::new(TickQueue::default());
        Self {
            debug_mode: false,
            equality: None,
            scheduler: tick_queue.clone(),
            tick_queue,
        }
    }
}

thread_local! {
    static CONFIG: RefCell<RuntimeConfig> = RefCell::new(RuntimeConfig::default());
}

/// Turn debug mode on or off for nodes created afterwards.
pub fn set_debug_mode(enabled: bool) {
    CONFIG.with(|cfg| cfg.borrow_mut().debug_mode = enabled);
}

pub fn debug_mode() -> bool {
    CONFIG.with(|cfg| cfg.borrow().debug_mode)
}

/// Install an equality hook consulted before `PartialEq` for every value
/// comparison made by the runtime.
pub fn set_equality_override<F>(f: F)
where
    F: Fn(&dyn Any, &dyn Any) -> Option<bool> + 'static,
{
    CONFIG.with(|cfg| cfg.borrow_mut().equality = Some(Rc::new(f)));
}

pub fn clear_equality_override() {
    CONFIG.with(|cfg| cfg.borrow_mut().equality = None);
}

/// Ask the equality hook about a pair of values.
pub(crate) fn equality_override(a: &dyn Any, b: &dyn Any) -> Option<bool> {
    // Clone the hook out so it may itself touch the configuration.
    let hook = CONFIG.with(|cfg| cfg.borrow().equality.clone())?;
    hook(a, b)
}

/// Replace the scheduler used for deferred disconnects and auto-cache unpins.
pub fn set_scheduler(scheduler: Rc<dyn Scheduler>) {
    CONFIG.with(|cfg| cfg.borrow_mut().scheduler = scheduler);
}

/// Go back to the built-in [`TickQueue`].
pub fn reset_scheduler() {
    CONFIG.with(|cfg| {
        let mut cfg = cfg.borrow_mut();
        let queue: Rc<dyn Scheduler> = cfg.tick_queue.clone();
        cfg.scheduler = queue;
    });
}

pub(crate) fn scheduler() -> Rc<dyn Scheduler> {
    CONFIG.with(|cfg| cfg.borrow().scheduler.clone())
}

pub(crate) fn tick_queue() -> Rc<TickQueue> {
    CONFIG.with(|cfg| cfg.borrow().tick_queue.clone())
}
