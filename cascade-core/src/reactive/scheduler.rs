//! Deferred maintenance scheduling.
//!
//! Deferred disconnects and auto-cache unpins run "at the end of the tick".
//! What a tick is depends on the host: a UI event loop, an async runtime, a
//! test driving things by hand. The runtime only hands maintenance tasks to a
//! [`Scheduler`]; by default that is a [`TickQueue`] drained by [`tick`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;

use crate::config;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Runs maintenance tasks at some later point on the same thread.
///
/// Implementations must not run the task synchronously inside `schedule`.
pub trait Scheduler {
    fn schedule(&self, task: Task);
}

/// FIFO queue of tasks, run when the host calls [`tick`].
#[derive(Default)]
pub struct TickQueue {
    tasks: RefCell<VecDeque<Task>>,
}

impl TickQueue {
    /// Run every queued task, including ones queued while running.
    /// Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else {
                break;
            };
            task();
            ran += 1;
        }
        ran
    }

    pub fn len(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.borrow().is_empty()
    }
}

impl Scheduler for TickQueue {
    fn schedule(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}

impl fmt::Debug for TickQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickQueue").field("pending", &self.len()).finish()
    }
}

/// End the current tick: run the maintenance queued on this thread's
/// built-in queue. Has no effect once a custom scheduler is installed.
pub fn tick() -> usize {
    config::tick_queue().run_pending()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn tasks_run_in_order_on_drain() {
        let queue = TickQueue::default();
        let log = Rc::new(RefCell::new(Vec::new()));

        for i in 0..3 {
            let log = log.clone();
            queue.schedule(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(queue.len(), 3);
        assert!(log.borrow().is_empty());

        assert_eq!(queue.run_pending(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn tasks_scheduled_while_draining_run_in_same_drain() {
        let queue = Rc::new(TickQueue::default());
        let ran = Rc::new(Cell::new(0));

        let inner_queue = queue.clone();
        let inner_ran = ran.clone();
        queue.schedule(Box::new(move || {
            inner_ran.set(inner_ran.get() + 1);
            let again = inner_ran.clone();
            inner_queue.schedule(Box::new(move || again.set(again.get() + 1)));
        }));

        assert_eq!(queue.run_pending(), 2);
        assert_eq!(ran.get(), 2);
    }
}
