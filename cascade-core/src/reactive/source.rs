//! Integration sources.
//!
//! A source is an atom fed by something outside the graph: a socket, a
//! timer, a file watcher. The producer only runs while the atom is
//! connected. It is started when the atom gains its first observer and torn
//! down when the atom disconnects (after the grace period) or is sealed.

use super::atom::Atom;
use super::runtime;
use crate::state::{State, Value};

/// Stops a running producer.
pub type Teardown = Box<dyn FnOnce()>;

pub(crate) type Starter<V> = Box<dyn FnMut(&Atom<V>) -> Teardown>;

/// Create an atom driven by an external producer.
///
/// `start` receives the atom and pushes values into it with
/// [`Atom::set`], signals failure with [`Atom::fail`], or ends the stream
/// with [`Atom::make_final`]. It returns the teardown that stops the
/// producer. `start` may run many times over the atom's life, once per
/// connection.
///
/// # Example
///
/// ```rust,ignore
/// let ticks = source(|atom: &Atom<u64>| {
///     let timer = Timer::every(Duration::from_secs(1), atom.clone());
///     Box::new(move || timer.cancel())
/// });
/// ```
#[track_caller]
pub fn source<V, F>(start: F) -> Atom<V>
where
    V: Value,
    F: FnMut(&Atom<V>) -> Teardown + 'static,
{
    let origin = runtime::caller_origin();
    Atom::build(State::Unresolved, Some(Box::new(start)), origin)
}

impl<V: Value> Atom<V> {
    /// Put the atom into a final error state.
    pub fn fail<P>(&self, payload: P) -> Result<(), crate::error::ReactiveError>
    where
        P: std::fmt::Debug + std::fmt::Display + PartialEq + 'static,
    {
        self.set_state(crate::state::FinalWrapper::wrap(State::error(payload)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{tick, Observable};
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct Probe {
        starts: Cell<usize>,
        stops: Rc<Cell<usize>>,
    }

    fn probe() -> Rc<Probe> {
        Rc::new(Probe {
            starts: Cell::new(0),
            stops: Rc::new(Cell::new(0)),
        })
    }

    fn counting_source(probe: &Rc<Probe>) -> Atom<i32> {
        let probe = probe.clone();
        source(move |atom: &Atom<i32>| {
            probe.starts.set(probe.starts.get() + 1);
            atom.set(42).ok();
            let stops = probe.stops.clone();
            Box::new(move || stops.set(stops.get() + 1))
        })
    }

    #[test]
    fn starts_on_connect_and_stops_after_tick() {
        let probe = probe();
        let atom = counting_source(&probe);
        assert!(!atom.resolved());
        assert_eq!(probe.starts.get(), 0);

        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = log.clone();
        let reactor = atom.react(move |v| sink.borrow_mut().push(*v)).unwrap();
        assert_eq!(probe.starts.get(), 1);
        assert_eq!(*log.borrow(), vec![42]);

        reactor.stop();
        assert_eq!(probe.stops.get(), 0);
        tick();
        assert_eq!(probe.stops.get(), 1);
    }

    #[test]
    fn restarts_on_reconnect() {
        let probe = probe();
        let atom = counting_source(&probe);

        atom.react(|_| {}).unwrap().stop();
        tick();
        atom.react(|_| {}).unwrap().stop();
        tick();

        assert_eq!(probe.starts.get(), 2);
        assert_eq!(probe.stops.get(), 2);
    }

    #[test]
    fn fail_seals_with_error() {
        let atom: Atom<i32> = source(|_| Box::new(|| {}));
        atom.fail("gone").unwrap();

        assert!(atom.is_final());
        assert!(atom.errored());
        assert!(atom.set(1).is_err());
    }
}
