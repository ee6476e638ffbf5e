// Single-threaded reactor: readiness dispatch, deferred tasks and timers.
use crate::common::constants::DEFAULT_EVENT_CAPACITY;
use crate::common::error::{ListenerError, Result};
use crate::common::time::Timeout;
use crate::core::event::event::{Event, Token};
use crate::core::event::poller::Poller;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::os::unix::io::RawFd;
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

/// Receives readiness notifications for a registered descriptor.
pub trait EventHandler {
    fn on_readable(&self, fd: RawFd);
}

type Task = Box<dyn FnOnce()>;

struct Timer {
    timeout: Timeout,
    seq: u64,
    task: Task,
}

struct Entry {
    fd: RawFd,
    handler: Weak<dyn EventHandler>,
}

pub struct Reactor {
    poller: Poller,
    capacity: usize,
    handlers: RefCell<HashMap<Token, Entry>>,
    next_token: Cell<usize>,
    deferred: RefCell<VecDeque<Task>>,
    timers: RefCell<Vec<Timer>>,
    next_timer: Cell<u64>,
    events: RefCell<Vec<Event>>,
}

impl Reactor {
    pub fn new() -> Result<Rc<Self>> {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Result<Rc<Self>> {
        if capacity == 0 {
            return Err(ListenerError::Reactor(
                "event capacity must be greater than 0".to_string(),
            ));
        }
        Ok(Rc::new(Self {
            poller: Poller::new()?,
            capacity,
            handlers: RefCell::new(HashMap::new()),
            next_token: Cell::new(0),
            deferred: RefCell::new(VecDeque::new()),
            timers: RefCell::new(Vec::new()),
            next_timer: Cell::new(0),
            events: RefCell::new(Vec::with_capacity(capacity)),
        }))
    }

    /// Registers persistent, level-triggered readable interest in `fd`.
    ///
    /// The reactor keeps only a weak reference to `handler`; once the handler
    /// is dropped its events are ignored.
    pub fn register_read(&self, fd: RawFd, handler: Weak<dyn EventHandler>) -> Result<Token> {
        let token = Token(self.next_token.get());
        self.poller.register_read(fd, token)?;
        self.next_token.set(token.0 + 1);
        self.handlers
            .borrow_mut()
            .insert(token, Entry { fd, handler });
        Ok(token)
    }

    pub fn unregister(&self, token: Token) -> Result<()> {
        let entry = self.handlers.borrow_mut().remove(&token);
        match entry {
            Some(entry) => self.poller.unregister_read(entry.fd),
            None => Ok(()),
        }
    }

    pub fn is_registered(&self, token: Token) -> bool {
        self.handlers.borrow().contains_key(&token)
    }

    pub fn registered_count(&self) -> usize {
        self.handlers.borrow().len()
    }

    /// Queues `task` to run on the next turn, after event dispatch.
    pub fn defer(&self, task: impl FnOnce() + 'static) {
        self.deferred.borrow_mut().push_back(Box::new(task));
    }

    /// Runs `task` on the first turn after `delay` has elapsed.
    pub fn defer_after(&self, delay: Duration, task: impl FnOnce() + 'static) {
        let seq = self.next_timer.get();
        self.next_timer.set(seq + 1);
        self.timers.borrow_mut().push(Timer {
            timeout: Timeout::after(delay),
            seq,
            task: Box::new(task),
        });
    }

    pub fn has_pending_tasks(&self) -> bool {
        !self.deferred.borrow().is_empty() || !self.timers.borrow().is_empty()
    }

    /// Polls once, dispatches ready handlers, then runs expired timers and
    /// the deferred tasks that were queued before this point. Returns the
    /// number of handlers and tasks run.
    pub fn turn(&self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = self.effective_timeout(timeout);

        let mut events = std::mem::take(&mut *self.events.borrow_mut());
        events.clear();
        let waited = self.poller.wait(&mut events, self.capacity, timeout);
        let mut ran = 0;

        if waited.is_ok() {
            for event in &events {
                if !event.readable {
                    continue;
                }
                let target = self
                    .handlers
                    .borrow()
                    .get(&event.token)
                    .map(|e| (e.fd, e.handler.clone()));
                if let Some((fd, handler)) = target {
                    if let Some(handler) = handler.upgrade() {
                        handler.on_readable(fd);
                        ran += 1;
                    }
                }
            }
        }
        *self.events.borrow_mut() = events;
        waited?;

        ran += self.run_timers();
        ran += self.run_deferred();
        Ok(ran)
    }

    /// Turns the reactor until `done` returns true or `limit` elapses.
    /// Returns whether `done` was satisfied.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, limit: Duration) -> Result<bool> {
        let deadline = Timeout::after(limit);
        loop {
            if done() {
                return Ok(true);
            }
            if deadline.is_expired() {
                return Ok(false);
            }
            self.turn(Some(deadline.remaining().min(Duration::from_millis(50))))?;
        }
    }

    fn effective_timeout(&self, requested: Option<Duration>) -> Option<Duration> {
        if !self.deferred.borrow().is_empty() {
            return Some(Duration::ZERO);
        }
        let next_timer = self
            .timers
            .borrow()
            .iter()
            .map(|t| t.timeout.remaining())
            .min();
        match (requested, next_timer) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (None, Some(b)) => Some(b),
            (a, None) => a,
        }
    }

    fn run_timers(&self) -> usize {
        let now = Instant::now();
        let mut due = {
            let mut timers = self.timers.borrow_mut();
            let mut due = Vec::new();
            let mut i = 0;
            while i < timers.len() {
                if timers[i].timeout.deadline() <= now {
                    due.push(timers.swap_remove(i));
                } else {
                    i += 1;
                }
            }
            due
        };
        due.sort_by_key(|t| (t.timeout.deadline(), t.seq));

        let n = due.len();
        for timer in due {
            (timer.task)();
        }
        n
    }

    fn run_deferred(&self) -> usize {
        // Tasks queued by these tasks wait for the next turn.
        let n = self.deferred.borrow().len();
        for _ in 0..n {
            let task = self.deferred.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::net::FileDescriptor;

    struct Counter {
        hits: Cell<usize>,
    }

    impl EventHandler for Counter {
        fn on_readable(&self, _fd: RawFd) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn pipe() -> (FileDescriptor, FileDescriptor) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        (FileDescriptor::from_raw(fds[0]), FileDescriptor::from_raw(fds[1]))
    }

    #[test]
    fn test_deferred_tasks_run_in_order() {
        let reactor = Reactor::new().unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            reactor.defer(move || log.borrow_mut().push(i));
        }
        assert!(reactor.has_pending_tasks());
        assert_eq!(reactor.turn(Some(Duration::ZERO)).unwrap(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
        assert!(!reactor.has_pending_tasks());
    }

    #[test]
    fn test_task_deferred_by_task_runs_next_turn() {
        let reactor = Reactor::new().unwrap();
        let hits = Rc::new(Cell::new(0));
        let (r, h) = (reactor.clone(), hits.clone());
        reactor.defer(move || {
            h.set(h.get() + 1);
            let h2 = h.clone();
            r.defer(move || h2.set(h2.get() + 1));
        });

        reactor.turn(Some(Duration::ZERO)).unwrap();
        assert_eq!(hits.get(), 1);
        reactor.turn(Some(Duration::ZERO)).unwrap();
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_timer_fires_after_delay() {
        let reactor = Reactor::new().unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = fired.clone();
        reactor.defer_after(Duration::from_millis(20), move || f.set(true));

        reactor.turn(Some(Duration::ZERO)).unwrap();
        assert!(!fired.get());
        let done = reactor
            .run_until(|| fired.get(), Duration::from_secs(2))
            .unwrap();
        assert!(done);
    }

    #[test]
    fn test_dispatch_and_unregister() {
        let reactor = Reactor::new().unwrap();
        let counter = Rc::new(Counter { hits: Cell::new(0) });
        let (r, w) = pipe();
        let weak: Weak<dyn EventHandler> = Rc::downgrade(&counter) as Weak<dyn EventHandler>;
        let token = reactor.register_read(r.as_raw_fd(), weak).unwrap();
        assert!(reactor.is_registered(token));

        assert_eq!(unsafe { libc::write(w.as_raw_fd(), b"x".as_ptr() as *const _, 1) }, 1);
        reactor.turn(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(counter.hits.get(), 1);

        // Level-triggered: unread data fires again.
        reactor.turn(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(counter.hits.get(), 2);

        reactor.unregister(token).unwrap();
        assert_eq!(reactor.registered_count(), 0);
        reactor.turn(Some(Duration::from_millis(10))).unwrap();
        assert_eq!(counter.hits.get(), 2);
    }

    #[test]
    fn test_dropped_handler_is_ignored() {
        let reactor = Reactor::new().unwrap();
        let counter = Rc::new(Counter { hits: Cell::new(0) });
        let (r, w) = pipe();
        let weak: Weak<dyn EventHandler> = Rc::downgrade(&counter) as Weak<dyn EventHandler>;
        reactor.register_read(r.as_raw_fd(), weak).unwrap();
        drop(counter);

        assert_eq!(unsafe { libc::write(w.as_raw_fd(), b"x".as_ptr() as *const _, 1) }, 1);
        assert_eq!(reactor.turn(Some(Duration::from_millis(100))).unwrap(), 0);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(matches!(
            Reactor::with_capacity(0),
            Err(ListenerError::Reactor(_))
        ));
    }
}
