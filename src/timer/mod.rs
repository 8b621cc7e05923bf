//! Single-threaded cooperative scheduling: events are enqueued and
//! dispatched serially, handlers run to completion, and timers post a
//! [`Event::TimerExpired`] rather than invoking a callback from interrupt
//! context. This is the in-process analogue of a Contiki `PROCESS_THREAD`'s
//! `etimer`/event-queue pair, just modeled with an explicit queue instead
//! of a coroutine.

use std::collections::VecDeque;

/// Opaque identity for an armed timer, so a handler receiving
/// [`Event::TimerExpired`] can tell which of its own timers fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    SetDisDelay,
    SetDiosInput,
    ResetDiosInput,
    DisBurst,
    StopDioCheck,
    ParentUnreachable,
    /// Carries the raw (untranslated) RSSI observed on the reply.
    ParentReachable(u8),
    ResetMobilityFlag,
    TimerExpired(TimerHandle),
}

struct ArmedTimer {
    handle: TimerHandle,
    /// Logical tick at which this timer is due.
    deadline: u64,
}

/// A cooperative scheduler: a FIFO event queue per logical process, plus a
/// set of armed timers driven by an injected logical clock rather than wall
/// time, so tests can advance it deterministically.
pub struct EventBus {
    now: u64,
    next_handle: u64,
    timers: Vec<ArmedTimer>,
    queue: VecDeque<Event>,
}

impl EventBus {
    pub fn new() -> EventBus {
        EventBus {
            now: 0,
            next_handle: 0,
            timers: Vec::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn now(&self) -> u64 {
        self.now
    }

    /// Enqueue an event for asynchronous delivery: it's drained the next
    /// time the caller calls [`EventBus::poll`].
    pub fn post(&mut self, event: Event) {
        self.queue.push_back(event);
    }

    /// Arm a timer to fire `delay` logical ticks from now, returning a
    /// handle the caller can use to cancel it or to recognize its
    /// `TimerExpired` event.
    pub fn arm(&mut self, delay: u64) -> TimerHandle {
        let handle = TimerHandle(self.next_handle);
        self.next_handle += 1;
        self.timers.push(ArmedTimer {
            handle,
            deadline: self.now + delay,
        });
        handle
    }

    /// Cancel a timer. A cancelled timer never fires — once this returns,
    /// no `TimerExpired` for `handle` will subsequently be observed, even
    /// if it was already due.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.timers.retain(|t| t.handle != handle);
    }

    pub fn is_armed(&self, handle: TimerHandle) -> bool {
        self.timers.iter().any(|t| t.handle == handle)
    }

    /// Advance the logical clock by `ticks`, posting `TimerExpired` for
    /// every timer whose deadline falls within the new window, in deadline
    /// order (earliest first; ties broken by arming order).
    pub fn advance(&mut self, ticks: u64) {
        self.now += ticks;
        let now = self.now;
        let mut due: Vec<ArmedTimer> = Vec::new();
        self.timers.retain(|t| {
            if t.deadline <= now {
                due.push(ArmedTimer {
                    handle: t.handle,
                    deadline: t.deadline,
                });
                false
            } else {
                true
            }
        });
        due.sort_by_key(|t| (t.deadline, t.handle.0));
        for t in due {
            self.queue.push_back(Event::TimerExpired(t.handle));
        }
    }

    /// Drain and return the next pending event, if any.
    pub fn poll(&mut self) -> Option<Event> {
        self.queue.pop_front()
    }

    /// Post an event and drain the queue immediately, handing every event
    /// (including ones `handle` itself enqueues) to `handle` in FIFO order
    /// — the synchronous-post analogue of `process_post_synch`.
    pub fn post_synch(&mut self, event: Event, mut handle: impl FnMut(&mut EventBus, Event)) {
        self.post(event);
        while let Some(next) = self.poll() {
            handle(self, next);
        }
    }
}

impl Default for EventBus {
    fn default() -> EventBus {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn armed_timer_fires_exactly_once_at_deadline() {
        let mut bus = EventBus::new();
        let h = bus.arm(5);
        bus.advance(4);
        assert!(bus.poll().is_none());
        bus.advance(1);
        assert_eq!(bus.poll(), Some(Event::TimerExpired(h)));
        assert!(bus.poll().is_none());
    }

    #[test]
    fn cancelled_timer_never_fires() {
        let mut bus = EventBus::new();
        let h = bus.arm(5);
        bus.cancel(h);
        bus.advance(10);
        assert!(bus.poll().is_none());
    }

    #[test]
    fn events_for_one_process_stay_fifo() {
        let mut bus = EventBus::new();
        bus.post(Event::DisBurst);
        bus.post(Event::ResetMobilityFlag);
        assert_eq!(bus.poll(), Some(Event::DisBurst));
        assert_eq!(bus.poll(), Some(Event::ResetMobilityFlag));
    }

    #[test]
    fn post_synch_drains_before_returning() {
        let mut bus = EventBus::new();
        let mut seen = Vec::new();
        bus.post_synch(Event::ParentUnreachable, |_bus, ev| seen.push(ev));
        assert_eq!(seen, vec![Event::ParentUnreachable]);
    }
}
