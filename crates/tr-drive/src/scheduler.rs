//! Cooperative task scheduling on the host thread.
//!
//! Work the engine defers goes into one of three places: the next-tick
//! queue, the next-frame queue, or a timer list keyed by due time. The host
//! pumps [`Scheduler::take_ready`]; nothing runs on its own.

use std::cell::Cell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

/// Monotonic time source measured from an arbitrary origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall-clock time since construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock that only moves when told to. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get().saturating_add(by));
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Handle for canceling a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskHandle(u64);

/// Where a task waits before it becomes ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    NextTick,
    NextFrame,
}

struct Timer<T> {
    due: Duration,
    handle: TaskHandle,
    task: T,
}

pub struct Scheduler<T> {
    clock: Rc<dyn Clock>,
    next_handle: u64,
    ticks: VecDeque<(TaskHandle, T)>,
    frames: VecDeque<(TaskHandle, T)>,
    timers: Vec<Timer<T>>,
}

impl<T> Scheduler<T> {
    pub fn new(clock: Rc<dyn Clock>) -> Self {
        Self {
            clock,
            next_handle: 0,
            ticks: VecDeque::new(),
            frames: VecDeque::new(),
            timers: Vec::new(),
        }
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn schedule(&mut self, queue: Queue, task: T) -> TaskHandle {
        let handle = self.allocate();
        match queue {
            Queue::NextTick => self.ticks.push_back((handle, task)),
            Queue::NextFrame => self.frames.push_back((handle, task)),
        }
        handle
    }

    pub fn next_tick(&mut self, task: T) -> TaskHandle {
        self.schedule(Queue::NextTick, task)
    }

    pub fn next_frame(&mut self, task: T) -> TaskHandle {
        self.schedule(Queue::NextFrame, task)
    }

    /// Runs `task` once `delay` has elapsed on the scheduler's clock.
    pub fn after(&mut self, delay: Duration, task: T) -> TaskHandle {
        let handle = self.allocate();
        let due = self.now().saturating_add(delay);
        self.timers.push(Timer { due, handle, task });
        handle
    }

    /// Removes a pending task. Returns false when it already ran or was
    /// canceled.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let before = self.pending_count();
        self.ticks.retain(|(candidate, _)| *candidate != handle);
        self.frames.retain(|(candidate, _)| *candidate != handle);
        self.timers.retain(|timer| timer.handle != handle);
        self.pending_count() != before
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.ticks.iter().any(|(candidate, _)| *candidate == handle)
            || self.frames.iter().any(|(candidate, _)| *candidate == handle)
            || self.timers.iter().any(|timer| timer.handle == handle)
    }

    /// Everything runnable now: ticks first, then one frame's worth, then
    /// due timers in due order.
    pub fn take_ready(&mut self) -> Vec<T> {
        let mut ready: Vec<T> = self.ticks.drain(..).map(|(_, task)| task).collect();
        ready.extend(self.frames.drain(..).map(|(_, task)| task));

        let now = self.now();
        let mut due = Vec::new();
        let mut waiting = Vec::with_capacity(self.timers.len());
        for timer in self.timers.drain(..) {
            if timer.due <= now {
                due.push(timer);
            } else {
                waiting.push(timer);
            }
        }
        self.timers = waiting;
        due.sort_by_key(|timer| (timer.due, timer.handle.0));
        ready.extend(due.into_iter().map(|timer| timer.task));
        ready
    }

    /// True when nothing is queued for the next tick or frame and no timer
    /// is due. Timers further out do not count.
    pub fn is_idle(&self) -> bool {
        let now = self.now();
        self.ticks.is_empty()
            && self.frames.is_empty()
            && self.timers.iter().all(|timer| timer.due > now)
    }

    /// Time until the earliest pending timer, if any.
    pub fn next_timer_in(&self) -> Option<Duration> {
        let now = self.now();
        self.timers
            .iter()
            .map(|timer| timer.due.saturating_sub(now))
            .min()
    }

    /// Tasks waiting in `queue`; timers are not counted.
    pub fn queued(&self, queue: Queue) -> usize {
        match queue {
            Queue::NextTick => self.ticks.len(),
            Queue::NextFrame => self.frames.len(),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.ticks.len() + self.frames.len() + self.timers.len()
    }

    fn allocate(&mut self) -> TaskHandle {
        self.next_handle = self.next_handle.saturating_add(1);
        TaskHandle(self.next_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::ManualClock;
    use super::Scheduler;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn ticks_run_before_frames_and_timers_wait() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(Rc::new(clock.clone()));
        scheduler.after(Duration::from_millis(50), "timer");
        scheduler.next_frame("frame");
        scheduler.next_tick("tick");

        assert_eq!(scheduler.take_ready(), vec!["tick", "frame"]);
        assert!(scheduler.is_idle());
        assert_eq!(scheduler.next_timer_in(), Some(Duration::from_millis(50)));

        clock.advance(Duration::from_millis(50));
        assert!(!scheduler.is_idle());
        assert_eq!(scheduler.take_ready(), vec!["timer"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn canceled_tasks_never_run() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(Rc::new(clock.clone()));
        let render = scheduler.next_frame("render");
        let debounce = scheduler.after(Duration::from_millis(10), "debounce");
        assert!(scheduler.cancel(render));
        assert!(!scheduler.cancel(render));
        assert!(scheduler.cancel(debounce));

        clock.advance(Duration::from_secs(1));
        assert!(scheduler.take_ready().is_empty());
    }

    #[test]
    fn due_timers_run_in_due_order() {
        let clock = ManualClock::new();
        let mut scheduler = Scheduler::new(Rc::new(clock.clone()));
        scheduler.after(Duration::from_millis(30), "late");
        scheduler.after(Duration::from_millis(10), "early");
        clock.advance(Duration::from_millis(40));
        assert_eq!(scheduler.take_ready(), vec!["early", "late"]);
    }
}
