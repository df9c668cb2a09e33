//! The host event loop.
//!
//! Script runs synchronously on the loop thread; everything else arrives
//! through one of three macrotask classes drained in a fixed order at each
//! turn: ripe timers first, then I/O completions posted from background
//! threads, then host tasks deferred on the loop thread itself. The engine's
//! promise job queue (microtasks) is drained exhaustively after top-level
//! script and between any two macrotasks.
//!
//! Background work runs on a dedicated tokio runtime ([`IoDriver`]); results
//! cross back as `Send` closures over an mpsc channel and only touch the
//! engine once the loop thread runs them. In-flight operations are counted by
//! [`OpGuard`]s so the loop knows when parking is still worthwhile.

use std::{
    cell::{Cell, RefCell},
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, VecDeque},
    future::Future,
    rc::Rc,
    sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender},
    time::{Duration, Instant},
};

use boa_engine::{job::NativeJob, Context, JsError, JsValue};

/// A completion posted from a background thread. Captures plain data and
/// registry keys, never engine handles.
pub type IoTask = Box<dyn FnOnce(&mut Context) + Send + 'static>;

/// A task deferred on the loop thread itself; may capture engine handles.
pub type LocalTask = Box<dyn FnOnce(&mut Context) + 'static>;

pub type TimerId = u32;

/// Upper bound on a single park so a lost wakeup can never hang the loop.
const MAX_PARK: Duration = Duration::from_millis(500);

/// A pollable microtask queue (the engine's promise job queue).
#[derive(Default)]
pub struct JobQueue(RefCell<VecDeque<NativeJob>>);

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> Option<NativeJob> {
        self.0.borrow_mut().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn call_next(&self, context: &mut Context) -> Option<()> {
        let job = self.next()?;
        if let Err(err) = job.call(context) {
            report_error(&err);
        }
        Some(())
    }
}

impl boa_engine::job::JobQueue for JobQueue {
    fn enqueue_promise_job(&self, job: NativeJob, _context: &mut Context) {
        self.0.borrow_mut().push_back(job);
    }

    fn enqueue_future_job(
        &self,
        future: boa_engine::job::FutureJob,
        context: &mut Context,
    ) {
        let job = crate::future::block_on(future);
        self.enqueue_promise_job(job, context);
    }

    fn run_jobs(&self, context: &mut Context) {
        // A throwing job is reported and does not abort the drain.
        while self.call_next(context).is_some() {}
    }
}

struct TimerEntry {
    callback: JsValue,
    args: Vec<JsValue>,
    repeat: Option<Duration>,
}

#[derive(Default)]
struct Timers {
    entries: HashMap<TimerId, TimerEntry>,
    // Reverse min-heap ordered by (deadline, sequence): timers with the same
    // ripe instant fire in enqueue order.
    heap: BinaryHeap<Reverse<(Instant, u64, TimerId)>>,
    next_id: TimerId,
    next_seq: u64,
}

impl Timers {
    fn schedule(&mut self, id: TimerId, deadline: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse((deadline, seq, id)));
    }

    /// Next live deadline; lazily discards entries for cleared timers.
    fn next_deadline(&mut self) -> Option<Instant> {
        while let Some(Reverse((deadline, _, id))) = self.heap.peek().copied() {
            if self.entries.contains_key(&id) {
                return Some(deadline);
            }
            self.heap.pop();
        }
        None
    }
}

/// The background I/O executor. Owns a small tokio runtime whose tasks must
/// never touch the engine directly.
pub struct IoDriver {
    runtime: tokio::runtime::Runtime,
}

impl IoDriver {
    fn new() -> Self {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("strand-io")
            .enable_all()
            .build()
            .expect("failed to build the I/O runtime");
        Self { runtime }
    }

    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    pub fn handle(&self) -> tokio::runtime::Handle {
        self.runtime.handle().clone()
    }
}

/// Cloneable handle for posting completions back to the loop thread.
#[derive(Clone)]
pub struct TaskSender {
    tx: Sender<IoTask>,
}

impl TaskSender {
    /// Returns `false` if the loop is gone.
    pub fn post(&self, task: impl FnOnce(&mut Context) + Send + 'static) -> bool {
        self.tx.send(Box::new(task)).is_ok()
    }
}

/// Keeps the loop alive while a background operation is in flight. Dropping
/// the guard (on any thread, on any path) posts the decrement back to the
/// loop.
pub struct OpGuard {
    tx: Sender<IoTask>,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        let _ = self.tx.send(Box::new(|_context| {
            let _ = try_with_event_loop(|event_loop| event_loop.op_finished());
        }));
    }
}

pub struct EventLoop {
    jobs: Rc<JobQueue>,
    timers: RefCell<Timers>,
    tasks: RefCell<VecDeque<LocalTask>>,
    io_tx: Sender<IoTask>,
    io_rx: Receiver<IoTask>,
    pending_ops: Cell<usize>,
    driver: IoDriver,
}

impl EventLoop {
    pub fn new(jobs: Rc<JobQueue>) -> Rc<Self> {
        let (io_tx, io_rx) = channel();
        Rc::new(Self {
            jobs,
            timers: RefCell::default(),
            tasks: RefCell::default(),
            io_tx,
            io_rx,
            pending_ops: Cell::new(0),
            driver: IoDriver::new(),
        })
    }

    pub fn io(&self) -> &IoDriver {
        &self.driver
    }

    pub fn task_sender(&self) -> TaskSender {
        TaskSender {
            tx: self.io_tx.clone(),
        }
    }

    /// Registers an in-flight background operation.
    pub fn op_guard(&self) -> OpGuard {
        self.pending_ops.set(self.pending_ops.get() + 1);
        OpGuard {
            tx: self.io_tx.clone(),
        }
    }

    fn op_finished(&self) {
        let pending = self.pending_ops.get();
        debug_assert!(pending > 0, "op guard dropped more than once");
        self.pending_ops.set(pending.saturating_sub(1));
    }

    /// Enqueues a microtask.
    pub fn enqueue_microtask(&self, job: NativeJob) {
        self.jobs.0.borrow_mut().push_back(job);
    }

    /// Defers a task to the macrotask queue of the current turn's tail.
    pub fn defer(&self, task: impl FnOnce(&mut Context) + 'static) {
        self.tasks.borrow_mut().push_back(Box::new(task));
    }

    pub fn set_timer(
        &self,
        callback: JsValue,
        args: Vec<JsValue>,
        delay: Duration,
        repeat: bool,
    ) -> TimerId {
        let mut timers = self.timers.borrow_mut();
        timers.next_id += 1;
        let id = timers.next_id;
        timers.entries.insert(
            id,
            TimerEntry {
                callback,
                args,
                repeat: repeat.then_some(delay),
            },
        );
        timers.schedule(id, Instant::now() + delay);
        id
    }

    /// Removes the timer if present; a no-op otherwise. A cancelled timer may
    /// still be dequeued, but its callback is not invoked.
    pub fn clear_timer(&self, id: TimerId) {
        self.timers.borrow_mut().entries.remove(&id);
    }

    pub fn has_pending(&self) -> bool {
        self.pending_ops.get() > 0
            || !self.tasks.borrow().is_empty()
            || !self.timers.borrow().entries.is_empty()
            || !self.jobs.is_empty()
    }

    fn run_ripe_timers(&self, context: &mut Context) -> bool {
        let mut fired = false;
        loop {
            let now = Instant::now();
            let ripe = {
                let mut timers = self.timers.borrow_mut();
                match timers.next_deadline() {
                    Some(deadline) if deadline <= now => {
                        let Reverse((_, _, id)) = timers.heap.pop().expect("peeked");
                        Some(id)
                    }
                    _ => None,
                }
            };
            let Some(id) = ripe else { break };

            let (callback, args, repeat) = {
                let timers = self.timers.borrow();
                let Some(entry) = timers.entries.get(&id) else {
                    continue;
                };
                (
                    entry.callback.clone(),
                    entry.args.clone(),
                    entry.repeat.is_some(),
                )
            };
            if !repeat {
                self.timers.borrow_mut().entries.remove(&id);
            }

            // A non-callable timer argument is a registered no-op.
            if let Some(function) = callback.as_callable() {
                if let Err(err) = function.call(&JsValue::undefined(), &args, context) {
                    report_error(&err);
                }
            }
            fired = true;
            context.run_jobs();

            // Intervals reschedule relative to completion of this firing, so
            // a slow callback cannot accumulate drift into a burst.
            if repeat {
                let mut timers = self.timers.borrow_mut();
                if let Some(entry) = timers.entries.get(&id) {
                    let delay = entry.repeat.expect("interval entry");
                    timers.schedule(id, Instant::now() + delay);
                }
            }
        }
        fired
    }

    fn drain_io(&self, context: &mut Context) -> bool {
        let mut drained = false;
        while let Ok(task) = self.io_rx.try_recv() {
            task(context);
            context.run_jobs();
            drained = true;
        }
        drained
    }

    fn drain_local(&self, context: &mut Context) -> bool {
        let mut drained = false;
        loop {
            let task = self.tasks.borrow_mut().pop_front();
            let Some(task) = task else { break };
            task(context);
            context.run_jobs();
            drained = true;
        }
        drained
    }

    fn park(&self, context: &mut Context) {
        let deadline = self.timers.borrow_mut().next_deadline();
        let timeout = match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => MAX_PARK,
        }
        .min(MAX_PARK);
        if timeout.is_zero() {
            return;
        }
        match self.io_rx.recv_timeout(timeout) {
            Ok(task) => {
                task(context);
                context.run_jobs();
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
        }
    }

    /// Runs a single turn. Returns `false` once the loop is quiescent: no
    /// timers, no queued tasks and no operation in flight.
    pub fn turn(&self, context: &mut Context) -> bool {
        context.run_jobs();
        let mut progressed = self.run_ripe_timers(context);
        progressed |= self.drain_io(context);
        progressed |= self.drain_local(context);
        if !progressed {
            if !self.has_pending() {
                return false;
            }
            self.park(context);
        }
        true
    }

    /// Drives the loop until quiescent.
    pub fn run(&self, context: &mut Context) {
        while self.turn(context) {}
    }
}

thread_local! {
    /// The loop currently driving this thread's engine.
    static CURRENT_LOOP: RefCell<Vec<Rc<EventLoop>>> = const { RefCell::new(Vec::new()) };
}

/// Marks `event_loop` as current for the duration of the guard.
pub struct EnterGuard(());

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|current| {
            current.borrow_mut().pop();
        });
    }
}

pub fn enter(event_loop: Rc<EventLoop>) -> EnterGuard {
    CURRENT_LOOP.with(|current| current.borrow_mut().push(event_loop));
    EnterGuard(())
}

/// Returns a reference to the event loop driving the current thread.
///
/// # Panics
///
/// Panics outside of a runtime entry (the runtime enters the loop around
/// every evaluation and drive).
pub fn with_event_loop<F, R>(f: F) -> R
where
    F: FnOnce(&Rc<EventLoop>) -> R,
{
    CURRENT_LOOP.with(|current| {
        let current = current.borrow();
        let event_loop = current.last().expect("`CURRENT_LOOP` should be set");
        f(event_loop)
    })
}

pub fn try_with_event_loop<F, R>(f: F) -> Option<R>
where
    F: FnOnce(&Rc<EventLoop>) -> R,
{
    CURRENT_LOOP.with(|current| {
        let current = current.borrow();
        current.last().map(f)
    })
}

/// The unhandled-exception hook: listener exceptions, failed jobs and broken
/// timer callbacks end up here instead of unwinding the loop.
pub fn report_error(error: &JsError) {
    log::warn!("uncaught exception: {error}");
}
