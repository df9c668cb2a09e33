use std::{
    io::Read,
    ops::{Deref, DerefMut},
    path::PathBuf,
    rc::Rc,
};

use boa_engine::{
    builtins::promise::{OperationType, PromiseState},
    context::HostHooks,
    object::builtins::{JsFunction, JsPromise},
    Context, JsError, JsNativeError, JsObject, JsResult, JsString, JsValue,
    NativeFunction, Source,
};
use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, Utc};

use crate::{
    event_loop::{self, EventLoop, JobQueue},
    realm::{Module, Realm},
    Api,
};

struct Hooks;

impl HostHooks for Hooks {
    fn utc_now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }

    fn local_from_utc(&self, utc: NaiveDateTime) -> DateTime<FixedOffset> {
        DateTime::from_naive_utc_and_offset(utc, FixedOffset::east_opt(0).unwrap())
    }

    fn local_from_naive_local(
        &self,
        _local: NaiveDateTime,
    ) -> LocalResult<DateTime<FixedOffset>> {
        LocalResult::None
    }

    // Rejections with no handler attached after a microtask turn land here.
    fn promise_rejection_tracker(
        &self,
        _promise: &JsObject,
        operation: OperationType,
        _context: &mut Context,
    ) {
        if let OperationType::Reject = operation {
            log::warn!("unhandled promise rejection");
        }
    }
}

pub const HOOKS: &'static dyn HostHooks = &Hooks;

#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Engine instruction budget; `usize::MAX` means effectively unmetered.
    pub instruction_budget: usize,
    /// Working directory to enter before the first script runs.
    pub working_dir: Option<PathBuf>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            instruction_budget: usize::MAX,
            working_dir: None,
        }
    }
}

/// An isolated JavaScript runtime: an engine context, its realm, the
/// microtask queue and the host event loop. Exactly one thread may drive a
/// runtime; the event loop is made current around every entry into the
/// engine.
pub struct Runtime {
    context: Context,
    realm: Realm,
    event_loop: Rc<EventLoop>,
}

impl Deref for Runtime {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.context
    }
}

impl DerefMut for Runtime {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.context
    }
}

impl Runtime {
    pub fn new(options: RuntimeOptions) -> crate::Result<Self> {
        if let Some(dir) = &options.working_dir {
            std::env::set_current_dir(dir)?;
        }

        // 1. The job queue is shared between the context (which fills it)
        //    and the event loop (which drains it).
        let job_queue = Rc::new(JobQueue::new());

        // 2. Initialize context with the job queue
        let mut context = Context::builder()
            .host_hooks(HOOKS)
            .job_queue(job_queue.clone() as Rc<dyn boa_engine::job::JobQueue>)
            .instructions_remaining(options.instruction_budget)
            .build()
            .map_err(JsError::from)?;

        // 3. Initialize the specialized realm and enter it
        let realm = Realm::new(&mut context).map_err(JsError::from)?;
        context.enter_realm(realm.inner.clone());

        let event_loop = EventLoop::new(job_queue);

        Ok(Self {
            context,
            realm,
            event_loop,
        })
    }

    pub fn context(&mut self) -> &mut Context {
        self.deref_mut()
    }

    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn register_api<T: Api>(&mut self, api: T) {
        let _guard = event_loop::enter(self.event_loop.clone());
        self.realm.register_api(api, &mut self.context);
    }

    /// Defines a global value visible to script.
    pub fn global_set(&mut self, name: &str, value: JsValue) -> JsResult<()> {
        self.context
            .global_object()
            .set(JsString::from(name), value, false, &mut self.context)?;
        Ok(())
    }

    /// Exposes a host function to script under `name`.
    pub fn register_global_callable(
        &mut self,
        name: &str,
        length: usize,
        function: NativeFunction,
    ) -> JsResult<()> {
        self.context
            .register_global_builtin_callable(JsString::from(name), length, function)
    }

    /// Parses, compiles and evaluates the script `src`, then drains the
    /// microtask queue.
    pub fn eval<R: Read>(&mut self, src: Source<'_, R>) -> JsResult<JsValue> {
        let _guard = event_loop::enter(self.event_loop.clone());
        let result = self.realm.eval(src, &mut self.context);
        self.context.run_jobs();
        result
    }

    /// Parses, loads, links and evaluates a module. The returned promise
    /// settles once the event loop has driven the module's evaluation.
    pub fn eval_module(&mut self, module: &Module) -> JsResult<JsPromise> {
        let _guard = event_loop::enter(self.event_loop.clone());
        self.realm.eval_module(module, &mut self.context)
    }

    /// Drives the event loop until no timers, tasks or in-flight operations
    /// remain.
    pub fn run_to_completion(&mut self) {
        let _guard = event_loop::enter(self.event_loop.clone());
        self.event_loop.run(&mut self.context);
    }

    /// Runs the event loop until `value` (if a promise) settles, returning
    /// its fulfillment value or rejection reason.
    pub fn block_on_value(&mut self, value: &JsValue) -> JsResult<JsValue> {
        let _guard = event_loop::enter(self.event_loop.clone());
        let Some(promise) = value.as_promise() else {
            return Ok(value.clone());
        };
        let promise = JsPromise::from_object(promise.clone())?;
        loop {
            match promise.state()? {
                PromiseState::Fulfilled(value) => return Ok(value),
                PromiseState::Rejected(reason) => {
                    return Err(JsError::from_opaque(reason))
                }
                PromiseState::Pending => {
                    if !self.event_loop.turn(&mut self.context) {
                        return Err(JsNativeError::error()
                            .with_message("Event loop did not resolve the promise")
                            .into());
                    }
                }
            }
        }
    }

    /// Evaluates `src` and blocks on the result, driving the loop as needed.
    pub fn eval_and_wait<R: Read>(&mut self, src: Source<'_, R>) -> JsResult<JsValue> {
        let value = self.eval(src)?;
        self.block_on_value(&value)
    }

    /// Calls a JS function from the host, entering the loop for the duration.
    pub fn call(
        &mut self,
        function: &JsFunction,
        this: &JsValue,
        args: &[JsValue],
    ) -> JsResult<JsValue> {
        let _guard = event_loop::enter(self.event_loop.clone());
        let result = function.call(this, args, &mut self.context);
        self.context.run_jobs();
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eval_returns_value() {
        let mut rt = Runtime::new(RuntimeOptions::default()).unwrap();
        let value = rt.eval(Source::from_bytes("21 * 2")).unwrap();
        assert_eq!(value, JsValue::from(42));
    }

    #[test]
    fn microtasks_drain_after_script() {
        let mut rt = Runtime::new(RuntimeOptions::default()).unwrap();
        let value = rt
            .eval(Source::from_bytes(
                r#"
                globalThis.order = [];
                Promise.resolve().then(() => order.push("micro"));
                order.push("sync");
                "#,
            ))
            .unwrap();
        drop(value);
        let order = rt.eval(Source::from_bytes("order.join()")).unwrap();
        assert_eq!(
            order.as_string().unwrap().to_std_string_escaped(),
            "sync,micro"
        );
    }

    #[test]
    fn block_on_value_resolves_promises() {
        let mut rt = Runtime::new(RuntimeOptions::default()).unwrap();
        let value = rt
            .eval_and_wait(Source::from_bytes("Promise.resolve(7)"))
            .unwrap();
        assert_eq!(value, JsValue::from(7));
    }

    #[test]
    fn block_on_value_surfaces_rejections() {
        let mut rt = Runtime::new(RuntimeOptions::default()).unwrap();
        let err = rt
            .eval_and_wait(Source::from_bytes("Promise.reject(new Error(\"boom\"))"))
            .unwrap_err();
        assert!(format!("{err}").contains("boom"));
    }

    #[test]
    fn unresolvable_promise_reports_an_error() {
        let mut rt = Runtime::new(RuntimeOptions::default()).unwrap();
        let err = rt
            .eval_and_wait(Source::from_bytes("new Promise(() => {})"))
            .unwrap_err();
        assert!(format!("{err}").contains("did not resolve"));
    }
}
