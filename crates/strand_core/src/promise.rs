//! Host-created promises whose resolving functions outlive the executor.
//!
//! Most async facades hand a promise to script and settle it later from a
//! timer, an I/O completion or a stream callback. [`Deferred`] captures the
//! resolving functions out of a `JsPromise` executor so the settle can happen
//! at any later point on the loop thread.

use boa_engine::{
    object::builtins::{JsFunction, JsPromise},
    Context, JsError, JsNativeError, JsResult, JsValue,
};
use boa_gc::{custom_trace, Finalize, Trace};

pub struct Deferred {
    promise: JsPromise,
    resolve: JsFunction,
    reject: JsFunction,
}

impl Finalize for Deferred {}

unsafe impl Trace for Deferred {
    custom_trace!(this, mark, {
        mark(&this.promise);
        mark(&this.resolve);
        mark(&this.reject);
    });
}

impl Clone for Deferred {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
            resolve: self.resolve.clone(),
            reject: self.reject.clone(),
        }
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred").finish_non_exhaustive()
    }
}

impl Deferred {
    pub fn new(context: &mut Context) -> JsResult<Self> {
        let mut captured: Option<(JsFunction, JsFunction)> = None;
        let promise = JsPromise::new(
            |resolvers, _context| {
                captured = Some((resolvers.resolve.clone(), resolvers.reject.clone()));
                Ok(JsValue::undefined())
            },
            context,
        )?;
        let (resolve, reject) = captured.ok_or_else(|| {
            JsError::from_native(
                JsNativeError::error()
                    .with_message("promise executor did not run synchronously"),
            )
        })?;
        Ok(Self {
            promise,
            resolve,
            reject,
        })
    }

    pub fn promise(&self) -> &JsPromise {
        &self.promise
    }

    pub fn to_value(&self) -> JsValue {
        self.promise.clone().into()
    }

    /// Settles the promise; settling twice is a no-op by promise semantics.
    pub fn resolve(&self, value: &JsValue, context: &mut Context) {
        if let Err(err) = self
            .resolve
            .call(&JsValue::undefined(), &[value.clone()], context)
        {
            log::warn!("deferred resolve failed: {err}");
        }
    }

    pub fn reject(&self, reason: &JsValue, context: &mut Context) {
        if let Err(err) = self
            .reject
            .call(&JsValue::undefined(), &[reason.clone()], context)
        {
            log::warn!("deferred reject failed: {err}");
        }
    }

    pub fn reject_with(&self, error: &JsError, context: &mut Context) {
        let reason = error.to_opaque(context);
        self.reject(&reason, context);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use boa_engine::{builtins::promise::PromiseState, Context};

    #[test]
    fn deferred_settles_once() {
        let mut context = Context::default();
        let deferred = Deferred::new(&mut context).unwrap();
        assert!(matches!(
            deferred.promise().state().unwrap(),
            PromiseState::Pending
        ));

        deferred.resolve(&JsValue::from(42), &mut context);
        context.run_jobs();
        assert!(matches!(
            deferred.promise().state().unwrap(),
            PromiseState::Fulfilled(v) if v == JsValue::from(42)
        ));

        // a late reject loses the race and must not change the state
        deferred.reject(&JsValue::from(7), &mut context);
        context.run_jobs();
        assert!(matches!(
            deferred.promise().state().unwrap(),
            PromiseState::Fulfilled(_)
        ));
    }
}
