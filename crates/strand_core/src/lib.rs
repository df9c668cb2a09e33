pub mod error;
pub mod event_loop;
pub mod future;
pub mod iterators;
pub mod native;
pub mod promise;
pub mod realm;
pub mod runtime;
pub mod value;

use boa_engine::Context;
pub use error::{Error, Result};

/// A generic runtime API
pub trait Api {
    /// Initialize a runtime API
    fn init(self, context: &mut Context);
}

pub use event_loop::EventLoop;
pub use realm::{Module, Realm};
pub use runtime::{Runtime, RuntimeOptions};
