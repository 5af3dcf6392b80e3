mod build;
mod compiler;
mod configuration;
mod error;
mod policy;
mod profiler;
mod result;
mod runtime;
mod selector;
mod tune_cache;
mod tuner;
mod util;

pub use build::*;
pub use compiler::*;
pub use configuration::*;
pub use error::*;
pub use policy::*;
pub use profiler::*;
pub use result::*;
pub use runtime::*;
pub use selector::*;
pub use tune_cache::*;
pub use tuner::*;
