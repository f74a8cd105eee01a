//! Rill runtime.
//!
//! Executes verified native modules produced by the Rill code generator and
//! provides the `rl_*` runtime entry points those modules call as externs:
//! boxing, operators, strings, collections, named dispatch, closures,
//! exceptions, threads, fibers and profiling probes.
//!
//! ```text
//! let machine = Machine::new(module)?;
//! machine.run_main()?;
//! print!("{}", machine.take_output());
//! ```

mod error;
mod heap;
mod machine;
mod runtime;
mod word;

pub use error::{ExecError, Unwind};
pub use heap::Heap;
pub use machine::{Machine, MachineConfig, RuntimeFn, INIT_FUNCTION, MAIN_FUNCTION};
pub use runtime::{describe_exception, provides, ProfileEntry, RUNTIME_FUNCTIONS};
pub use word::{Ptr, Word};
