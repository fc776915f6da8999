//! Higher-order agent compositions built on top of `Runtime` and
//! `voting`: fan-out (`parallel`), voted fan-out with an agreement gate
//! (`ensemble`), ordered chains (`sequential`), and classify-then-dispatch
//! (`router`). Each pattern is a plain async function over `&Runtime`
//! rather than a new `Agent` impl, since a pattern is itself invoked like
//! any other agent by whatever composes it one level up.

pub mod ensemble;
pub mod parallel;
pub mod router;
pub mod sequential;

pub use ensemble::{call as ensemble, EnsembleOptions};
pub use parallel::{call as parallel, ParallelOptions};
pub use router::{call as router, RouterOptions};
pub use sequential::call as sequential;
