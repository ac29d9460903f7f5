//! # tickflow
//!
//! An incremental analytics engine for financial tick data.  Price, volume
//! and time samples flow in chunk by chunk; a configurable graph of
//! operators derives indicator series, peaks and divergence signals from
//! them; the derived series flow back out for rendering or trading.
//!
//! The distinguishing problem is **retroactive streaming**: operators
//! process data incrementally, but late corrections to earlier samples
//! (a re-detected peak superseding an older one, a discarded extremum)
//! must propagate backwards through the graph of interdependent, stateful
//! operators and truncate their already emitted output, without a restart
//! and without hiding the correction from consumers that already read the
//! old data.
//!
//! ## Shape of the engine
//!
//! - [Stream] — a shared, positioned buffer with two-phase change
//!   notifications; every reader keeps its own cursor.
//! - [Mapper](mapper::Mapper)s and validators — lazy, position-preserving
//!   element transforms.
//! - [Operator]s — `calc()`-stepped computations over named, typed
//!   streams, composable via [CompoundOperator].
//! - [Processor] — wires a named [ProcessorConfig] into a live graph and
//!   feeds it chunks; retroactive edits surface as negative row offsets.
//!
//! ```rust
//! use tickflow::{Processor, builtin_configs};
//!
//! let registry = builtin_configs();
//! let config = registry.get("sandbox").unwrap().clone();
//! let mut processor = Processor::new(config, 1, "TQBR", "SBER").unwrap();
//! let price = vec![Some(10.0), Some(11.0), Some(9.5)];
//! let volume = vec![Some(1.0); 3];
//! let time = vec![
//!     "2024-03-01T10:00:00".parse().ok(),
//!     "2024-03-01T10:01:00".parse().ok(),
//!     "2024-03-01T10:02:00".parse().ok(),
//! ];
//! let rows = processor.calc_values(price, volume, time).unwrap();
//! assert_eq!(rows.len(), processor.descrs().len());
//! ```

#[macro_use]
extern crate log;

pub mod adapters;

mod error;
mod graphs;
mod mapper;
mod maps;
mod operators;
mod params;
mod processor;
mod stream;
mod trading;
mod types;
mod validate;

pub use error::*;
pub use graphs::*;
pub use mapper::*;
pub use maps::*;
pub use operators::*;
pub use params::*;
pub use processor::*;
pub use stream::*;
pub use trading::*;
pub use types::*;
pub use validate::*;
