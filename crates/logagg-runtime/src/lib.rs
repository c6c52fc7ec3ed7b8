//! logagg runtime: wires discovery, tailing, dedup and output into a
//! long-running poll loop with a separate prune timer.

pub mod cli;
pub mod logging;
pub mod pipeline;
pub mod poll_loop;
pub mod pruner;
pub mod registry;
pub mod shutdown;
