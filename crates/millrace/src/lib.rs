#![doc = include_str!("../README.md")]

pub mod batch;
mod error;
mod handler;
mod job;
pub mod keyed;
pub mod pipeline;
pub mod pool;
mod queue;
mod reorder;
mod sizing;
mod stats;
mod status;
mod stream;

#[cfg(test)]
mod tests;

pub use crate::error::*;
pub use crate::handler::*;
pub use crate::job::*;
pub use crate::pool::{
    config::PoolConfig,
    coordinator::LifecycleCoordinator,
    run_pool, run_pool_stream,
    worker::{HandlerResult, WorkerExit, WorkerSet},
};
pub use crate::queue::*;
pub use crate::reorder::*;
pub use crate::sizing::*;
pub use crate::stats::*;
pub use crate::status::*;
pub use crate::stream::*;
