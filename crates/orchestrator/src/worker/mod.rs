//! Bounded execution of job loops, off the tick threads

mod pool;

pub use pool::{JobExecutor, PriorityWorkPool, WorkPoolError, WorkPoolStatus};
