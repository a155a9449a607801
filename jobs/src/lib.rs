pub mod queue;
pub mod worker;

pub use queue::{ChannelCommandQueue, Command, CommandQueue};
pub use worker::{ViewChange, ViewListener, Worker, WorkerReport};
