pub mod generation;
pub mod queue;
pub mod storage;
pub mod store;
pub mod tasks;
