pub mod response;
pub mod task;
