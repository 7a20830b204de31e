pub mod compositor;
pub mod job;
pub mod job_broker;
pub mod protocol;
pub mod server;
