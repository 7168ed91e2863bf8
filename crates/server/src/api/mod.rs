pub mod audit;
pub mod handlers;
pub mod jobs;
pub mod middleware;
pub mod orchestrator;
pub mod queues;
pub mod routes;

pub use routes::create_router;
