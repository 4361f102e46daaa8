pub mod envelope;
pub mod generations;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod webhooks;

pub use routes::create_router;
