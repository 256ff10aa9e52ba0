pub mod handlers;
pub mod response;
pub mod routes;
pub mod ws;

pub use routes::create_router;
