//! Tower middleware applying the rate limiter to HTTP requests.

mod layer;
mod response;
mod service;


pub use layer::RateLimitLayer;
pub use response::handle_error;
pub use service::RateLimitService;
