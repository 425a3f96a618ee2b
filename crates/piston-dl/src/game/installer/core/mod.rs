pub mod engine;
pub mod extract;
pub mod fetcher;
pub mod limiter;
pub mod planner;
pub mod resolver;
pub mod traits;
