pub mod health;
pub mod intercept;

// Re-export all handlers for easy route registration
pub use health::{health_handler, metrics_handler};
pub use intercept::intercept_handler;
