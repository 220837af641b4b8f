pub mod controllers;
pub mod memory_users;
pub mod middleware;
pub mod server;

/// Re-export commonly used types from adapters
pub use memory_users::MemoryUserAdapter;
pub use middleware::*;
pub use server::RunningServer;
