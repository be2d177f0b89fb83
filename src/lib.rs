pub mod cli;
pub mod config;
pub mod email;
pub mod error;
pub mod events;
pub mod performance;

pub use config::AssistantConfig;
pub use performance::{AsyncEmailProcessor, ResultCache, TaskExecutor};
