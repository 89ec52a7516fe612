pub mod aggregator;
pub mod bot;
pub mod buffer;
pub mod commands;
pub mod events;
pub mod flusher;
pub mod guild_config;
pub mod recommendation;
pub mod scheduler;
pub mod snapshot;
pub mod uri;
