pub mod config;
pub mod events;
pub mod signaling;

pub use config::*;
pub use events::*;
pub use signaling::*;
