pub mod chat;
pub mod events;
pub mod ids;
pub mod runs;
pub mod settings;
pub mod stream;
