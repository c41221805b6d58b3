pub mod chat;
pub mod events;
pub mod runs;
pub mod synthesis;
