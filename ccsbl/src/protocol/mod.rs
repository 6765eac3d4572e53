//! Wire protocol implementations.

pub mod crc;
pub mod frame;

// Re-export common types
pub use frame::{Ack, Command, CommandStatus, MAX_DATA_PER_TRANSFER};
