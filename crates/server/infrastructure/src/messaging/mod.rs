//! Event bus implementations.

mod memory;
mod nats;

pub use memory::InMemoryEventBus;
pub use nats::NatsEventBus;
