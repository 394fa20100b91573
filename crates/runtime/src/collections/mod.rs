//! Bounded collections used by the monitoring subsystem.

pub mod ring_buffer;

pub use ring_buffer::RingBuffer;
