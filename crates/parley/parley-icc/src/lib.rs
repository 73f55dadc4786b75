mod channel;
mod error;
mod ring;
mod semaphore;
mod shm_layout;

pub use channel::{ChannelConfig, ChannelStats, ShmChannel};
pub use error::ChannelError;
pub use ring::{DEFAULT_CAPACITY, RingConfig};
pub use semaphore::{Deadline, NamedSemaphore};
pub use shm_layout::{RING_MAGIC, RING_VERSION, bytes_for_ring};
