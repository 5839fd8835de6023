pub mod client;
pub mod device_active;
pub mod directory;
pub mod registry;
pub mod router;

pub use client::Client;
pub use device_active::{ActiveItem, ActiveStore, DeviceActiveSyncer, RedisActiveStore};
pub use directory::{DeviceDirectory, GroupDirectory, RedisDeviceDirectory, RedisGroupDirectory};
pub use registry::ConnectionRegistry;
pub use router::PushRouter;
