//! Test harness utilities shared by the daemon suites.

mod config_loader;
mod reporter;
mod shutdown;
mod toolchain;
mod world;

pub use config_loader::{BlockedSocketLoader, FailingConfigLoader, TestConfigLoader};
pub use reporter::{HealthEvent, RecordingHealthReporter};
pub use shutdown::ManualShutdown;
pub use toolchain::fake_toolchains;
pub use world::{TestWorld, world};
