//! Binary provisioning: locate a usable analysis server executable, or
//! download and install one from the release feed.
//!
//! Nothing here self-triggers; the orchestrator decides when to locate and
//! when to download.

pub mod locate;
pub mod release;
pub mod storage;

pub use locate::{BinaryLocation, BinarySource, locate};
pub use release::{InstalledBinary, ProvisionError, ReleaseFeed};
