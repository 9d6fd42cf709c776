pub mod account;
pub mod fleet;

pub use account::{AccountHandle, AccountRuntime};
pub use fleet::{ConnectionReport, FleetController, FleetServices};
