pub mod sweeper;

pub use sweeper::{sweep_once, SweepReport};
