pub mod config;
pub mod kernel;
pub mod kubeconfig;
pub mod services;
pub mod sim;

pub use kernel::reactor::PlacementReactor;
