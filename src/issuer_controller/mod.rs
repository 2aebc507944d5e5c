mod main;

pub use main::{run_issuer, State};
