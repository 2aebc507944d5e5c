mod cleanup;
mod main;
mod pod;
mod service;
mod virtualservice;

pub use cleanup::{cleanup_orphaned_global, cleanup_orphaned_in_namespace, delete_virtual_services_for_pod};
pub use main::{run_solver, State};
pub use pod::solver_domain;
pub use service::{find_service_for_pod, service_selector_matches_pod};
pub use virtualservice::{
    desired_challenge_vs, destination_namespace, is_challenge_vs, parse_destination_namespace,
    solver_port,
};
