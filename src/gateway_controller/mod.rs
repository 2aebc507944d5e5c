mod main;
mod status;

pub use main::{run_gateway, State};
pub use status::{
    certificates_for_gateway_in, cluster_gateway_info_in, credential_refs, publish_gateway_index,
    GatewayCertificate, GatewayInfo,
};
