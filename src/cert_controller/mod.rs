mod envoyfilter;
mod gateway;
mod main;
mod temporary;
mod verification;

pub use envoyfilter::{build_hsts_filter, delete_hsts_filter, ensure_hsts_filter};
pub use gateway::{
    disable_https_redirect, disable_redirect_for_challenge, find_gateways_using_certificate,
    has_https_redirect, is_related, restore_gateway, restore_original, swap_gateway_to_temporary,
    swap_to_temporary, uses_secret, RestoreOutcome,
};
pub use main::{restore_hold_remaining, run_cert, State};
pub use temporary::{delete_temporary, ensure_temporary_setup, temp_certificate_for, temp_issuer_for};
