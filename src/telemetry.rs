use tracing_subscriber::{prelude::*, EnvFilter, Registry};

/// Default filter: reconcile logs at info, kube client and HTTP plumbing
/// only when they complain. The swap and routing loops log every state
/// transition, so an unfiltered client would drown them out.
static DEFAULT_LOG_FILTER: &str = "info,kube=warn,hyper=warn,tower=warn,rustls=warn";

/// Initialize tracing
pub async fn init() {

    let logger = tracing_subscriber::fmt::layer().json();
    let env_filter = EnvFilter::try_from_env("LOG")
        .or(EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .unwrap();

    // Decide on layers
    let reg = Registry::default();
    reg.with(env_filter).with(logger).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
