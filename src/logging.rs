//! Tracing setup for hosts embedding the softphone

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crate-level filter directive for the given diagnostic flag
pub fn directive(debug: bool) -> &'static str {
    if debug {
        "crm_softphone=debug"
    } else {
        "crm_softphone=info"
    }
}

/// Install the global subscriber. Returns `false` if one was already installed.
pub fn init(debug: bool) -> bool {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = directive(debug).parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directive_parses() {
        for debug in [false, true] {
            let parsed: Result<tracing_subscriber::filter::Directive, _> = directive(debug).parse();
            assert!(parsed.is_ok());
        }
    }

    #[test]
    fn test_init_twice() {
        init(false);
        assert!(!init(true));
    }
}
