use std::str::FromStr;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

use crate::{Error, Result};

/// Handle to the installed subscriber's filter, used to change the level at
/// runtime.
#[derive(Clone)]
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: &str) -> Result<()> {
        let filter = level_filter(level)?;
        self.filter
            .reload(filter)
            .map_err(|e| Error::Logging(e.to_string()))
    }
}

/// Validate a level name and turn it into a filter. `RUST_LOG` style
/// directives are accepted too.
pub fn level_filter(level: &str) -> Result<EnvFilter> {
    let level = level.trim();
    if level.is_empty() {
        return Err(Error::Logging("empty log level".into()));
    }
    if let Ok(lf) = LevelFilter::from_str(level) {
        return Ok(EnvFilter::default().add_directive(lf.into()));
    }
    EnvFilter::try_new(level).map_err(|e| Error::Logging(format!("invalid log level {level:?}: {e}")))
}

/// Install the global subscriber. `format` is `"json"` or anything else for
/// plain text.
pub fn init(level: &str, format: &str) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(level_filter(level)?);
    let json = format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    Ok(LogHandle { filter: handle })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_level_names() {
        for level in ["trace", "debug", "info", "warn", "error", "INFO"] {
            assert!(level_filter(level).is_ok(), "{level} should parse");
        }
    }

    #[test]
    fn accepts_directives() {
        assert!(level_filter("glamox_adapter=debug,reqwest=warn").is_ok());
    }

    #[test]
    fn rejects_garbage() {
        assert!(level_filter("").is_err());
        assert!(level_filter("glamox_adapter=loud").is_err());
    }
}
