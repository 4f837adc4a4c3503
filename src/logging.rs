// src/logging.rs

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::config::CONFIG;

/// Initialize tracing for an embedding application. Level comes from
/// `ALBANY_LOG_LEVEL`; unparseable values fall back to `info`.
pub fn init() -> anyhow::Result<()> {
    let level: Level = CONFIG.log_level.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
