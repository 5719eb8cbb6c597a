use anyhow::Result;
use tracing::Level;
use tracing_subscriber::fmt;

/// Installs a compact stderr subscriber at debug level. Stdout is left for
/// the data URI printed by the binary.
pub fn init(verbose: bool) -> Result<()> {
    if !verbose {
        return Ok(());
    }
    let _ = fmt()
        .compact()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
    Ok(())
}
