use log::LevelFilter;

/// Initialize the global logger. Called once at startup, after settings are
/// resolved; `-v` switches the level from info to debug.
pub fn init(verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_target(false)
        .format_timestamp_secs()
        .init();
}
