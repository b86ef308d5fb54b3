use tracing_subscriber::EnvFilter;

/// Install a process-wide `tracing` subscriber filtered to `level` for
/// this crate and its sync/transport dependencies, and left at `warn`
/// for everything else.
///
/// A plain `fmt` layer is the idiomatic default for a library embedded
/// in someone else's process rather than run as its own binary.
///
/// Safe to skip entirely: every `tracing` call in this crate is a no-op
/// until a subscriber is installed, by the host application or by this
/// function.
pub fn init_tracing(level: &str) -> Result<(), tracing_subscriber::filter::ParseError> {
    // `tracing::Level` has no NONE variant; EnvFilter's own `off`
    // directive is the one that actually silences a target.
    let level = if level.eq_ignore_ascii_case("none") { "off" } else { level };
    let filter = EnvFilter::try_new(format!(
        "warn,key={level},diff={level},merge={level},metrics={level},token={level},remote={level},orchestrator={level},multiplayer={level}"
    ))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
