use tracing::level_filters::LevelFilter;

/// Diagnostic verbosity, as given by `SHAPER_DEBUG_LEVEL`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    /// No output at all.
    #[default]
    None = 0,
    /// Only failures: unresolved symbols, clock errors, invalid configuration.
    ErrorsOnly = 1,
    /// Socket creation, close, and the accounting of every shaped read.
    Basic = 2,
    /// Everything, including reads on descriptors that are not shaped.
    Full = 3,
}

impl Verbosity {
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::None),
            1 => Some(Self::ErrorsOnly),
            2 => Some(Self::Basic),
            3 => Some(Self::Full),
            _ => None,
        }
    }

    pub fn level_filter(self) -> LevelFilter {
        match self {
            Self::None => LevelFilter::OFF,
            Self::ErrorsOnly => LevelFilter::WARN,
            Self::Basic => LevelFilter::DEBUG,
            Self::Full => LevelFilter::TRACE,
        }
    }
}

/// Installs a stderr subscriber for the given verbosity. Nothing is installed for
/// [`Verbosity::None`], keeping the intercepted paths free of any formatting work.
pub fn init(verbosity: Verbosity) {
    if verbosity == Verbosity::None {
        return;
    }

    // Fails if a subscriber is already set, which is fine.
    let _ = tracing_subscriber::fmt()
        .with_max_level(verbosity.level_filter())
        .with_writer(std::io::stderr)
        .with_thread_ids(true)
        .try_init();
}
