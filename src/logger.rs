//! Built-in logger bootstrap.
//!
//! Grounded in `mmtk::util::logger`: a `try_init` that installs an `env_logger` when the
//! `builtin_env_logger` Cargo feature is enabled (the default), and does nothing otherwise so
//! a host that already owns a `log` backend is free to keep using it.

/// Attempt to install the built-in `env_logger`. Safe to call more than once (or alongside a
/// host-installed logger) - failure just means someone else got there first.
pub(crate) fn try_init() {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let result = env_logger::try_init_from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "warn"),
            );
            match result {
                Ok(()) => log::debug!("rcimmixcons initialized the built-in logger"),
                Err(e) => log::debug!("rcimmixcons did not initialize the built-in logger: {e}"),
            }
        } else {
            log::debug!("rcimmixcons built without the builtin_env_logger feature");
        }
    }
}
