/// Installs the platform logger. Safe to call more than once.
#[cfg(target_os = "android")]
pub fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("qc-sync"),
    );
}

/// Installs the platform logger. Safe to call more than once.
///
/// Honors `RUST_LOG`, defaults to `info`.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}

/// Logger for unit tests, output captured by the test harness
#[cfg(test)]
pub fn init_test_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .try_init();
}
