use std::sync::Once;

use tracing_subscriber::{EnvFilter, prelude::*};

use crate::settings::LogFormat;

static INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber once.
///
/// `RUST_LOG` controls filtering (default `info`); `log_format` picks
/// human-readable compact lines or one JSON object per event. Output goes to
/// stderr so command output on stdout stays machine-readable.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let mut init_result: Option<anyhow::Result<()>> = None;
    INIT.call_once(|| {
        let env_filter = build_env_filter();
        let result = match log_format {
            LogFormat::Text => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .compact()
                    .with_filter(env_filter);
                tracing_subscriber::registry()
                    .with(fmt_layer)
                    .try_init()
                    .map_err(anyhow::Error::from)
            }
            LogFormat::Json => {
                let fmt_layer = tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_level(true)
                    .json()
                    .with_filter(env_filter);
                tracing_subscriber::registry()
                    .with(fmt_layer)
                    .try_init()
                    .map_err(anyhow::Error::from)
            }
        };
        init_result = Some(result);
    });
    init_result.unwrap_or(Ok(()))
}

/// Test subscriber: writes through the libtest capture so output only shows for failures.
fn init_for_tests() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .compact()
                    .with_filter(build_env_filter()),
            )
            .try_init();
    });
}

/// Run an async test body with tracing installed.
pub async fn with_test_tracing<F, Fut, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    use tracing::Instrument;

    init_for_tests();
    f().instrument(tracing::info_span!("test", name = test_name))
        .await
}

/// Run a sync test body with tracing installed.
/// This is the synchronous equivalent of `with_test_tracing`.
pub fn with_test_tracing_sync<F, T>(test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    init_for_tests();
    let _span = tracing::info_span!("test", name = test_name).entered();
    f()
}
