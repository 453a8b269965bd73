//! ログ出力の初期化

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// `RUST_LOG` があればそれを優先し、なければ info（`verbose` 時は debug）で出力
pub fn init_logging(verbose: bool) -> anyhow::Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(verbose))
        .with(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("ロガーの初期化に失敗しました: {}", e))?;

    Ok(())
}
