/// ログ基盤モジュール
///
/// Lambda環境向けの構造化ログ設定を提供する。
/// CloudWatch Logsで検索しやすいよう、JSON形式で1行1イベントを出力する。
use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// デフォルトのログレベル
const DEFAULT_LOG_LEVEL: &str = "info";

/// ログサブスクライバー初期化用の同期プリミティブ
static INIT: Once = Once::new();

/// `RUST_LOG`からフィルタを作る（未設定・不正な値ならデフォルト）
fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Lambda環境向けのログサブスクライバーを初期化する
///
/// 複数回呼び出しても最初の1回のみ初期化する。
/// ローカルCLIとして実行する場合も同じJSON形式で出力する。
///
/// # 使用例
/// ```ignore
/// use analytics::infrastructure::init_logging;
///
/// init_logging();
/// tracing::info!(tenant = "campus", "エクスポート開始");
/// ```
pub fn init_logging() {
    INIT.call_once(|| {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .flatten_event(true)
            .with_current_span(false);

        // 他のサブスクライバーが設定済みでも失敗させない
        let _ = tracing_subscriber::registry()
            .with(env_filter(DEFAULT_LOG_LEVEL))
            .with(json_layer)
            .try_init();
    });
}

/// テスト用のログサブスクライバーを初期化する（人間が読みやすい形式）
#[cfg(test)]
pub fn init_test_logging() {
    static TEST_INIT: Once = Once::new();

    TEST_INIT.call_once(|| {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .compact();

        let _ = tracing_subscriber::registry()
            .with(env_filter("debug"))
            .with(fmt_layer)
            .try_init();
    });
}
