/// デプロイテンプレート生成
///
/// 標準のデプロイ記述子を検証し、SAMテンプレート（JSON）を出力する。
/// `--check`を指定すると既存テンプレートが記述子と一致するか検証する。
///
/// ```bash
/// cargo run --bin render_template -- --output services/analytics/template.json
/// cargo run --bin render_template -- --check services/analytics/template.json
/// ```
use std::path::PathBuf;

use analytics::domain::{DeploymentDescriptor, TemplateSummary, Tenant};
use analytics::infrastructure::init_logging;
use clap::Parser;
use serde_json::Value;
use tracing::info;

/// コマンドライン引数
#[derive(Parser, Debug)]
#[command(name = "render_template")]
#[command(about = "アナリティクスLambda関数群のSAMテンプレートを生成")]
struct CliArgs {
    /// 出力先ファイル（省略時は標準出力）
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// 生成せずに既存テンプレートを検証する
    #[arg(long, conflicts_with = "output")]
    check: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let args = CliArgs::parse();

    let descriptor = DeploymentDescriptor::standard();
    descriptor.validate()?;
    let template = descriptor.to_template();

    if let Some(path) = args.check {
        let text = std::fs::read_to_string(&path)?;
        TemplateSummary::from_json(&text)?.check_structure(Tenant::ALL.len())?;
        let committed: Value = serde_json::from_str(&text)?;
        if committed != template {
            return Err(format!("{} is out of date", path.display()).into());
        }
        info!(path = %path.display(), "テンプレートは最新");
        return Ok(());
    }

    let rendered = serde_json::to_string_pretty(&template)?;
    match args.output {
        Some(path) => {
            std::fs::write(&path, format!("{}\n", rendered))?;
            info!(path = %path.display(), functions = descriptor.functions.len(), "テンプレートを出力");
        }
        None => println!("{}", rendered),
    }

    Ok(())
}
