use category_match::{cli, config, context, embedding, error, logging, session};
use category_match_common::MatchMethod;
use clap::Parser;
use cli::{Cli, Commands};
use config::Config;
use context::RunContext;
use embedding::cache::EmbeddingCache;
use error::Result;
use session::{process_file, prompt_input_path, PromptAction};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Match { input, no_loop, output } => {
            println!("🔎 category-match - 品类匹配\n");
            let log_path = logging::init(&config.app.log_dir, cli.verbose)?;
            println!("- ログ: {}", log_path.display());

            // 1. 準備
            println!("[1/2] 規則表・ブランド表・埋め込みモデルを準備中...");
            let ctx = RunContext::build(config, true).await?;
            let s = &ctx.summary;
            println!("✔ 規則 {}件 / 検証済みブランド {}件", s.rules, s.brands);
            println!(
                "✔ ブランドベクトル {}件（キャッシュ {}件、計算 {}件）",
                s.embeddings.total, s.embeddings.cache_hits, s.embeddings.computed
            );
            if s.llm_enabled {
                println!("✔ LLM検索: 有効（ツール {}個）", s.tool_names.len());
            } else {
                println!("- LLM検索: 無効（APIキー未設定）");
            }
            println!();

            // 2. 照合ループ
            let output_dir = output.unwrap_or_else(|| ctx.config.app.output_dir.clone());
            let single_shot = no_loop && input.is_some();
            if !single_shot {
                println!("照合するファイル（1行1件）のパスを入力またはドラッグしてください。q で終了。\n");
            }

            let mut pending: Option<PathBuf> = input;
            loop {
                let path = match pending.take() {
                    Some(path) => path,
                    None => match prompt_input_path()? {
                        PromptAction::Quit => {
                            println!("終了します。");
                            break;
                        }
                        PromptAction::Skip => continue,
                        PromptAction::File(path) => path,
                    },
                };

                if !path.exists() {
                    println!("ファイルが存在しません: {}\n", path.display());
                } else {
                    println!("[2/2] 照合中: {}", path.display());
                    match process_file(&ctx, &path, &output_dir, true).await {
                        Ok(Some(done)) => {
                            let summary = &done.summary;
                            println!(
                                "✔ 成功 {}件、失敗 {}件（赤字）",
                                summary.succeeded(),
                                summary.flagged()
                            );
                            for method in MatchMethod::ALL {
                                let n = summary.count(method);
                                if n > 0 {
                                    println!("  {}: {}件", method.label(), n);
                                }
                            }
                            println!("✔ 出力: {}\n", done.output_path.display());
                        }
                        Ok(None) => println!("有効な行がありません: {}\n", path.display()),
                        Err(e) => println!("処理に失敗しました: {}\n", e),
                    }
                }

                if single_shot {
                    break;
                }
            }
        }

        Commands::Config { set_api_key, show } => {
            let mut config = config;
            let updated = set_api_key.is_some();

            if let Some(key) = set_api_key {
                match &cli.config {
                    Some(path) => {
                        config.llm.api_key = Some(key);
                        config.save_to(path)?;
                    }
                    None => config.set_api_key(key)?,
                }
                println!("✔ APIキーを設定しました");
            }

            if show || !updated {
                println!("設定:");
                println!("{}", serde_json::to_string_pretty(&config.masked())?);
                println!(
                    "  APIキー: {}",
                    if config.get_api_key().is_some() { "設定済み" } else { "未設定" }
                );
            }
        }

        Commands::Cache { clear, dir, info } => {
            let target = dir.unwrap_or_else(|| config.app.excel_dir.clone());
            let cache_path = EmbeddingCache::path(&target);

            if info || !clear {
                if cache_path.exists() {
                    let cache = EmbeddingCache::load(&target, &config.embedding.model_id);
                    println!("キャッシュ情報:");
                    println!("  パス: {}", cache_path.display());
                    println!("  モデル: {}", cache.model_id());
                    println!("  件数: {}", cache.len());
                    if let Ok(meta) = std::fs::metadata(&cache_path) {
                        println!("  サイズ: {} bytes", meta.len());
                    }
                } else {
                    println!("キャッシュファイルが存在しません: {}", cache_path.display());
                }
            }

            if clear {
                match EmbeddingCache::clear(&target) {
                    Ok(true) => println!("✔ キャッシュを削除しました: {}", cache_path.display()),
                    Ok(false) => println!("キャッシュファイルが存在しません"),
                    Err(e) => println!("キャッシュ削除エラー: {}", e),
                }
            }
        }
    }

    Ok(())
}
