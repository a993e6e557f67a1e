use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "category-match")]
#[command(about = "品类匹配ツール（キーワード規則・類似度・LLM検索）", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// 設定ファイル（省略時は ~/.config/category-match/config.json）
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 品类ファイル（1行1件）を照合してExcelを出力
    Match {
        /// 入力ファイル（省略時は対話入力）
        input: Option<PathBuf>,

        /// 入力ファイルを1回処理したら終了（対話ループに入らない）
        #[arg(long)]
        no_loop: bool,

        /// 出力ディレクトリ（省略時は設定の app.output_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// 設定を表示/編集
    Config {
        /// APIキーを設定
        #[arg(long)]
        set_api_key: Option<String>,

        /// 設定を表示
        #[arg(long)]
        show: bool,
    },

    /// 埋め込みキャッシュ管理
    Cache {
        /// キャッシュを削除
        #[arg(long)]
        clear: bool,

        /// キャッシュのあるディレクトリ（省略時は設定の app.excel_dir）
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// キャッシュ情報を表示
        #[arg(long)]
        info: bool,
    },
}
