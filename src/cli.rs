use boq_cost_common::{Decimal, MatchPolicy};
use clap::{Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "boq-cost")]
#[command(about = "BOQ（数量明細書）原価照合・マークアップ計算ツール", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// HTTPサーバーを起動
    Serve {
        /// 待ち受けアドレス（省略時は設定ファイルの値）
        #[arg(long)]
        host: Option<IpAddr>,

        /// ポート番号（省略時は設定ファイルの値）
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// BOQファイルを照合して最終BOQを出力
    Process {
        /// BOQファイルまたはフォルダ（.xlsx）
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// マークアップ列が無いシートに追加する率（例: 10,20）
        #[arg(short, long, value_delimiter = ',')]
        markup: Vec<Decimal>,

        /// 出力ディレクトリ（省略時は設定の output_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// 照合方式 (exact/normalized)
        #[arg(long)]
        policy: Option<MatchPolicy>,

        /// フォルダ指定時にサブフォルダも探す
        #[arg(short = 'r', long)]
        recursive: bool,
    },

    /// 原価マスタ管理
    Master {
        #[command(subcommand)]
        action: MasterAction,
    },

    /// 設定を表示/編集
    Config {
        /// 設定を表示
        #[arg(long)]
        show: bool,

        /// 照合方式を設定 (exact/normalized)
        #[arg(long)]
        set_policy: Option<MatchPolicy>,

        /// ヘッダー行マーカーを設定
        #[arg(long)]
        set_header_marker: Option<String>,

        /// サーバーのポートを設定
        #[arg(long)]
        set_port: Option<u16>,
    },
}

#[derive(Subcommand)]
pub enum MasterAction {
    /// マスタが空ならサンプルデータを投入
    Seed,

    /// Excelからマスタを取り込む
    Import {
        /// マスタ用Excelファイル
        #[arg(required = true)]
        file: PathBuf,
    },

    /// マスタをExcelに書き出す
    Export {
        /// 出力ディレクトリ（省略時は設定の output_dir）
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// マスタ一覧を表示
    List,
}
