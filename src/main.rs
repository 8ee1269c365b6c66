use anyhow::Context;
use boq_cost_rust::{api, cli, config, export, master, scanner, sheet, workflow};
use boq_cost_common::{Decimal, MasterCatalog};
use clap::Parser;
use cli::{Cli, Commands, MasterAction};
use config::Config;
use indicatif::{ProgressBar, ProgressStyle};
use master::{MasterStore, SqliteMasterStore};
use rayon::prelude::*;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn open_store(config: &Config) -> anyhow::Result<SqliteMasterStore> {
    config.ensure_storage_dirs()?;
    let path = &config.storage.database_path;
    SqliteMasterStore::open(path).with_context(|| format!("マスタDBを開けません: {}", path.display()))
}

/// 1ファイル分の照合と最終BOQ出力
fn process_one(
    path: &Path,
    options: &sheet::LocatorOptions,
    catalog: &MasterCatalog,
    output_dir: &Path,
    markup: &[Decimal],
) -> boq_cost_rust::error::Result<(PathBuf, export::boq::FinalReport, f64)> {
    let (sheets, summary) = workflow::process_workbook(path, options, catalog)?;
    if sheets.is_empty() {
        return Err(boq_cost_rust::error::BoqError::NoProcessableSheet(path.display().to_string()));
    }
    let stem = export::file_stem(path);
    let name = format!("final_boq_{}_{}.xlsx", stem, export::timestamp());
    let output = export::reserve_output_path(output_dir, &name)?;
    let report = export::boq::write_final_boq(path, &output, &sheets, markup).inspect_err(|_| {
        let _ = std::fs::remove_file(&output);
    })?;
    Ok((output, report, summary.match_rate))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config = Config::load()?;

    match cli.command {
        Commands::Serve { host, port } => {
            println!("🚀 boq-cost - サーバー起動\n");

            let store = open_store(&config)?;
            let addr_host = match host {
                Some(host) => host,
                None => config.server.host.parse().context("server.host が不正です")?,
            };
            let addr = SocketAddr::new(addr_host, port.unwrap_or(config.server.port));

            let workflow = workflow::BoqWorkflow::new(Arc::new(store), config)
                .with_config_path(Config::config_path()?);
            let seeded = workflow.bootstrap()?;
            if seeded > 0 {
                println!("✔ マスタを{}件投入しました", seeded);
            }

            println!("✔ http://{} で待ち受けます", addr);
            api::serve(api::AppState::new(workflow), addr)
                .await
                .with_context(|| format!("サーバーを起動できません: {}", addr))?;
        }

        Commands::Process { inputs, markup, output, policy, recursive } => {
            println!("📑 boq-cost - BOQ照合\n");

            // 1. 対象ファイル
            println!("[1/3] BOQファイルを検索中...");
            let files = scanner::collect_workbooks(&inputs, recursive)?;
            println!("✔ {}件のファイルを検出\n", files.len());
            if files.is_empty() {
                return Ok(());
            }

            // 2. マスタ読み込み
            println!("[2/3] マスタを読み込み中...");
            let store = open_store(&config)?;
            master::seed::seed_if_empty(&store)?;
            let policy = policy.unwrap_or(config.matching.policy);
            let catalog = store.snapshot(policy)?;
            println!("✔ {}件 (照合方式: {})\n", catalog.len(), policy);

            // 3. 照合・出力
            println!("[3/3] 照合・出力中...");
            let output_dir = output.unwrap_or_else(|| config.storage.output_dir.clone());
            std::fs::create_dir_all(&output_dir)?;
            let markup = if markup.is_empty() { config.markup.options.clone() } else { markup };
            let options = sheet::LocatorOptions::from_config(&config);

            let progress = ProgressBar::new(files.len() as u64);
            progress.set_style(
                ProgressStyle::with_template("{bar:40} {pos}/{len} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            let results: Vec<_> = files
                .par_iter()
                .map(|path| {
                    let result = process_one(path, &options, &catalog, &output_dir, &markup);
                    progress.inc(1);
                    (path, result)
                })
                .collect();
            progress.finish_and_clear();

            let mut failed = 0;
            for (path, result) in results {
                match result {
                    Ok((out, report, rate)) => println!(
                        "✔ {} → {} (照合 {}件 / 未照合 {}件, 照合率 {:.1}%)",
                        path.display(),
                        out.display(),
                        report.items_processed,
                        report.items_failed,
                        rate
                    ),
                    Err(e) => {
                        failed += 1;
                        println!("✘ {}: {}", path.display(), e);
                    }
                }
            }

            if failed > 0 {
                println!("\n⚠ {}件のファイルでエラーが発生しました", failed);
            } else {
                println!("\n✅ 完了");
            }
        }

        Commands::Master { action } => {
            let store = open_store(&config)?;
            match action {
                MasterAction::Seed => {
                    let count = master::seed::seed_if_empty(&store)?;
                    if count > 0 {
                        println!("✔ サンプルを{}件投入しました", count);
                    } else {
                        println!("マスタは空ではないため投入しませんでした");
                    }
                }
                MasterAction::Import { file } => {
                    let options = sheet::LocatorOptions::from_config(&config);
                    let count = master::import::import_master_workbook(&store, &file, &options)?;
                    println!("✔ {}件を取り込みました", count);
                }
                MasterAction::Export { output } => {
                    let output_dir = output.unwrap_or_else(|| config.storage.output_dir.clone());
                    let items = store.list()?;
                    let path = export::write_catalog_export(&items, &output_dir)?;
                    println!("✔ {}件を出力: {}", items.len(), path.display());
                }
                MasterAction::List => {
                    let items = store.list()?;
                    for item in &items {
                        println!(
                            "{:>5}  {:<8}  {:<40}  {:>12}  {:>12}  {:>12}",
                            item.id,
                            item.code.as_deref().unwrap_or("-"),
                            item.name,
                            item.material_cost.to_string(),
                            item.labor_cost.to_string(),
                            item.total_cost.to_string()
                        );
                    }
                    println!("\n{}件", items.len());
                }
            }
        }

        Commands::Config { show, set_policy, set_header_marker, set_port } => {
            let mut config = config;
            let mut changed = false;

            if let Some(policy) = set_policy {
                config.matching.policy = policy;
                changed = true;
                println!("✔ 照合方式を設定しました: {}", policy);
            }
            if let Some(marker) = set_header_marker {
                config.matching.header_marker = marker;
                changed = true;
                println!("✔ ヘッダーマーカーを設定しました");
            }
            if let Some(port) = set_port {
                config.server.port = port;
                changed = true;
                println!("✔ ポートを設定しました: {}", port);
            }
            if changed {
                config.validate()?;
                config.save()?;
            }

            if show || !changed {
                println!("設定 ({}):", Config::config_path()?.display());
                println!("  サーバー: {}:{}", config.server.host, config.server.port);
                println!("  アップロード: {}", config.storage.upload_dir.display());
                println!("  出力: {}", config.storage.output_dir.display());
                println!("  マスタDB: {}", config.storage.database_path.display());
                println!("  照合方式: {}", config.matching.policy);
                println!("  ヘッダーマーカー: {}", config.matching.header_marker);
                println!("  ヘッダー探索行数: {}", config.matching.header_scan_rows);
                println!("  内装シート判定: {}", config.matching.interior_marker);
                let options: Vec<String> = config.markup.options.iter().map(|p| format!("{}%", p)).collect();
                println!(
                    "  追加マークアップ: {}",
                    if options.is_empty() { "なし".to_string() } else { options.join(", ") }
                );
            }
        }
    }

    Ok(())
}
