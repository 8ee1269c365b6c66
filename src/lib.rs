//! BOQ原価照合サービス
//!
//! 数量明細書（.xlsx）の各行を原価マスタと照合し、材料費・労務費・合計と
//! マークアップ値を書き込んだ最終BOQを出力する。

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod master;
pub mod matcher;
pub mod scanner;
pub mod session;
pub mod sheet;
pub mod workflow;
