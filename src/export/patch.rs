//! xlsx のセル単位パッチ
//!
//! 元ファイルの zip エントリをそのままコピーし、対象シートの XML だけを
//! ストリーミングで書き換える。書式・数式・結合セル・他シートはすべて保持される。
//!
//! - 既存セルは値だけ置き換える（スタイル `s` は維持）
//! - 無い行・セルは順序を保って挿入する
//! - 共有数式のマスターを上書きした場合、同じ si の子セルは数式を外して値だけ残す
//! - 数式セルを上書き・切り離した場合は calcChain を削除する
//! - 何か書き込んだら calcPr に fullCalcOnLoad を付けて再計算させる

use crate::error::{BoqError, Result};
use boq_cost_common::layout::column_letter;
use boq_cost_common::Decimal;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const WORKBOOK_PART: &str = "xl/workbook.xml";
const WORKBOOK_RELS_PART: &str = "xl/_rels/workbook.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";
const CALC_CHAIN_PART: &str = "xl/calcChain.xml";

/// calcPr より後ろに来る workbook 直下の要素
const AFTER_CALC_PR: &[&[u8]] = &[
    b"oleSize",
    b"customWorkbookViews",
    b"pivotCaches",
    b"smartTagPr",
    b"smartTagTypes",
    b"webPublishing",
    b"fileRecoveryPr",
    b"webPublishObjects",
    b"extLst",
];

/// 書き込む値
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(Decimal),
    Text(String),
}

/// 1セル分の書き込み（行・列は1始まり）
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub row: u32,
    pub col: u32,
    pub value: CellValue,
}

impl CellWrite {
    pub fn number(row: u32, col: u32, value: Decimal) -> Self {
        Self { row, col, value: CellValue::Number(value) }
    }

    pub fn text(row: u32, col: u32, value: impl Into<String>) -> Self {
        Self { row, col, value: CellValue::Text(value.into()) }
    }
}

/// シート単位の書き込み
#[derive(Debug, Clone, Default)]
pub struct SheetPatch {
    pub sheet_name: String,
    pub cells: Vec<CellWrite>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOutcome {
    pub cells_written: usize,
    /// 値で上書きされた数式セル
    pub formulas_replaced: usize,
    /// マスターを失って数式を外した共有数式の子セル
    pub formulas_detached: usize,
}

type RowPatches = BTreeMap<u32, BTreeMap<u32, CellValue>>;

/// source をコピーしつつ patches を適用して output に保存
///
/// 同じディレクトリの一時ファイルに書いてから output にリネームする。
/// 失敗時は一時ファイルを残さない。
pub fn patch_workbook(source: &Path, output: &Path, patches: &[SheetPatch]) -> Result<PatchOutcome> {
    if !source.exists() {
        return Err(BoqError::FileNotFound(source.display().to_string()));
    }

    let temp_path = part_path(output);
    let result = File::open(source)
        .map_err(BoqError::from)
        .and_then(|file| {
            let mut archive = ZipArchive::new(file)?;
            let out = File::create(&temp_path)?;
            patch_archive(&mut archive, out, patches)
        })
        .and_then(|outcome| {
            std::fs::rename(&temp_path, output)?;
            Ok(outcome)
        });

    if result.is_err() && temp_path.exists() {
        let _ = std::fs::remove_file(&temp_path);
    }
    result
}

/// 並行して同じ output を書いても衝突しない一時ファイル名
fn part_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(format!(".{}.part", uuid::Uuid::new_v4().simple()));
    PathBuf::from(name)
}

fn patch_archive<R: Read + Seek, W: Write + Seek>(
    archive: &mut ZipArchive<R>,
    output: W,
    patches: &[SheetPatch],
) -> Result<PatchOutcome> {
    let parts = resolve_sheet_parts(archive)?;

    let mut by_part: HashMap<String, RowPatches> = HashMap::new();
    for patch in patches {
        if patch.cells.is_empty() {
            continue;
        }
        let part = parts
            .get(&patch.sheet_name)
            .ok_or_else(|| BoqError::WorkbookWrite(format!("sheet not found in workbook: {}", patch.sheet_name)))?;
        let rows = by_part.entry(part.clone()).or_default();
        for cell in &patch.cells {
            if cell.row == 0 || cell.col == 0 {
                return Err(BoqError::WorkbookWrite(format!("invalid cell position {}:{}", cell.row, cell.col)));
            }
            rows.entry(cell.row).or_default().insert(cell.col, cell.value.clone());
        }
    }

    let mut outcome = PatchOutcome::default();
    let mut patched_parts: HashMap<String, Vec<u8>> = HashMap::new();
    for (part, rows) in &by_part {
        let xml = read_part(archive, part)?;
        let (patched, stats) = patch_worksheet_xml(&xml, rows)?;
        outcome.cells_written += stats.cells_written;
        outcome.formulas_replaced += stats.formulas_replaced;
        outcome.formulas_detached += stats.formulas_detached;
        patched_parts.insert(part.clone(), patched);
    }

    let drop_calc_chain = outcome.formulas_replaced > 0 || outcome.formulas_detached > 0;
    let force_recalc = outcome.cells_written > 0;

    let mut zip = ZipWriter::new(output);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();

        if let Some(bytes) = patched_parts.get(&name) {
            zip.start_file(name.clone(), options)?;
            zip.write_all(bytes)?;
        } else if drop_calc_chain && name == CALC_CHAIN_PART {
            continue;
        } else if drop_calc_chain && (name == CONTENT_TYPES_PART || name == WORKBOOK_RELS_PART) {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            let filtered = if name == CONTENT_TYPES_PART {
                remove_calc_chain_override(&buf)?
            } else {
                remove_calc_chain_relationship(&buf)?
            };
            zip.start_file(name.clone(), options)?;
            zip.write_all(&filtered)?;
        } else if force_recalc && name == WORKBOOK_PART {
            let mut buf = Vec::new();
            file.read_to_end(&mut buf)?;
            zip.start_file(name.clone(), options)?;
            zip.write_all(&force_full_calc_on_load(&buf)?)?;
        } else {
            zip.raw_copy_file(file)?;
        }
    }

    zip.finish()?;
    tracing::debug!(
        cells = outcome.cells_written,
        formulas_replaced = outcome.formulas_replaced,
        formulas_detached = outcome.formulas_detached,
        "workbook patched"
    );
    Ok(outcome)
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    let mut file = archive
        .by_name(name)
        .map_err(|_| BoqError::WorkbookRead(format!("missing part: {}", name)))?;
    let mut buf = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

fn local_name(name: &[u8]) -> &[u8] {
    match name.iter().position(|b| *b == b':') {
        Some(idx) => &name[idx + 1..],
        None => name,
    }
}

/// "x:sheetData" → "x:"
fn element_prefix(name: &[u8]) -> String {
    match name.iter().position(|b| *b == b':') {
        Some(idx) => format!("{}:", String::from_utf8_lossy(&name[..idx])),
        None => String::new(),
    }
}

fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

/// シート名 → ワークシートのパート名
pub fn resolve_sheet_parts<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<HashMap<String, String>> {
    let workbook = read_part(archive, WORKBOOK_PART)?;
    let rels = read_part(archive, WORKBOOK_RELS_PART)?;

    let mut sheets: Vec<(String, String)> = Vec::new();
    let mut reader = Reader::from_reader(workbook.as_slice());
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sheet" => {
                let mut name = None;
                let mut rel_id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    let key = attr.key.as_ref();
                    if key == b"name" {
                        name = Some(attr.unescape_value()?.into_owned());
                    } else if local_name(key) == b"id" && key.contains(&b':') {
                        rel_id = Some(attr.unescape_value()?.into_owned());
                    }
                }
                if let (Some(name), Some(rel_id)) = (name, rel_id) {
                    sheets.push((name, rel_id));
                }
            }
            _ => {}
        }
        buf.clear();
    }

    let mut targets: HashMap<String, String> = HashMap::new();
    let mut reader = Reader::from_reader(rels.as_slice());
    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) if local_name(e.name().as_ref()) == b"Relationship" => {
                if let (Some(id), Some(target)) = (attr_value(e, b"Id")?, attr_value(e, b"Target")?) {
                    let part = match target.strip_prefix('/') {
                        Some(absolute) => absolute.to_string(),
                        None => format!("xl/{}", target.trim_start_matches("./")),
                    };
                    targets.insert(id, part);
                }
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets
        .into_iter()
        .filter_map(|(name, rel_id)| targets.get(&rel_id).map(|part| (name, part.clone())))
        .collect())
}

/// "AB12" → (12, 28)
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }
    let mut col: u32 = 0;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col.checked_mul(26)? + (ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1);
    }
    let row = digits.parse::<u32>().ok()?;
    Some((row, col))
}

#[derive(Debug, Default, Clone, Copy)]
struct WorksheetStats {
    cells_written: usize,
    formulas_replaced: usize,
    formulas_detached: usize,
}

struct RowState {
    row: u32,
    cells: BTreeMap<u32, CellValue>,
    last_col: u32,
}

struct SheetWriter<W: Write> {
    writer: Writer<W>,
    prefix: String,
    stats: WorksheetStats,
}

impl<W: Write> SheetWriter<W> {
    fn tag(&self, local: &str) -> String {
        format!("{}{}", self.prefix, local)
    }

    fn write_cell(&mut self, row: u32, col: u32, style: Option<&str>, value: &CellValue) -> Result<()> {
        let c_tag = self.tag("c");
        let reference = format!("{}{}", column_letter(col), row);
        let mut cell = BytesStart::new(c_tag.as_str());
        cell.push_attribute(("r", reference.as_str()));
        if let Some(style) = style {
            cell.push_attribute(("s", style));
        }

        match value {
            CellValue::Number(number) => {
                let v_tag = self.tag("v");
                let text = number.normalize().to_string();
                self.writer.write_event(Event::Start(cell))?;
                self.writer.write_event(Event::Start(BytesStart::new(v_tag.as_str())))?;
                self.writer.write_event(Event::Text(BytesText::new(&text)))?;
                self.writer.write_event(Event::End(BytesEnd::new(v_tag.as_str())))?;
            }
            CellValue::Text(text) => {
                let is_tag = self.tag("is");
                let t_tag = self.tag("t");
                cell.push_attribute(("t", "inlineStr"));
                self.writer.write_event(Event::Start(cell))?;
                self.writer.write_event(Event::Start(BytesStart::new(is_tag.as_str())))?;
                self.writer.write_event(Event::Start(BytesStart::new(t_tag.as_str())))?;
                self.writer.write_event(Event::Text(BytesText::new(text)))?;
                self.writer.write_event(Event::End(BytesEnd::new(t_tag.as_str())))?;
                self.writer.write_event(Event::End(BytesEnd::new(is_tag.as_str())))?;
            }
        }
        self.writer.write_event(Event::End(BytesEnd::new(c_tag.as_str())))?;
        self.stats.cells_written += 1;
        Ok(())
    }

    fn write_cells(&mut self, row: u32, cells: &BTreeMap<u32, CellValue>) -> Result<()> {
        for (col, value) in cells {
            self.write_cell(row, *col, None, value)?;
        }
        Ok(())
    }

    /// 列番号 < limit の保留セルを書き出す
    fn flush_cells_before(&mut self, state: &mut RowState, limit: u32) -> Result<()> {
        let rest = state.cells.split_off(&limit);
        let before = std::mem::replace(&mut state.cells, rest);
        self.write_cells(state.row, &before)
    }

    fn write_new_row(&mut self, row: u32, cells: &BTreeMap<u32, CellValue>) -> Result<()> {
        let row_tag = self.tag("row");
        let row_number = row.to_string();
        let mut start = BytesStart::new(row_tag.as_str());
        start.push_attribute(("r", row_number.as_str()));
        self.writer.write_event(Event::Start(start))?;
        self.write_cells(row, cells)?;
        self.writer.write_event(Event::End(BytesEnd::new(row_tag.as_str())))?;
        Ok(())
    }

    /// 行番号 < limit（None なら全部）の保留行を書き出す
    fn flush_rows_before(&mut self, pending: &mut RowPatches, limit: Option<u32>) -> Result<()> {
        let before = match limit {
            Some(limit) => {
                let rest = pending.split_off(&limit);
                std::mem::replace(pending, rest)
            }
            None => std::mem::take(pending),
        };
        for (row, cells) in &before {
            self.write_new_row(*row, cells)?;
        }
        Ok(())
    }
}

/// spans 属性は書き込み後に不正確になるので外す
fn row_without_spans(e: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut row = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"spans" {
            continue;
        }
        row.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    Ok(row.into_owned())
}

/// 書き込み先セルにある共有数式マスター（`ref` 付き）の si を集める
fn overwritten_shared_masters(xml: &[u8], rows: &RowPatches) -> Result<HashSet<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut masters = HashSet::new();
    let mut row = 0u32;
    let mut col = 0u32;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Eof => break,
            Event::Start(ref e) | Event::Empty(ref e) => match local_name(e.name().as_ref()) {
                b"row" => {
                    row = attr_value(e, b"r")?.and_then(|r| r.parse().ok()).unwrap_or(row + 1);
                    col = 0;
                }
                b"c" => {
                    col = attr_value(e, b"r")?
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(_, col)| col)
                        .unwrap_or(col + 1);
                }
                b"f" => {
                    let targeted = rows.get(&row).is_some_and(|cells| cells.contains_key(&col));
                    let is_master = attr_value(e, b"t")?.as_deref() == Some("shared") && attr_value(e, b"ref")?.is_some();
                    if targeted && is_master {
                        if let Some(si) = attr_value(e, b"si")? {
                            masters.insert(si);
                        }
                    }
                }
                _ => {}
            },
            _ => {}
        }
        buf.clear();
    }
    Ok(masters)
}

/// マスターが上書きされる共有数式の子（`ref` 無し）か
fn is_orphaned_shared_child(f: &BytesStart<'_>, masters: &HashSet<String>) -> bool {
    if masters.is_empty() {
        return false;
    }
    let mut is_shared = false;
    let mut has_ref = false;
    let mut si = None;
    for attr in f.attributes().flatten() {
        match attr.key.as_ref() {
            b"t" if attr.value.as_ref() == b"shared" => is_shared = true,
            b"ref" => has_ref = true,
            b"si" => si = Some(String::from_utf8_lossy(&attr.value).into_owned()),
            _ => {}
        }
    }
    is_shared && !has_ref && si.is_some_and(|si| masters.contains(&si))
}

/// 置き換えるセルの子要素を読み飛ばし、数式を含んでいたか返す
fn skip_cell_children<R: std::io::BufRead>(reader: &mut Reader<R>, buf: &mut Vec<u8>) -> Result<bool> {
    let mut depth = 0usize;
    let mut had_formula = false;
    loop {
        buf.clear();
        match reader.read_event_into(buf)? {
            Event::Eof => return Err(BoqError::WorkbookRead("unexpected end of worksheet xml".into())),
            Event::Start(ref e) => {
                if local_name(e.name().as_ref()) == b"f" {
                    had_formula = true;
                }
                depth += 1;
            }
            Event::Empty(ref e) => {
                if local_name(e.name().as_ref()) == b"f" {
                    had_formula = true;
                }
            }
            Event::End(ref e) => {
                if depth == 0 && local_name(e.name().as_ref()) == b"c" {
                    return Ok(had_formula);
                }
                depth = depth.saturating_sub(1);
            }
            _ => {}
        }
    }
}

fn patch_worksheet_xml(xml: &[u8], rows: &RowPatches) -> Result<(Vec<u8>, WorksheetStats)> {
    let masters = overwritten_shared_masters(xml, rows)?;
    let mut pending = rows.clone();
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);

    let mut out = SheetWriter {
        writer: Writer::new(Vec::with_capacity(xml.len() + 256)),
        prefix: String::new(),
        stats: WorksheetStats::default(),
    };

    let mut buf = Vec::new();
    let mut skip_buf = Vec::new();
    let mut in_sheet_data = false;
    let mut row_state: Option<RowState> = None;
    let mut in_cell = false;
    let mut last_row = 0u32;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,

            Event::Start(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                out.prefix = element_prefix(e.name().as_ref());
                in_sheet_data = true;
                out.writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                out.prefix = element_prefix(e.name().as_ref());
                if pending.is_empty() {
                    out.writer.write_event(Event::Empty(e.to_owned()))?;
                } else {
                    let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    out.writer.write_event(Event::Start(e.to_owned()))?;
                    out.flush_rows_before(&mut pending, None)?;
                    out.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                }
            }
            Event::End(ref e) if local_name(e.name().as_ref()) == b"sheetData" => {
                out.flush_rows_before(&mut pending, None)?;
                in_sheet_data = false;
                out.writer.write_event(Event::End(e.to_owned()))?;
            }

            Event::Start(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row = attr_value(e, b"r")?
                    .and_then(|r| r.parse::<u32>().ok())
                    .unwrap_or(last_row + 1);
                last_row = row;
                out.flush_rows_before(&mut pending, Some(row))?;
                match pending.remove(&row) {
                    Some(cells) => {
                        out.writer.write_event(Event::Start(row_without_spans(e)?))?;
                        row_state = Some(RowState { row, cells, last_col: 0 });
                    }
                    None => {
                        out.writer.write_event(Event::Start(e.to_owned()))?;
                        row_state = None;
                    }
                }
            }
            Event::Empty(ref e) if in_sheet_data && local_name(e.name().as_ref()) == b"row" => {
                let row = attr_value(e, b"r")?
                    .and_then(|r| r.parse::<u32>().ok())
                    .unwrap_or(last_row + 1);
                last_row = row;
                out.flush_rows_before(&mut pending, Some(row))?;
                match pending.remove(&row) {
                    Some(cells) => {
                        let tag = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                        out.writer.write_event(Event::Start(row_without_spans(e)?))?;
                        out.write_cells(row, &cells)?;
                        out.writer.write_event(Event::End(BytesEnd::new(tag.as_str())))?;
                    }
                    None => out.writer.write_event(Event::Empty(e.to_owned()))?,
                }
            }
            Event::End(ref e) if in_sheet_data && !in_cell && local_name(e.name().as_ref()) == b"row" => {
                if let Some(state) = row_state.take() {
                    out.write_cells(state.row, &state.cells)?;
                }
                out.writer.write_event(Event::End(e.to_owned()))?;
            }

            Event::Start(ref e) | Event::Empty(ref e)
                if !in_cell && local_name(e.name().as_ref()) == b"c" && row_state.is_some() =>
            {
                let is_empty = matches!(event, Event::Empty(_));
                if let Some(state) = row_state.as_mut() {
                    let col = attr_value(e, b"r")?
                        .and_then(|r| parse_cell_ref(&r))
                        .map(|(_, col)| col)
                        .unwrap_or(state.last_col + 1);
                    state.last_col = col;
                    out.flush_cells_before(state, col)?;
                    match state.cells.remove(&col) {
                        Some(value) => {
                            let style = attr_value(e, b"s")?;
                            if !is_empty && skip_cell_children(&mut reader, &mut skip_buf)? {
                                out.stats.formulas_replaced += 1;
                            }
                            out.write_cell(state.row, col, style.as_deref(), &value)?;
                        }
                        None if is_empty => out.writer.write_event(Event::Empty(e.to_owned()))?,
                        None => {
                            in_cell = true;
                            out.writer.write_event(Event::Start(e.to_owned()))?;
                        }
                    }
                }
            }
            Event::End(ref e) if in_cell && local_name(e.name().as_ref()) == b"c" => {
                in_cell = false;
                out.writer.write_event(Event::End(e.to_owned()))?;
            }

            // キャッシュ値 <v> は残す
            Event::Empty(ref e)
                if in_sheet_data && local_name(e.name().as_ref()) == b"f" && is_orphaned_shared_child(e, &masters) =>
            {
                out.stats.formulas_detached += 1;
            }
            Event::Start(ref e)
                if in_sheet_data && local_name(e.name().as_ref()) == b"f" && is_orphaned_shared_child(e, &masters) =>
            {
                reader.read_to_end_into(e.name(), &mut skip_buf)?;
                out.stats.formulas_detached += 1;
            }

            // 行内のセル以外の要素（extLst 等）の前に残りのセルを書く
            Event::Start(_) | Event::Empty(_) if row_state.is_some() && !in_cell => {
                if let Some(state) = row_state.as_mut() {
                    let remaining = std::mem::take(&mut state.cells);
                    out.write_cells(state.row, &remaining)?;
                }
                out.writer.write_event(event.into_owned())?;
            }

            ev => out.writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    let stats = out.stats;
    Ok((out.writer.into_inner(), stats))
}

/// calcPr に fullCalcOnLoad="1" を付ける（無ければ挿入）
fn force_full_calc_on_load(workbook_xml: &[u8]) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(workbook_xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(workbook_xml.len() + 64));

    let mut buf = Vec::new();
    let mut saw_calc_pr = false;
    let mut depth = 0usize;
    let mut prefix = String::new();

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if depth == 0 && local_name(e.name().as_ref()) == b"workbook" => {
                prefix = element_prefix(e.name().as_ref());
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                writer.write_event(Event::Empty(patched_calc_pr(e)?))?;
            }
            Event::Start(ref e) if local_name(e.name().as_ref()) == b"calcPr" => {
                saw_calc_pr = true;
                depth += 1;
                writer.write_event(Event::Start(patched_calc_pr(e)?))?;
            }
            Event::Start(ref e) | Event::Empty(ref e)
                if depth == 1 && !saw_calc_pr && is_after_calc_pr(local_name(e.name().as_ref())) =>
            {
                saw_calc_pr = true;
                write_calc_pr(&mut writer, &prefix)?;
                if matches!(event, Event::Start(_)) {
                    depth += 1;
                }
                writer.write_event(event.clone().into_owned())?;
            }
            Event::End(ref e) if depth == 1 && local_name(e.name().as_ref()) == b"workbook" => {
                if !saw_calc_pr {
                    saw_calc_pr = true;
                    write_calc_pr(&mut writer, &prefix)?;
                }
                depth -= 1;
                writer.write_event(Event::End(e.to_owned()))?;
            }
            Event::Start(ref e) => {
                depth += 1;
                writer.write_event(Event::Start(e.to_owned()))?;
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                writer.write_event(Event::End(e.to_owned()))?;
            }
            other => writer.write_event(other.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn is_after_calc_pr(local: &[u8]) -> bool {
    AFTER_CALC_PR.iter().any(|name| *name == local)
}

fn write_calc_pr<W: Write>(writer: &mut Writer<W>, prefix: &str) -> Result<()> {
    let tag = format!("{}calcPr", prefix);
    let mut calc_pr = BytesStart::new(tag.as_str());
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    writer.write_event(Event::Empty(calc_pr))?;
    Ok(())
}

fn patched_calc_pr(e: &BytesStart<'_>) -> Result<BytesStart<'static>> {
    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
    let mut calc_pr = BytesStart::new(name);
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == b"fullCalcOnLoad" {
            continue;
        }
        calc_pr.push_attribute((attr.key.as_ref(), attr.value.as_ref()));
    }
    calc_pr.push_attribute(("fullCalcOnLoad", "1"));
    Ok(calc_pr.into_owned())
}

/// 指定要素のうち predicate に当たるものを取り除く
fn remove_elements<F>(xml: &[u8], element: &[u8], predicate: F) -> Result<Vec<u8>>
where
    F: Fn(&BytesStart<'_>) -> Result<bool>,
{
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(false);
    let mut writer = Writer::new(Vec::with_capacity(xml.len()));

    let mut buf = Vec::new();
    let mut skipping = false;

    loop {
        let event = reader.read_event_into(&mut buf)?;
        match event {
            Event::Eof => break,
            Event::Start(ref e) if local_name(e.name().as_ref()) == element => {
                if predicate(e)? {
                    skipping = true;
                } else {
                    writer.write_event(Event::Start(e.to_owned()))?;
                }
            }
            Event::Empty(ref e) if local_name(e.name().as_ref()) == element => {
                if !predicate(e)? {
                    writer.write_event(Event::Empty(e.to_owned()))?;
                }
            }
            Event::End(ref e) if skipping && local_name(e.name().as_ref()) == element => {
                skipping = false;
            }
            _ if skipping => {}
            ev => writer.write_event(ev.into_owned())?,
        }
        buf.clear();
    }

    Ok(writer.into_inner())
}

fn remove_calc_chain_override(xml: &[u8]) -> Result<Vec<u8>> {
    remove_elements(xml, b"Override", |e| {
        Ok(attr_value(e, b"PartName")?.is_some_and(|p| p.ends_with("calcChain.xml")))
    })
}

fn remove_calc_chain_relationship(xml: &[u8]) -> Result<Vec<u8>> {
    remove_elements(xml, b"Relationship", |e| {
        let is_type = attr_value(e, b"Type")?.is_some_and(|t| t.ends_with("/calcChain"));
        let is_target = attr_value(e, b"Target")?.is_some_and(|t| t.ends_with("calcChain.xml"));
        Ok(is_type || is_target)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(cells: &[(u32, u32, CellValue)]) -> RowPatches {
        let mut rows = RowPatches::new();
        for (row, col, value) in cells {
            rows.entry(*row).or_default().insert(*col, value.clone());
        }
        rows
    }

    fn patch(xml: &str, cells: &[(u32, u32, CellValue)]) -> (String, WorksheetStats) {
        let (bytes, stats) = patch_worksheet_xml(xml.as_bytes(), &rows(cells)).unwrap();
        (String::from_utf8(bytes).unwrap(), stats)
    }

    fn has_part_file(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .unwrap()
            .any(|entry| entry.unwrap().path().extension().is_some_and(|e| e == "part"))
    }

    const SHEET: &str = r#"<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData><row r="2" spans="1:3"><c r="A2" t="s"><v>0</v></c><c r="C2" s="4"><v>10</v></c></row><row r="5"><c r="B5" s="2"><f>SUM(A1:A4)</f><v>3</v></c></row></sheetData></worksheet>"#;

    fn build_source(path: &Path) {
        let mut workbook = rust_xlsxwriter::Workbook::new();
        let sheet = workbook.add_worksheet();
        sheet.set_name("Int").unwrap();
        sheet.write_string(3, 0, "ลำดับ").unwrap();
        sheet.write_string(4, 2, "งานทาสี").unwrap();
        sheet.write_number(4, 3, 10.0).unwrap();
        sheet.write_formula(4, 7, "=F5+G5").unwrap();
        let other = workbook.add_worksheet();
        other.set_name("Sum").unwrap();
        other.write_string(0, 0, "untouched").unwrap();
        workbook.save(path).unwrap();
    }

    #[test]
    fn test_patch_workbook_roundtrip() {
        use calamine::{open_workbook, Data, Reader as _, Xlsx};

        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("source.xlsx");
        let output = dir.path().join("out.xlsx");
        build_source(&source);

        let outcome = patch_workbook(
            &source,
            &output,
            &[SheetPatch {
                sheet_name: "Int".into(),
                cells: vec![
                    CellWrite::number(5, 6, Decimal::from(500)),
                    CellWrite::number(5, 7, Decimal::from(300)),
                    CellWrite::number(5, 8, Decimal::from(800)),
                    CellWrite::text(4, 9, "Markup 100%"),
                ],
            }],
        )
        .unwrap();
        assert_eq!(outcome.cells_written, 4);
        assert_eq!(outcome.formulas_replaced, 1);
        assert!(!has_part_file(dir.path()));

        let mut workbook: Xlsx<_> = open_workbook(&output).unwrap();
        let range = workbook.worksheet_range("Int").unwrap();
        assert_eq!(range.get_value((4, 5)), Some(&Data::Float(500.0)));
        assert_eq!(range.get_value((4, 7)), Some(&Data::Float(800.0)));
        assert_eq!(range.get_value((4, 2)), Some(&Data::String("งานทาสี".into())));
        assert_eq!(range.get_value((3, 8)), Some(&Data::String("Markup 100%".into())));

        let other = workbook.worksheet_range("Sum").unwrap();
        assert_eq!(other.get_value((0, 0)), Some(&Data::String("untouched".into())));
    }

    #[test]
    fn test_unknown_sheet_leaves_no_output() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("source.xlsx");
        let output = dir.path().join("out.xlsx");
        build_source(&source);

        let result = patch_workbook(
            &source,
            &output,
            &[SheetPatch { sheet_name: "Missing".into(), cells: vec![CellWrite::number(1, 1, Decimal::ONE)] }],
        );
        assert!(matches!(result, Err(BoqError::WorkbookWrite(_))));
        assert!(!output.exists());
        assert!(!has_part_file(dir.path()));
    }

    #[test]
    fn test_parse_cell_ref() {
        assert_eq!(parse_cell_ref("A1"), Some((1, 1)));
        assert_eq!(parse_cell_ref("H12"), Some((12, 8)));
        assert_eq!(parse_cell_ref("AB7"), Some((7, 28)));
        assert_eq!(parse_cell_ref("12"), None);
        assert_eq!(parse_cell_ref("A"), None);
    }

    #[test]
    fn test_replace_keeps_style() {
        let (xml, stats) = patch(SHEET, &[(2, 3, CellValue::Number(Decimal::from(1600)))]);
        assert!(xml.contains(r#"<c r="C2" s="4"><v>1600</v></c>"#), "{}", xml);
        assert!(xml.contains(r#"<c r="A2" t="s"><v>0</v></c>"#));
        assert!(!xml.contains("spans"));
        assert_eq!(stats.cells_written, 1);
        assert_eq!(stats.formulas_replaced, 0);
    }

    #[test]
    fn test_insert_cell_in_column_order() {
        let (xml, _) = patch(SHEET, &[(2, 2, CellValue::Number(Decimal::new(5005, 1))), (2, 8, CellValue::Number(Decimal::from(800)))]);
        let a = xml.find(r#"r="A2""#).unwrap();
        let b = xml.find(r#"<c r="B2"><v>500.5</v></c>"#).unwrap();
        let c = xml.find(r#"r="C2""#).unwrap();
        let h = xml.find(r#"<c r="H2"><v>800</v></c>"#).unwrap();
        assert!(a < b && b < c && c < h);
    }

    #[test]
    fn test_insert_rows_in_order() {
        let (xml, stats) = patch(
            SHEET,
            &[
                (1, 1, CellValue::Text("Markup 100%".into())),
                (3, 6, CellValue::Number(Decimal::from(500))),
                (9, 6, CellValue::Number(Decimal::from(1))),
            ],
        );
        let r1 = xml.find(r#"<row r="1">"#).unwrap();
        let r2 = xml.find(r#"<row r="2""#).unwrap();
        let r3 = xml.find(r#"<row r="3">"#).unwrap();
        let r5 = xml.find(r#"<row r="5""#).unwrap();
        let r9 = xml.find(r#"<row r="9">"#).unwrap();
        assert!(r1 < r2 && r2 < r3 && r3 < r5 && r5 < r9);
        assert!(xml.contains(r#"<c r="A1" t="inlineStr"><is><t>Markup 100%</t></is></c>"#));
        assert_eq!(stats.cells_written, 3);
    }

    #[test]
    fn test_formula_replacement_counted() {
        let (xml, stats) = patch(SHEET, &[(5, 2, CellValue::Number(Decimal::from(7)))]);
        assert!(xml.contains(r#"<c r="B5" s="2"><v>7</v></c>"#));
        assert!(!xml.contains("SUM(A1:A4)"));
        assert_eq!(stats.formulas_replaced, 1);
    }

    const SHARED_SHEET: &str = r#"<worksheet><sheetData><row r="6"><c r="F6"><v>0</v></c><c r="H6"><f t="shared" ref="H6:H8" si="0">F6+G6</f><v>0</v></c></row><row r="7"><c r="H7"><f t="shared" si="0"/><v>5</v></c></row><row r="8"><c r="H8"><f t="shared" si="0"></f><v>7</v></c><c r="I8"><f t="shared" ref="I8:I9" si="1">H8*2</f><v>14</v></c></row><row r="9"><c r="I9"><f t="shared" si="1"/><v>0</v></c></row></sheetData></worksheet>"#;

    #[test]
    fn test_overwritten_shared_master_detaches_children() {
        let (xml, stats) = patch(SHARED_SHEET, &[(6, 8, CellValue::Number(Decimal::from(800)))]);
        assert!(xml.contains(r#"<c r="H6"><v>800</v></c>"#), "{}", xml);
        // 子セルは数式を外してキャッシュ値を残す
        assert!(xml.contains(r#"<c r="H7"><v>5</v></c>"#), "{}", xml);
        assert!(xml.contains(r#"<c r="H8"><v>7</v></c>"#), "{}", xml);
        assert!(!xml.contains(r#"si="0""#), "{}", xml);
        // 別グループはそのまま
        assert!(xml.contains(r#"<f t="shared" ref="I8:I9" si="1">H8*2</f>"#));
        assert!(xml.contains(r#"<c r="I9"><f t="shared" si="1"/><v>0</v></c>"#));
        assert_eq!(stats.formulas_replaced, 1);
        assert_eq!(stats.formulas_detached, 2);
    }

    #[test]
    fn test_overwritten_shared_child_keeps_master() {
        let (xml, stats) = patch(SHARED_SHEET, &[(7, 8, CellValue::Number(Decimal::from(9)))]);
        assert!(xml.contains(r#"<f t="shared" ref="H6:H8" si="0">F6+G6</f>"#), "{}", xml);
        assert!(xml.contains(r#"<c r="H7"><v>9</v></c>"#));
        assert!(xml.contains(r#"<c r="H8"><f t="shared" si="0"></f><v>7</v></c>"#), "{}", xml);
        assert_eq!(stats.formulas_detached, 0);
    }

    #[test]
    fn test_concurrent_patches_to_same_output() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let source = dir.path().join("source.xlsx");
        build_source(&source);
        let barrier = std::sync::Barrier::new(2);

        std::thread::scope(|scope| {
            for value in [100i64, 200] {
                let (source, barrier) = (&source, &barrier);
                let output = dir.path().join(format!("out_{}.xlsx", value));
                scope.spawn(move || {
                    barrier.wait();
                    let patches = [SheetPatch {
                        sheet_name: "Int".into(),
                        cells: vec![CellWrite::number(5, 8, Decimal::from(value))],
                    }];
                    patch_workbook(source, &output, &patches).unwrap();
                });
            }
        });
        assert!(!has_part_file(dir.path()));
        assert!(dir.path().join("out_100.xlsx").exists());
        assert!(dir.path().join("out_200.xlsx").exists());
    }

    #[test]
    fn test_empty_sheet_data_expanded() {
        let xml = r#"<worksheet><sheetData/></worksheet>"#;
        let (out, _) = patch(xml, &[(4, 2, CellValue::Number(Decimal::from(3)))]);
        assert!(out.contains(r#"<sheetData><row r="4"><c r="B4"><v>3</v></c></row></sheetData>"#), "{}", out);
    }

    #[test]
    fn test_empty_row_expanded() {
        let xml = r#"<worksheet><sheetData><row r="3"/></sheetData></worksheet>"#;
        let (out, _) = patch(xml, &[(3, 1, CellValue::Number(Decimal::ONE))]);
        assert!(out.contains(r#"<row r="3"><c r="A3"><v>1</v></c></row>"#), "{}", out);
    }

    #[test]
    fn test_text_is_escaped() {
        let xml = r#"<worksheet><sheetData></sheetData></worksheet>"#;
        let (out, _) = patch(xml, &[(1, 1, CellValue::Text("A & B".into()))]);
        assert!(out.contains("A &amp; B"));
    }

    #[test]
    fn test_force_full_calc_existing_calc_pr() {
        let xml = br#"<workbook><sheets/><calcPr calcId="124519" fullCalcOnLoad="0"/></workbook>"#;
        let out = String::from_utf8(force_full_calc_on_load(xml).unwrap()).unwrap();
        assert!(out.contains(r#"<calcPr calcId="124519" fullCalcOnLoad="1"/>"#), "{}", out);
    }

    #[test]
    fn test_force_full_calc_inserted_before_ext_lst() {
        let xml = br#"<workbook><sheets/><extLst><ext/></extLst></workbook>"#;
        let out = String::from_utf8(force_full_calc_on_load(xml).unwrap()).unwrap();
        assert!(out.contains(r#"<calcPr fullCalcOnLoad="1"/><extLst>"#), "{}", out);
    }

    #[test]
    fn test_remove_calc_chain_parts() {
        let ct = br#"<Types><Override PartName="/xl/calcChain.xml" ContentType="x"/><Override PartName="/xl/workbook.xml" ContentType="y"/></Types>"#;
        let out = String::from_utf8(remove_calc_chain_override(ct).unwrap()).unwrap();
        assert!(!out.contains("calcChain"));
        assert!(out.contains("/xl/workbook.xml"));

        let rels = br#"<Relationships><Relationship Id="rId9" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/calcChain" Target="calcChain.xml"/><Relationship Id="rId1" Type="t" Target="worksheets/sheet1.xml"/></Relationships>"#;
        let out = String::from_utf8(remove_calc_chain_relationship(rels).unwrap()).unwrap();
        assert!(!out.contains("rId9"));
        assert!(out.contains("rId1"));
    }
}
