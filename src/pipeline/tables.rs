//! Table reconstruction from token geometry.
//!
//! Words are grouped into visual rows, rows are split into cells at wide
//! horizontal gaps, and runs of multi-cell rows whose cells start at the
//! same x positions become tables.

use super::types::{BoundingBox, OcrToken, PixelBuffer, TableDetector, TableRegion};
use super::RecognitionError;

#[derive(Debug, Clone)]
pub struct TableConfig {
    /// Consecutive multi-cell rows needed for a table.
    pub min_rows: usize,
    pub min_columns: usize,
    /// A gap wider than this many median word heights separates cells.
    pub gap_factor: f32,
    /// Left edges within this many median word heights share a column.
    pub column_tolerance_factor: f32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            min_rows: 2,
            min_columns: 2,
            gap_factor: 1.5,
            column_tolerance_factor: 1.0,
        }
    }
}

/// Shipped [`TableDetector`]: needs only tokens, never the pixels.
#[derive(Debug, Clone, Default)]
pub struct LayoutTableDetector {
    config: TableConfig,
}

impl LayoutTableDetector {
    pub fn new(config: TableConfig) -> Self {
        Self { config }
    }
}

impl TableDetector for LayoutTableDetector {
    fn detect_tables(
        &self,
        _image: &PixelBuffer,
        tokens: &[OcrToken],
    ) -> Result<Vec<TableRegion>, RecognitionError> {
        Ok(find_tables(tokens, &self.config))
    }
}

#[derive(Debug, Clone)]
struct Cell {
    text: String,
    bbox: BoundingBox,
}

/// Reconstruct every table on the page, top to bottom.
pub fn find_tables(tokens: &[OcrToken], config: &TableConfig) -> Vec<TableRegion> {
    let words: Vec<&OcrToken> = tokens.iter().filter(|t| !t.text.trim().is_empty()).collect();
    if words.is_empty() {
        return Vec::new();
    }

    let unit = median_height(&words);
    let rows: Vec<Vec<Cell>> = visual_rows(words)
        .into_iter()
        .map(|row| split_cells(&row, config.gap_factor * unit))
        .collect();

    let mut tables = Vec::new();
    let mut run: Vec<&Vec<Cell>> = Vec::new();
    for row in &rows {
        if row.len() >= config.min_columns.max(1) {
            run.push(row);
        } else {
            flush_run(&mut run, config, unit, &mut tables);
        }
    }
    flush_run(&mut run, config, unit, &mut tables);

    tracing::debug!(tables = tables.len(), rows = rows.len(), "Table detection complete");
    tables
}

fn flush_run(
    run: &mut Vec<&Vec<Cell>>,
    config: &TableConfig,
    unit: f32,
    tables: &mut Vec<TableRegion>,
) {
    if run.len() >= config.min_rows {
        if let Some(table) = build_table(run, config, unit) {
            tables.push(table);
        }
    }
    run.clear();
}

fn median_height(words: &[&OcrToken]) -> f32 {
    let mut heights: Vec<u32> = words.iter().map(|t| t.height).collect();
    heights.sort_unstable();
    (heights[heights.len() / 2] as f32).max(1.0)
}

/// Group words whose vertical centers fall inside the current row's band.
fn visual_rows(mut words: Vec<&OcrToken>) -> Vec<Vec<&OcrToken>> {
    let center = |t: &OcrToken| t.top as f32 + t.height as f32 / 2.0;
    words.sort_by(|a, b| center(*a).total_cmp(&center(*b)).then(a.left.cmp(&b.left)));

    let mut rows: Vec<Vec<&OcrToken>> = Vec::new();
    let mut band: Option<(f32, f32)> = None;
    for word in words {
        let c = center(word);
        match band {
            Some((band_top, band_bottom)) if c >= band_top && c <= band_bottom => {
                band = Some((band_top.min(word.top as f32), band_bottom.max(bottom(word))));
                if let Some(row) = rows.last_mut() {
                    row.push(word);
                }
            }
            _ => {
                band = Some((word.top as f32, bottom(word)));
                rows.push(vec![word]);
            }
        }
    }

    for row in &mut rows {
        row.sort_by_key(|t| t.left);
    }
    rows
}

fn bottom(t: &OcrToken) -> f32 {
    t.top.saturating_add(t.height) as f32
}

fn split_cells(row: &[&OcrToken], max_gap: f32) -> Vec<Cell> {
    let mut cells: Vec<Cell> = Vec::new();
    for word in row {
        let bbox = word.bbox();
        match cells.last_mut() {
            Some(cell) if (bbox.x as f32 - cell.bbox.right() as f32) <= max_gap => {
                cell.text.push(' ');
                cell.text.push_str(word.text.trim());
                cell.bbox = cell.bbox.union(&bbox);
            }
            _ => cells.push(Cell {
                text: word.text.trim().to_string(),
                bbox,
            }),
        }
    }
    cells
}

/// Column anchors from clusters of cell left edges, plus how many of them
/// are started by at least two rows.
fn column_anchors(rows: &[&Vec<Cell>], tolerance: f32) -> (Vec<f32>, usize) {
    let mut lefts: Vec<(u32, usize)> = rows
        .iter()
        .enumerate()
        .flat_map(|(r, cells)| cells.iter().map(move |c| (c.bbox.x, r)))
        .collect();
    lefts.sort_unstable();

    let mut anchors = Vec::new();
    let mut aligned = 0;
    let mut i = 0;
    while i < lefts.len() {
        let start = lefts[i].0 as f32;
        let mut j = i;
        let mut row_ids: Vec<usize> = Vec::new();
        while j < lefts.len() && lefts[j].0 as f32 - start <= tolerance {
            row_ids.push(lefts[j].1);
            j += 1;
        }
        row_ids.sort_unstable();
        row_ids.dedup();
        if row_ids.len() >= 2 {
            aligned += 1;
        }
        let sum: f32 = lefts[i..j].iter().map(|(x, _)| *x as f32).sum();
        anchors.push(sum / (j - i) as f32);
        i = j;
    }
    (anchors, aligned)
}

fn nearest_column(anchors: &[f32], x: u32) -> usize {
    anchors
        .iter()
        .enumerate()
        .min_by(|a, b| (a.1 - x as f32).abs().total_cmp(&(b.1 - x as f32).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn build_table(rows: &[&Vec<Cell>], config: &TableConfig, unit: f32) -> Option<TableRegion> {
    let (anchors, aligned) = column_anchors(rows, config.column_tolerance_factor * unit);
    if aligned < config.min_columns {
        return None;
    }

    let mut grid: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    let mut boxes: Vec<BoundingBox> = Vec::new();
    for cells in rows {
        let mut slots = vec![String::new(); anchors.len()];
        for cell in cells.iter() {
            let slot = &mut slots[nearest_column(&anchors, cell.bbox.x)];
            if !slot.is_empty() {
                slot.push(' ');
            }
            slot.push_str(&cell.text);
            boxes.push(cell.bbox);
        }
        grid.push(slots);
    }

    let bbox = BoundingBox::enclosing(&boxes)?;
    Some(TableRegion {
        html: render_html(&grid),
        bbox,
        rows: grid.len(),
        columns: anchors.len(),
    })
}

fn render_html(grid: &[Vec<String>]) -> String {
    let mut html = String::from("<table>");
    for row in grid {
        html.push_str("<tr>");
        for cell in row {
            html.push_str("<td>");
            html.push_str(&escape_html(cell));
            html.push_str("</td>");
        }
        html.push_str("</tr>");
    }
    html.push_str("</table>");
    html
}

/// Escapes HTML special characters.
fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
