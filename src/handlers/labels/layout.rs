//! Label grid geometry and per-cell drawing.

use super::barcode::Barcode;
use super::fields::LabelFields;
use super::fit::{fit_text, FitResult, TextBox};
use super::pdf::{DrawOp, PAGE_HEIGHT};
use crate::error::PipelineResult;

pub const MARGIN: f32 = 36.0;
pub const COLUMNS: usize = 10;
pub const ROWS: usize = 25;
pub const CELL_WIDTH: f32 = 54.0;
pub const CELL_HEIGHT: f32 = 28.8;
pub const SLOTS_PER_PAGE: usize = COLUMNS * ROWS;

const PADDING: f32 = 1.5;
const BARCODE_SIZE: f32 = 12.0;
const BARCODE_ORIGIN: (f32, f32) = (40.5, 15.3);

/// Text region inside a cell, lower-left corner relative to the cell
#[derive(Debug, Clone, Copy)]
struct Region {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
}

impl Region {
    const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn text_box(&self) -> TextBox {
        TextBox::new(self.width, self.height)
    }
}

const LOCATION: Region = Region::new(7.5, 18.8, 32.0, 8.5);
const COORDINATES: Region = Region::new(7.5, 14.6, 32.0, 4.2);
const DATE: Region = Region::new(7.5, 10.4, 45.0, 4.2);
const COLLECTOR: Region = Region::new(7.5, 6.2, 45.0, 4.2);
const METHOD: Region = Region::new(7.5, 2.0, 45.0, 4.2);
/// Field-number strip along the left edge, read bottom to top
const FIELD_NUMBER: Region = Region::new(PADDING, PADDING, 5.0, CELL_HEIGHT - 2.0 * PADDING);

/// Insert a blank slot wherever the collector changes, so printed sheets
/// group each collector's labels
pub fn partition_by_collector(labels: Vec<LabelFields>) -> Vec<Option<LabelFields>> {
    let mut slots = Vec::with_capacity(labels.len());
    let mut previous: Option<String> = None;
    for label in labels {
        if let Some(prev) = &previous {
            if *prev != label.collector_key {
                slots.push(None);
            }
        }
        previous = Some(label.collector_key.clone());
        slots.push(Some(label));
    }
    slots
}

/// Lower-left corner of slot `index` on its page; slots fill rows left to
/// right from the top of the page
pub fn slot_origin(index: usize) -> (f32, f32) {
    let within_page = index % SLOTS_PER_PAGE;
    let row = within_page / COLUMNS;
    let column = within_page % COLUMNS;
    let x = MARGIN + column as f32 * CELL_WIDTH;
    let y = PAGE_HEIGHT - MARGIN - (row + 1) as f32 * CELL_HEIGHT;
    (x, y)
}

fn place_lines(fit: &FitResult, cell: (f32, f32), region: Region, ops: &mut Vec<DrawOp>) {
    let top = cell.1 + region.y + region.height;
    for (i, line) in fit.lines.iter().enumerate() {
        ops.push(DrawOp::Text {
            x: cell.0 + region.x,
            y: top - fit.offset - i as f32 * fit.line_height,
            size: fit.size,
            text: line.clone(),
            rotated: false,
        });
    }
}

fn place_rotated(fit: &FitResult, cell: (f32, f32), ops: &mut Vec<DrawOp>) {
    // glyph tops face the left edge of the strip
    for (i, line) in fit.lines.iter().enumerate() {
        ops.push(DrawOp::Text {
            x: cell.0 + FIELD_NUMBER.x + fit.offset + i as f32 * fit.line_height,
            y: cell.1 + FIELD_NUMBER.y,
            size: fit.size,
            text: line.clone(),
            rotated: true,
        });
    }
}

fn place_barcode(barcode: &Barcode, cell: (f32, f32), ops: &mut Vec<DrawOp>) {
    if barcode.width == 0 {
        return;
    }
    let module = BARCODE_SIZE / barcode.width as f32;
    let left = cell.0 + BARCODE_ORIGIN.0;
    let top = cell.1 + BARCODE_ORIGIN.1 + BARCODE_SIZE;
    for row in 0..barcode.width {
        for column in 0..barcode.width {
            if barcode.is_dark(row, column) {
                ops.push(DrawOp::Square {
                    x: left + column as f32 * module,
                    y: top - (row + 1) as f32 * module,
                    size: module,
                });
            }
        }
    }
}

/// Drawing operations for one label whose cell starts at `origin`
pub fn render_cell(label: &LabelFields, origin: (f32, f32)) -> PipelineResult<Vec<DrawOp>> {
    let mut ops = Vec::new();
    for (text, region) in [
        (&label.location, LOCATION),
        (&label.coordinates, COORDINATES),
        (&label.date, DATE),
        (&label.collector, COLLECTOR),
        (&label.method, METHOD),
    ] {
        if text.is_empty() {
            continue;
        }
        place_lines(&fit_text(text, region.text_box()), origin, region, &mut ops);
    }

    let strip = TextBox::new(FIELD_NUMBER.height, FIELD_NUMBER.width);
    place_rotated(&fit_text(&label.field_number, strip), origin, &mut ops);

    if let Some(barcode) = Barcode::for_field_number(&label.field_number)? {
        place_barcode(&barcode, origin, &mut ops);
    }
    Ok(ops)
}

/// Lay out slots across pages and draw every non-blank slot
pub fn render_pages(slots: &[Option<LabelFields>]) -> PipelineResult<Vec<Vec<DrawOp>>> {
    let mut pages = Vec::with_capacity(slots.len().div_ceil(SLOTS_PER_PAGE));
    for page_slots in slots.chunks(SLOTS_PER_PAGE) {
        let mut ops = Vec::new();
        for (i, slot) in page_slots.iter().enumerate() {
            if let Some(label) = slot {
                ops.extend(render_cell(label, slot_origin(i))?);
            }
        }
        pages.push(ops);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(collector: &str, field_number: &str) -> LabelFields {
        LabelFields {
            location: "USA:OR:Bent Mary's Peak".to_string(),
            coordinates: "44.504 -123.552 1200m".to_string(),
            date: "12.VI.2024".to_string(),
            collector: collector.to_string(),
            method: "net".to_string(),
            field_number: field_number.to_string(),
            collector_key: collector.to_string(),
        }
    }

    #[test]
    fn test_blank_between_collectors() {
        let labels = ["A", "A", "B", "B", "C"]
            .iter()
            .enumerate()
            .map(|(i, c)| label(c, &format!("2400000{i}")))
            .collect();
        let pattern: Vec<Option<String>> = partition_by_collector(labels)
            .into_iter()
            .map(|slot| slot.map(|l| l.collector_key))
            .collect();
        let expected: Vec<Option<String>> = [Some("A"), Some("A"), None, Some("B"), Some("B"), None, Some("C")]
            .into_iter()
            .map(|s| s.map(str::to_string))
            .collect();
        assert_eq!(pattern, expected);
    }

    #[test]
    fn test_grid_geometry() {
        assert_eq!(MARGIN * 2.0 + COLUMNS as f32 * CELL_WIDTH, 612.0);
        assert!((MARGIN * 2.0 + ROWS as f32 * CELL_HEIGHT - PAGE_HEIGHT).abs() < 1e-3);

        let (x, y) = slot_origin(0);
        assert_eq!(x, MARGIN);
        assert!((y - (PAGE_HEIGHT - MARGIN - CELL_HEIGHT)).abs() < 1e-3);

        let (x, _) = slot_origin(9);
        assert_eq!(x, MARGIN + 9.0 * CELL_WIDTH);
        assert_eq!(slot_origin(SLOTS_PER_PAGE), slot_origin(0));
        let (_, y) = slot_origin(SLOTS_PER_PAGE - 1);
        assert!((y - MARGIN).abs() < 1e-3);
    }

    #[test]
    fn test_cell_stays_inside_its_bounds() {
        let origin = slot_origin(11);
        let ops = render_cell(&label("Jane Doe", "24000001"), origin).unwrap();
        assert!(ops.iter().any(|op| matches!(op, DrawOp::Text { rotated: true, .. })));
        assert!(ops.iter().any(|op| matches!(op, DrawOp::Square { .. })));
        for op in &ops {
            let (x, y) = match op {
                DrawOp::Text { x, y, .. } | DrawOp::Square { x, y, .. } => (*x, *y),
            };
            assert!(x >= origin.0 && x <= origin.0 + CELL_WIDTH);
            assert!(y >= origin.1 && y <= origin.1 + CELL_HEIGHT);
        }
    }

    #[test]
    fn test_pages_split_at_grid_capacity() {
        let slots: Vec<Option<LabelFields>> = (0..SLOTS_PER_PAGE + 1)
            .map(|i| Some(label("A", &format!("24{i:06}"))))
            .collect();
        let pages = render_pages(&slots).unwrap();
        assert_eq!(pages.len(), 2);
    }

    #[test]
    fn test_rendered_sheet_closes_each_barcode_path() {
        use crate::handlers::labels::pdf::render_document;
        use lopdf::content::Content;
        use lopdf::Document;

        let slots = vec![
            Some(label("Jane Doe", "24000001")),
            Some(label("Jane Doe", "24000002")),
        ];
        let bytes = render_document(&render_pages(&slots).unwrap()).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();

        let mut path_open = false;
        let mut texts_inside_path = 0;
        for op in &content.operations {
            match op.operator.as_str() {
                "re" => path_open = true,
                "f" => path_open = false,
                "BT" if path_open => texts_inside_path += 1,
                _ => {}
            }
        }
        assert_eq!(texts_inside_path, 0);
        assert!(!path_open);
    }
}
