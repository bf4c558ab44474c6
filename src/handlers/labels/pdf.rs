//! Minimal PDF writer for label sheets.

use crate::error::PipelineResult;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream, StringFormat};

pub const PAGE_WIDTH: f32 = 612.0;
pub const PAGE_HEIGHT: f32 = 792.0;

const FONT_NAME: &str = "F1";

/// Drawing primitive in page coordinates (points, origin bottom-left)
#[derive(Debug, Clone, PartialEq)]
pub enum DrawOp {
    /// Text with its baseline starting at `(x, y)`; rotated text runs upward
    Text {
        x: f32,
        y: f32,
        size: f32,
        text: String,
        rotated: bool,
    },
    /// Filled square with its lower-left corner at `(x, y)`
    Square { x: f32, y: f32, size: f32 },
}

/// WinAnsi codes 0x80..=0x9F; the rest of the printable range matches Latin-1
const WIN_ANSI_HIGH: [(char, u8); 27] = [
    ('\u{20AC}', 0x80),
    ('\u{201A}', 0x82),
    ('\u{0192}', 0x83),
    ('\u{201E}', 0x84),
    ('\u{2026}', 0x85),
    ('\u{2020}', 0x86),
    ('\u{2021}', 0x87),
    ('\u{02C6}', 0x88),
    ('\u{2030}', 0x89),
    ('\u{0160}', 0x8A),
    ('\u{2039}', 0x8B),
    ('\u{0152}', 0x8C),
    ('\u{017D}', 0x8E),
    ('\u{2018}', 0x91),
    ('\u{2019}', 0x92),
    ('\u{201C}', 0x93),
    ('\u{201D}', 0x94),
    ('\u{2022}', 0x95),
    ('\u{2013}', 0x96),
    ('\u{2014}', 0x97),
    ('\u{02DC}', 0x98),
    ('\u{2122}', 0x99),
    ('\u{0161}', 0x9A),
    ('\u{203A}', 0x9B),
    ('\u{0153}', 0x9C),
    ('\u{017E}', 0x9E),
    ('\u{0178}', 0x9F),
];

fn win_ansi_byte(c: char) -> Option<u8> {
    match u32::from(c) {
        code @ (0x20..=0x7E | 0xA0..=0xFF) => u8::try_from(code).ok(),
        _ => WIN_ANSI_HIGH
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, byte)| *byte),
    }
}

/// Helvetica is declared with WinAnsi encoding; unmapped characters become `?`
fn encode_text(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| win_ansi_byte(c).unwrap_or(b'?'))
        .collect()
}

// Squares accumulate into one path that is filled before the next text
// object; `BT` is not allowed while a path is open.
fn page_operations(ops: &[DrawOp]) -> Vec<Operation> {
    let mut operations = Vec::new();
    let mut path_open = false;
    for op in ops {
        if path_open && matches!(op, DrawOp::Text { .. }) {
            operations.push(Operation::new("f", vec![]));
            path_open = false;
        }
        match op {
            DrawOp::Text {
                x,
                y,
                size,
                text,
                rotated,
            } => {
                let matrix: [f32; 6] = if *rotated {
                    [0.0, 1.0, -1.0, 0.0, *x, *y]
                } else {
                    [1.0, 0.0, 0.0, 1.0, *x, *y]
                };
                operations.push(Operation::new("BT", vec![]));
                operations.push(Operation::new(
                    "Tf",
                    vec![FONT_NAME.into(), Object::from(*size)],
                ));
                operations.push(Operation::new(
                    "Tm",
                    matrix.iter().map(|v| Object::from(*v)).collect(),
                ));
                operations.push(Operation::new(
                    "Tj",
                    vec![Object::String(encode_text(text), StringFormat::Literal)],
                ));
                operations.push(Operation::new("ET", vec![]));
            }
            DrawOp::Square { x, y, size } => {
                operations.push(Operation::new(
                    "re",
                    vec![
                        Object::from(*x),
                        Object::from(*y),
                        Object::from(*size),
                        Object::from(*size),
                    ],
                ));
                path_open = true;
            }
        }
    }
    if path_open {
        operations.push(Operation::new("f", vec![]));
    }
    operations
}

/// Render one PDF page per entry of `pages`; an empty list yields one blank page
pub fn render_document(pages: &[Vec<DrawOp>]) -> PipelineResult<Vec<u8>> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! {
            FONT_NAME => font_id,
        },
    });

    let blank = [Vec::new()];
    let pages = if pages.is_empty() { &blank[..] } else { pages };
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for ops in pages {
        let content = Content {
            operations: page_operations(ops),
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
            "Resources" => resources_id,
            "MediaBox" => vec![
                Object::from(0.0_f32),
                Object::from(0.0_f32),
                Object::from(PAGE_WIDTH),
                Object::from(PAGE_HEIGHT),
            ],
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
