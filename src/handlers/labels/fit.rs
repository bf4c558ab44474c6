//! Shrink-to-fit text placement.
//!
//! [`fit_text`] is pure: it walks font sizes down from the nominal size in
//! fixed steps until the wrapped text fits its box, stopping at the floor.
//! Sizes are stepped as integer tenths of a point so the loop is bounded.

/// Font size a field starts at
pub const NOMINAL_SIZE: f32 = 3.6;
/// Smallest size a field may shrink to
pub const MIN_SIZE: f32 = 2.0;
/// Shrink step
pub const SIZE_STEP: f32 = 0.1;
/// Baseline-to-baseline distance as a multiple of the font size
pub const LINE_SPACING: f32 = 1.15;
/// Helvetica ascender and descender, fractions of the font size
pub const ASCENT: f32 = 0.718;
pub const DESCENT: f32 = 0.207;

const NOMINAL_TENTHS: u32 = 36;
const MIN_TENTHS: u32 = 20;
const STEP_TENTHS: u32 = 1;
const WIDTH_TOLERANCE: f32 = 0.001;

/// Helvetica advance widths (1/1000 em) for ASCII 32..=126
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, //
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, //
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, //
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, //
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, //
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];
const DEFAULT_WIDTH: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub width: f32,
    pub height: f32,
}

impl TextBox {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    pub size: f32,
    pub lines: Vec<String>,
    /// Distance from the top of the box down to the first baseline
    pub offset: f32,
    pub line_height: f32,
    /// False when the floor was reached and the text still overflows
    pub fits: bool,
    pub iterations: u32,
}

fn char_width(c: char) -> u16 {
    match c as u32 {
        code @ 32..=126 => HELVETICA_WIDTHS[(code - 32) as usize],
        _ => DEFAULT_WIDTH,
    }
}

/// Rendered width of `text` at `size` points
pub fn text_width(text: &str, size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| u32::from(char_width(c))).sum();
    units as f32 * size / 1000.0
}

/// Height of a block of `lines` lines at `size` points
pub fn block_height(lines: usize, size: f32) -> f32 {
    if lines == 0 {
        return 0.0;
    }
    size * (ASCENT + DESCENT) + (lines - 1) as f32 * size * LINE_SPACING
}

/// Greedy word wrap; words wider than the line are split by character
pub fn wrap(text: &str, size: f32, width: f32) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate = if current.is_empty() {
            word.to_string()
        } else {
            format!("{current} {word}")
        };
        if text_width(&candidate, size) <= width + WIDTH_TOLERANCE {
            current = candidate;
            continue;
        }
        if !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if text_width(word, size) <= width + WIDTH_TOLERANCE {
            current = word.to_string();
            continue;
        }
        for c in word.chars() {
            current.push(c);
            if current.chars().count() > 1 && text_width(&current, size) > width + WIDTH_TOLERANCE {
                current.pop();
                lines.push(std::mem::replace(&mut current, c.to_string()));
            }
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Largest size in the nominal..floor range at which `text` fits `bounds`
pub fn fit_text(text: &str, bounds: TextBox) -> FitResult {
    let mut tenths = NOMINAL_TENTHS;
    let mut iterations = 0;
    loop {
        iterations += 1;
        let size = tenths as f32 / 10.0;
        let lines = wrap(text, size, bounds.width);
        let fits = block_height(lines.len(), size) <= bounds.height + WIDTH_TOLERANCE
            && lines
                .iter()
                .all(|line| text_width(line, size) <= bounds.width + WIDTH_TOLERANCE);
        if fits || tenths <= MIN_TENTHS {
            return FitResult {
                size,
                offset: size * ASCENT,
                line_height: size * LINE_SPACING,
                lines,
                fits,
                iterations,
            };
        }
        tenths = tenths.saturating_sub(STEP_TENTHS).max(MIN_TENTHS);
    }
}

/// Upper bound on [`fit_text`] iterations
pub fn max_iterations() -> u32 {
    (NOMINAL_TENTHS - MIN_TENTHS) / STEP_TENTHS + 1
}
