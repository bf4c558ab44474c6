//! 2-D code printed beside the label text.

use crate::error::{PipelineError, PipelineResult};
use qrcode::{Color, EcLevel, QrCode, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Barcode {
    /// Modules per side
    pub width: usize,
    /// Row-major, top row first; `true` is a dark module
    pub modules: Vec<bool>,
}

impl Barcode {
    /// Micro QR of the digits in `field_number`, or a full QR code when the
    /// payload does not fit. `None` when the field number has no digits.
    pub fn for_field_number(field_number: &str) -> PipelineResult<Option<Self>> {
        let digits: String = field_number.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            return Ok(None);
        }
        let code = match QrCode::with_version(digits.as_bytes(), Version::Micro(2), EcLevel::L) {
            Ok(code) => code,
            Err(_) => QrCode::with_error_correction_level(digits.as_bytes(), EcLevel::L)
                .map_err(|e| PipelineError::render(format!("barcode for {field_number}: {e}")))?,
        };
        Ok(Some(Self {
            width: code.width(),
            modules: code
                .to_colors()
                .into_iter()
                .map(|c| c == Color::Dark)
                .collect(),
        }))
    }

    pub fn is_dark(&self, row: usize, column: usize) -> bool {
        self.modules
            .get(row * self.width + column)
            .copied()
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_number_uses_micro_qr() {
        let barcode = Barcode::for_field_number("24000001").unwrap().unwrap();
        assert_eq!(barcode.width, 13);
        assert_eq!(barcode.modules.len(), 169);
        // finder pattern corner
        assert!(barcode.is_dark(0, 0));
    }

    #[test]
    fn test_long_payload_falls_back_to_qr() {
        let barcode = Barcode::for_field_number(&"1".repeat(40)).unwrap().unwrap();
        assert!(barcode.width >= 21);
    }

    #[test]
    fn test_no_digits() {
        assert_eq!(Barcode::for_field_number("n/a").unwrap(), None);
    }
}
