//! Requested-amount extraction from PDF text.
//!
//! Text extraction itself happens outside this crate; this module only
//! scans the extracted text for a line like `Total Requested Amount $1,234.56`.

use std::sync::OnceLock;

use regex::Regex;

const AMOUNT: &str = r"\$?\s*([0-9][0-9,]*(?:\.[0-9]{2})?)";

fn patterns() -> &'static [Regex; 2] {
    static PATTERNS: OnceLock<[Regex; 2]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(&format!(r"(?i)Total\s+Requested\s+Amount\s*{AMOUNT}"))
                .expect("static pattern"),
            Regex::new(&format!(r"(?i)Total\s+Requested\s*{AMOUNT}")).expect("static pattern"),
        ]
    })
}

/// First "Total Requested Amount" (or "Total Requested") figure in `text`.
pub fn extract_requested_total(text: &str) -> Option<f64> {
    patterns().iter().find_map(|re| {
        let raw = re.captures(text)?.get(1)?.as_str().replace(',', "");
        raw.parse::<f64>().ok()
    })
}
