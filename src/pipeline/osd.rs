//! Parser for the engine's orientation-and-script (OSD) text report.
//!
//! ```text
//! Page number: 0
//! Orientation in degrees: 270
//! Rotate: 90
//! Orientation confidence: 4.71
//! Script: Latin
//! Script confidence: 1.33
//! ```

use std::sync::LazyLock;

use regex::Regex;

use super::types::OsdReport;
use super::RecognitionError;

/// `Key: value` lines; keys are letters and spaces only.
static FIELD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*([A-Za-z ]+?)\s*:\s*(.*?)\s*$").unwrap());

/// Extract the fields we care about. Missing fields stay `None`; a report
/// with none of the known fields is a parse error.
pub fn parse_osd_report(raw: &str) -> Result<OsdReport, RecognitionError> {
    let mut report = OsdReport::default();
    let mut recognized_any = false;

    for caps in FIELD_PATTERN.captures_iter(raw) {
        let key = caps[1].to_ascii_lowercase();
        let value = caps[2].trim();

        match key.as_str() {
            "rotate" => {
                report.rotate = value.parse::<i64>().ok();
                recognized_any = true;
            }
            "orientation confidence" => {
                report.orientation_confidence = value.parse::<f32>().ok();
                recognized_any = true;
            }
            "script" => {
                if !value.is_empty() {
                    report.script = Some(value.to_string());
                }
                recognized_any = true;
            }
            "script confidence" => {
                report.script_confidence = value.parse::<f32>().ok();
                recognized_any = true;
            }
            _ => {}
        }
    }

    if !recognized_any {
        return Err(RecognitionError::Parse(
            "no orientation fields in OSD output".into(),
        ));
    }
    Ok(report)
}
