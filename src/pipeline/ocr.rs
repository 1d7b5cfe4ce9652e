use std::io::{Cursor, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{DynamicImage, GrayImage, ImageOutputFormat};

use super::osd::parse_osd_report;
use super::types::{OcrToken, OsdReport, PixelBuffer, RecognitionEngine};
use super::RecognitionError;

/// Default page segmentation: fully automatic, no OSD.
pub const DEFAULT_PSM: u8 = 3;

/// Page segmentation for orientation and script detection only.
const OSD_PSM: u8 = 0;

// ═══════════════════════════════════════════════════════════
// Tesseract command-line engine
// ═══════════════════════════════════════════════════════════

/// Drives the `tesseract` binary, one process per call.
///
/// Images are piped in as PNG on stdin and results read from stdout, so
/// nothing touches the filesystem and concurrent calls never share state.
#[derive(Debug, Clone)]
pub struct TesseractCli {
    command: PathBuf,
    languages: String,
    tessdata_dir: Option<PathBuf>,
    psm: u8,
}

impl TesseractCli {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            languages: "eng".to_string(),
            tessdata_dir: None,
            psm: DEFAULT_PSM,
        }
    }

    /// Set language(s) for recognition (e.g., "eng", "eng+fra").
    pub fn with_languages(mut self, langs: &str) -> Self {
        self.languages = langs.to_string();
        self
    }

    /// Point the engine at a specific traineddata directory.
    pub fn with_tessdata_dir(mut self, dir: &Path) -> Self {
        if dir.join("osd.traineddata").exists() || dir.join("eng.traineddata").exists() {
            self.tessdata_dir = Some(dir.to_path_buf());
        } else {
            tracing::warn!(
                path = %dir.display(),
                "No traineddata found in tessdata directory, using engine default"
            );
        }
        self
    }

    /// Tesseract `--psm` mode for recognition. OSD always uses mode 0.
    pub fn with_page_segmentation(mut self, psm: u8) -> Self {
        self.psm = psm;
        self
    }

    pub fn languages(&self) -> &str {
        &self.languages
    }

    /// Check the binary runs at all. Returns its version banner.
    pub fn probe(&self) -> Result<String, RecognitionError> {
        let output = Command::new(&self.command)
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .map_err(|e| spawn_error(&self.command, e))?;

        if !output.status.success() {
            return Err(RecognitionError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Older builds print the banner on stderr.
        let banner = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        Ok(String::from_utf8_lossy(banner)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    fn recognition_args(&self) -> Vec<String> {
        vec![
            "-l".to_string(),
            self.languages.clone(),
            "--psm".to_string(),
            self.psm.to_string(),
            "tsv".to_string(),
        ]
    }

    /// Pipe `png` through the binary with `args`, returning stdout.
    fn run(&self, png: &[u8], args: &[String]) -> Result<String, RecognitionError> {
        let mut command = Command::new(&self.command);
        command.arg("stdin").arg("stdout");
        if let Some(dir) = &self.tessdata_dir {
            command.arg("--tessdata-dir").arg(dir);
        }
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = command.spawn().map_err(|e| spawn_error(&self.command, e))?;
        let mut guard = ChildGuard::new(child);

        if let Some(mut stdin) = guard.stdin() {
            stdin.write_all(png)?;
        }

        let output = guard.wait_with_output()?;
        if !output.status.success() {
            return Err(RecognitionError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl RecognitionEngine for TesseractCli {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&self, image: &PixelBuffer) -> Result<Vec<OcrToken>, RecognitionError> {
        if image.is_degenerate() {
            return Ok(Vec::new());
        }
        let png = encode_for_engine(DynamicImage::ImageRgb8(image.as_rgb().clone()))?;
        let tsv = self.run(&png, &self.recognition_args())?;
        let tokens = parse_tsv_tokens(&tsv);
        tracing::debug!(
            width = image.width(),
            height = image.height(),
            tokens = tokens.len(),
            "Tesseract recognition complete"
        );
        Ok(tokens)
    }

    fn detect_orientation(&self, image: &GrayImage) -> Result<OsdReport, RecognitionError> {
        let png = encode_for_engine(DynamicImage::ImageLuma8(image.clone()))?;
        let args = vec![
            "--psm".to_string(),
            OSD_PSM.to_string(),
            "-l".to_string(),
            "osd".to_string(),
        ];

        let raw = self.run(&png, &args)?;
        parse_osd_report(&raw)
    }
}

fn encode_for_engine(image: DynamicImage) -> Result<Vec<u8>, RecognitionError> {
    let mut cursor = Cursor::new(Vec::new());
    image
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| RecognitionError::Encode(e.to_string()))?;
    Ok(cursor.into_inner())
}

fn spawn_error(command: &Path, err: std::io::Error) -> RecognitionError {
    if err.kind() == ErrorKind::NotFound {
        RecognitionError::Unavailable(format!("'{}' not found on PATH", command.display()))
    } else {
        RecognitionError::Io(err)
    }
}

/// Owns a running engine process. Dropping it kills and reaps the child,
/// so an early `?` never leaves a zombie behind.
struct ChildGuard {
    child: Option<Child>,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        Self { child: Some(child) }
    }

    /// Take the stdin pipe. Dropping the handle signals EOF.
    fn stdin(&mut self) -> Option<std::process::ChildStdin> {
        self.child.as_mut().and_then(|c| c.stdin.take())
    }

    fn wait_with_output(mut self) -> Result<std::process::Output, RecognitionError> {
        let child = self
            .child
            .take()
            .ok_or_else(|| RecognitionError::Unavailable("engine process already reaped".into()))?;
        Ok(child.wait_with_output()?)
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ═══════════════════════════════════════════════════════════
// TSV parsing
// ═══════════════════════════════════════════════════════════

/// Parse Tesseract TSV output into word tokens.
/// TSV columns: level page_num block_num par_num line_num word_num left top width height conf text
/// Level 5 = individual word entries. Confidence stays on the 0-100 scale;
/// Tesseract's -1 ("no confidence") becomes 0.
pub fn parse_tsv_tokens(tsv: &str) -> Vec<OcrToken> {
    let mut tokens = Vec::new();

    for line in tsv.lines().skip(1) {
        // Skip header row
        let fields: Vec<&str> = line.trim_end_matches('\r').split('\t').collect();
        if fields.len() < 12 {
            continue;
        }

        // Level 5 = word
        match fields[0].parse::<u8>() {
            Ok(5) => {}
            _ => continue,
        }

        let text = fields[11].trim();
        if text.is_empty() {
            continue;
        }

        // Tesseract 4 prints integers, 5 prints fractional confidences.
        let confidence = match fields[10].trim().parse::<f32>() {
            Ok(c) if c > 0.0 => c.round().min(100.0) as u8,
            Ok(_) => 0,
            Err(_) => continue,
        };

        let Some(geometry) = parse_geometry(&fields[6..10]) else {
            continue;
        };
        let Some([block_index, paragraph_index, line_index]) = parse_indices(&fields[2..5]) else {
            continue;
        };

        tokens.push(OcrToken {
            text: text.to_string(),
            left: geometry[0],
            top: geometry[1],
            width: geometry[2],
            height: geometry[3],
            confidence,
            block_index,
            paragraph_index,
            line_index,
        });
    }

    tokens
}

fn parse_geometry(fields: &[&str]) -> Option<[u32; 4]> {
    Some([
        fields.first()?.trim().parse().ok()?,
        fields.get(1)?.trim().parse().ok()?,
        fields.get(2)?.trim().parse().ok()?,
        fields.get(3)?.trim().parse().ok()?,
    ])
}

fn parse_indices(fields: &[&str]) -> Option<[u32; 3]> {
    Some([
        fields.first()?.trim().parse().ok()?,
        fields.get(1)?.trim().parse().ok()?,
        fields.get(2)?.trim().parse().ok()?,
    ])
}

// ═══════════════════════════════════════════════════════════
// Mock engine
// ═══════════════════════════════════════════════════════════

/// What the mock answers to an orientation request.
#[derive(Debug, Clone)]
pub enum MockOsd {
    Report(OsdReport),
    Fail,
    /// Locate the dark marker and report the turn that brings it to the
    /// top-left corner.
    FromMarker { confidence: f32 },
}

/// What the mock answers to a recognition request.
#[derive(Debug, Clone)]
pub enum MockRecognition {
    Tokens(Vec<OcrToken>),
    Fail,
    /// Two words scored `upright` when the marker sits top-left,
    /// `sideways` otherwise; no words when there is no marker.
    FromMarker { upright: u8, sideways: u8 },
}

/// Mock recognition engine for unit testing without Tesseract.
pub struct MockEngine {
    osd: MockOsd,
    recognition: MockRecognition,
    recognize_calls: AtomicUsize,
    osd_calls: AtomicUsize,
}

impl MockEngine {
    pub fn new(osd: MockOsd, recognition: MockRecognition) -> Self {
        Self {
            osd,
            recognition,
            recognize_calls: AtomicUsize::new(0),
            osd_calls: AtomicUsize::new(0),
        }
    }

    /// Confidently upright page returning the given tokens.
    pub fn with_tokens(tokens: Vec<OcrToken>) -> Self {
        Self::new(
            MockOsd::Report(OsdReport {
                rotate: Some(0),
                orientation_confidence: Some(15.0),
                script: Some("Latin".into()),
                script_confidence: Some(3.0),
            }),
            MockRecognition::Tokens(tokens),
        )
    }

    /// Orientation and recognition both follow the marker.
    pub fn marker_aware() -> Self {
        Self::new(
            MockOsd::FromMarker { confidence: 10.0 },
            MockRecognition::FromMarker { upright: 90, sideways: 40 },
        )
    }

    pub fn recognize_calls(&self) -> usize {
        self.recognize_calls.load(Ordering::SeqCst)
    }

    pub fn osd_calls(&self) -> usize {
        self.osd_calls.load(Ordering::SeqCst)
    }
}

impl RecognitionEngine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    fn recognize(&self, image: &PixelBuffer) -> Result<Vec<OcrToken>, RecognitionError> {
        self.recognize_calls.fetch_add(1, Ordering::SeqCst);
        match &self.recognition {
            MockRecognition::Tokens(tokens) => Ok(tokens.clone()),
            MockRecognition::Fail => Err(RecognitionError::Unavailable("mock failure".into())),
            MockRecognition::FromMarker { upright, sideways } => {
                let Some(corner) = marker_corner(&image.to_gray()) else {
                    return Ok(Vec::new());
                };
                let confidence = if corner == (false, false) { *upright } else { *sideways };
                Ok(["Upright", "page"]
                    .iter()
                    .enumerate()
                    .map(|(i, word)| OcrToken {
                        text: word.to_string(),
                        left: 10 + 60 * i as u32,
                        top: 10,
                        width: 50,
                        height: 12,
                        confidence,
                        block_index: 1,
                        paragraph_index: 1,
                        line_index: 1,
                    })
                    .collect())
            }
        }
    }

    fn detect_orientation(&self, image: &GrayImage) -> Result<OsdReport, RecognitionError> {
        self.osd_calls.fetch_add(1, Ordering::SeqCst);
        match &self.osd {
            MockOsd::Report(report) => Ok(report.clone()),
            MockOsd::Fail => Err(RecognitionError::Process {
                status: "exit status: 1".into(),
                stderr: "Too few characters. Skipping this page".into(),
            }),
            MockOsd::FromMarker { confidence } => {
                let rotate = marker_corner(image).map(|corner| match corner {
                    (false, false) => 0,
                    (true, false) => 270,
                    (true, true) => 180,
                    (false, true) => 90,
                });
                Ok(OsdReport {
                    rotate,
                    orientation_confidence: rotate.map(|_| *confidence),
                    script: None,
                    script_confidence: None,
                })
            }
        }
    }
}

/// Corner holding the centroid of dark pixels as `(right, bottom)`.
fn marker_corner(gray: &GrayImage) -> Option<(bool, bool)> {
    let (mut sum_x, mut sum_y, mut count) = (0u64, 0u64, 0u64);
    for (x, y, p) in gray.enumerate_pixels() {
        if p.0[0] < 128 {
            sum_x += u64::from(x);
            sum_y += u64::from(y);
            count += 1;
        }
    }
    let total = u64::from(gray.width()) * u64::from(gray.height());
    if count == 0 || count * 2 > total {
        return None;
    }
    let cx = sum_x as f64 / count as f64;
    let cy = sum_y as f64 / count as f64;
    Some((
        cx > f64::from(gray.width()) / 2.0,
        cy > f64::from(gray.height()) / 2.0,
    ))
}

/// Build a token at the given layout position (test helper).
#[cfg(test)]
pub fn test_token(
    text: &str,
    confidence: u8,
    (block_index, paragraph_index, line_index): (u32, u32, u32),
    (left, top, width, height): (u32, u32, u32, u32),
) -> OcrToken {
    OcrToken {
        text: text.to_string(),
        left,
        top,
        width,
        height,
        confidence,
        block_index,
        paragraph_index,
        line_index,
    }
}
