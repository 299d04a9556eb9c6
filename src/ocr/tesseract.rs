//! Tesseract OCR engine.
//!
//! Invokes the tesseract binary with profile-derived arguments and parses
//! its TSV output into word-level results with bounding boxes and
//! confidences.

use std::path::Path;
use std::process::Command;
use std::time::Instant;

use super::engine::{EngineOcrResult, OcrEngine, OcrError};
use crate::config::OcrProfile;
use crate::models::{BoundingBox, OcrWord};

pub struct TesseractEngine;

impl TesseractEngine {
    pub fn new() -> Self {
        Self
    }

    /// Build the tesseract invocation for a profile.
    fn build_command(&self, image_path: &Path, profile: &OcrProfile) -> Command {
        let mut cmd = Command::new("tesseract");
        cmd.arg(image_path)
            .arg("stdout")
            .args(["-l", &profile.language])
            .args(["--psm", &profile.psm.to_string()])
            .args(["--oem", &profile.oem.to_string()])
            .args(["--dpi", &profile.dpi.to_string()]);
        if !profile.whitelist.is_empty() {
            cmd.args(["-c", &format!("tessedit_char_whitelist={}", profile.whitelist)]);
        }
        if !profile.blacklist.is_empty() {
            cmd.args(["-c", &format!("tessedit_char_blacklist={}", profile.blacklist)]);
        }
        cmd.arg("tsv");
        cmd
    }
}

impl Default for TesseractEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OcrEngine for TesseractEngine {
    fn engine_name(&self) -> &'static str {
        "tesseract"
    }

    fn is_available(&self) -> bool {
        which::which("tesseract").is_ok()
    }

    fn availability_hint(&self) -> String {
        if self.is_available() {
            "Tesseract is available".to_string()
        } else {
            "Tesseract not installed. Install with: apt install tesseract-ocr".to_string()
        }
    }

    fn process(
        &self,
        image_path: &Path,
        profile: &OcrProfile,
    ) -> Result<EngineOcrResult, OcrError> {
        let start = Instant::now();
        let output = self.build_command(image_path, profile).output();

        let output = match output {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(OcrError::NotAvailable(
                    "tesseract not found (install tesseract-ocr)".to_string(),
                ))
            }
            Err(e) => return Err(OcrError::Io(e)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Failed(format!("tesseract failed: {}", stderr)));
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let words = parse_tsv(&tsv);
        let text = assemble_text(&tsv);
        let avg_confidence = if words.is_empty() {
            0.0
        } else {
            words.iter().map(|w| w.confidence).sum::<f32>() / words.len() as f32
        };

        Ok(EngineOcrResult {
            text,
            avg_confidence,
            words,
            processing_time_ms: start.elapsed().as_millis() as u64,
            profile_used: String::new(),
            engine_name: "tesseract".to_string(),
        })
    }
}

/// Parse word rows (level 5) from tesseract TSV output.
///
/// Columns: level, page_num, block_num, par_num, line_num, word_num,
/// left, top, width, height, conf, text.
fn parse_tsv(tsv: &str) -> Vec<OcrWord> {
    let mut words = Vec::new();
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 {
            continue;
        }
        if fields[0] != "5" {
            continue;
        }
        let (Ok(left), Ok(top), Ok(width), Ok(height)) = (
            fields[6].parse::<u32>(),
            fields[7].parse::<u32>(),
            fields[8].parse::<u32>(),
            fields[9].parse::<u32>(),
        ) else {
            continue;
        };
        let Ok(conf) = fields[10].parse::<f32>() else {
            continue;
        };
        let text = fields[11].trim();
        // conf -1 marks structural rows; empty text is whitespace noise.
        if conf < 0.0 || text.is_empty() {
            continue;
        }
        words.push(OcrWord {
            text: text.to_string(),
            bbox: BoundingBox::new(left, top, width, height),
            confidence: conf,
        });
    }
    words
}

/// Reassemble line-structured text from TSV word rows.
fn assemble_text(tsv: &str) -> String {
    let mut lines: Vec<((u32, u32, u32), Vec<String>)> = Vec::new();
    for line in tsv.lines().skip(1) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }
        let Ok(conf) = fields[10].parse::<f32>() else {
            continue;
        };
        let text = fields[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }
        let key = (
            fields[2].parse().unwrap_or(0),
            fields[3].parse().unwrap_or(0),
            fields[4].parse().unwrap_or(0),
        );
        match lines.last_mut() {
            Some((last_key, words)) if *last_key == key => words.push(text.to_string()),
            _ => lines.push((key, vec![text.to_string()])),
        }
    }
    lines
        .into_iter()
        .map(|(_, words)| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;

    const SAMPLE_TSV: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
1\t1\t0\t0\t0\t0\t0\t0\t600\t800\t-1\t\n\
5\t1\t1\t1\t1\t1\t40\t50\t80\t20\t95.5\tINVOICE\n\
5\t1\t1\t1\t1\t2\t130\t50\t90\t20\t91.0\tINV-1001\n\
5\t1\t1\t1\t2\t1\t40\t90\t60\t18\t88.0\tTotal\n\
5\t1\t1\t1\t2\t2\t110\t90\t50\t18\t93.0\t55.00\n\
5\t1\t1\t1\t2\t3\t170\t90\t10\t18\t-1\t \n";

    #[test]
    fn test_parse_tsv_words() {
        let words = parse_tsv(SAMPLE_TSV);
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].text, "INVOICE");
        assert_eq!(words[0].bbox, BoundingBox::new(40, 50, 80, 20));
        assert_eq!(words[0].confidence, 95.5);
        assert_eq!(words[3].text, "55.00");
    }

    #[test]
    fn test_parse_tsv_skips_structural_rows() {
        let words = parse_tsv(SAMPLE_TSV);
        assert!(words.iter().all(|w| w.confidence >= 0.0));
        assert!(words.iter().all(|w| !w.text.is_empty()));
    }

    #[test]
    fn test_assemble_text_preserves_lines() {
        let text = assemble_text(SAMPLE_TSV);
        assert_eq!(text, "INVOICE INV-1001\nTotal 55.00");
    }

    #[test]
    fn test_build_command_includes_profile_args() {
        let engine = TesseractEngine::new();
        let config = PipelineConfig::default();
        let profile = &config.ocr.profiles["numbers-only"];
        let cmd = engine.build_command(Path::new("/tmp/z.png"), profile);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.contains(&"--psm".to_string()));
        assert!(args.contains(&"6".to_string()));
        assert!(args
            .iter()
            .any(|a| a.starts_with("tessedit_char_whitelist=")));
        assert_eq!(args.last().unwrap(), "tsv");
    }
}
