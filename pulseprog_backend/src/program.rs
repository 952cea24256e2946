//! Pulse program text handling: validation, parsing and rewriting.
//!
//! ## Overview
//!
//! A pulse program is a line-oriented text file consumed by the external compiler:
//!
//! ```text
//! PULSE_PROGRAM
//! %frequency = 2000
//! %echo_delay = 1.5
//! PULSE 0 90 12 %90_half_cycles
//! PULSE 0 180 24 %180_half_cycles
//! READ_DATA 0 1 512 %num_points
//! ```
//!
//! Only three line shapes carry tunable values (see [`PulseParams`]):
//! - `%key = value` parameter lines,
//! - `PULSE 0 90 ...` / `PULSE 0 180 ...` pulse lines,
//! - `READ_DATA ...` acquisition lines.
//!
//! [`render`] rewrites exactly those lines and leaves every other line untouched, so comments,
//! unknown keys and instructions the controller does not understand survive an edit.
//!
//! [`PulseFile`] bundles the text with its parsed parameters and takes care of file I/O.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ProgramError, Result};
use crate::params::*;

/// First token of every valid pulse program
pub const PROGRAM_HEADER: &str = "PULSE_PROGRAM";

/// File name the edited program is written to before compilation
pub const DEFAULT_PROGRAM_FILE: &str = "pulse_program.txt";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineKind {
    Param,
    FirstPulse,
    SecondPulse,
    ReadData,
    Other,
}

fn instr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:(?P<first>PULSE 0 90)|(?P<second>PULSE 0 180)|(?P<read>READ_DATA))")
            .expect("instruction pattern is valid")
    })
}

fn classify(stripped: &str) -> LineKind {
    if stripped.starts_with('%') {
        return LineKind::Param;
    }
    match instr_regex().captures(stripped) {
        Some(caps) if caps.name("first").is_some() => LineKind::FirstPulse,
        Some(caps) if caps.name("second").is_some() => LineKind::SecondPulse,
        Some(_) => LineKind::ReadData,
        None => LineKind::Other,
    }
}

// `%key = value` with surrounding '%' and blanks removed from the whole line
fn split_param_line(stripped: &str) -> Option<(&str, &str)> {
    let body = stripped.trim_matches(|c: char| c == '%' || c == ' ');
    let mut parts = body.split('=');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(key), Some(value), None) => Some((key.trim(), value.trim())),
        _ => None,
    }
}

fn param_key_of(stripped: &str) -> &str {
    stripped
        .split('=')
        .next()
        .unwrap_or_default()
        .trim_matches(|c: char| c == '%' || c == ' ')
}

// Keyword tokens are skipped: `PULSE 0 90 12` yields `0 90 12`
fn triple_of(stripped: &str) -> PulseTriple {
    parse_triple(stripped.split_whitespace().skip(1))
}

/// Checks whether `content` declares a pulse program.
///
/// # Example
/// ```
/// # use pulseprog_backend::*;
/// assert!(is_valid("  PULSE_PROGRAM\n%frequency = 1"));
/// assert!(!is_valid("%frequency = 1"));
/// ```
pub fn is_valid(content: &str) -> bool {
    content.trim().starts_with(PROGRAM_HEADER)
}

/// Extracts all tunable values of a program.
///
/// Parameters missing from the text stay at 0. Malformed `%` lines (for instance with two `=`)
/// are logged and skipped.
pub fn parse(content: &str) -> PulseParams {
    let mut params = PulseParams::new();
    for line in content.lines() {
        let stripped = line.trim();
        match classify(stripped) {
            LineKind::Param if stripped.contains('=') => match split_param_line(stripped) {
                Some((key, value)) => {
                    if let Some(param_key) = ParamKey::from_file_key(key) {
                        params.set(param_key, ParamValue::parse(value));
                    } else {
                        log::debug!("Ignoring unknown parameter '{}'", key);
                    }
                }
                None => log::warn!("Malformed parameter line '{}'", line),
            },
            LineKind::Param | LineKind::Other => {}
            LineKind::FirstPulse => params.first_pulse = triple_of(stripped),
            LineKind::SecondPulse => params.second_pulse = triple_of(stripped),
            LineKind::ReadData => params.read_data = triple_of(stripped),
        }
    }
    log::debug!("Parsed pulse program parameters:\n{}", params);
    params
}

/// Rewrites `content` with the values from `params`.
///
/// Known `%` lines become `%key = value`, pulse and read lines are regenerated with their
/// trailing marker comment. All other lines are copied unchanged; lines are joined with `\n`.
pub fn render(content: &str, params: &PulseParams) -> String {
    content
        .lines()
        .map(|line| {
            let stripped = line.trim();
            match classify(stripped) {
                LineKind::Param => match ParamKey::from_file_key(param_key_of(stripped)) {
                    Some(key) => format!("%{} = {}", key, params.get(key)),
                    None => line.to_string(),
                },
                LineKind::FirstPulse => format!(
                    "PULSE {} %{}",
                    format_triple(&params.first_pulse),
                    ParamKey::NinetyHalfCycles
                ),
                LineKind::SecondPulse => format!(
                    "PULSE {} %{}",
                    format_triple(&params.second_pulse),
                    ParamKey::OneEightyHalfCycles
                ),
                LineKind::ReadData => format!(
                    "READ_DATA {} %{}",
                    format_triple(&params.read_data),
                    ParamKey::NumPoints
                ),
                LineKind::Other => line.to_string(),
            }
        })
        .collect::<Vec<String>>()
        .join("\n")
}

/// A pulse program loaded from disk together with its parsed parameters.
///
/// Edits go to [`PulseFile::params_`]; [`PulseFile::save_as`] renders the original text with
/// the edited values and makes the written file the new backing file.
#[derive(Clone, Debug)]
pub struct PulseFile {
    path: PathBuf,
    content: String,
    params: PulseParams,
}

impl PulseFile {
    /// Loads and validates a program file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is empty, or lacks the `PULSE_PROGRAM` header.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|source| ProgramError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_content(path, content)
    }

    pub fn from_content(path: impl Into<PathBuf>, content: String) -> Result<Self> {
        let path = path.into();
        if content.trim().is_empty() {
            return Err(ProgramError::Empty(path));
        }
        if !is_valid(&content) {
            return Err(ProgramError::MissingHeader(path));
        }
        let params = parse(&content);
        log::info!("Loaded pulse program {}", path.display());
        Ok(Self {
            path,
            content,
            params,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn params(&self) -> &PulseParams {
        &self.params
    }

    pub fn params_(&mut self) -> &mut PulseParams {
        &mut self.params
    }

    /// Sets a parameter by its file key (e.g. `"echo_delay"`).
    pub fn set_param(&mut self, file_key: &str, value: ParamValue) -> Result<()> {
        let key = ParamKey::from_file_key(file_key)
            .ok_or_else(|| ProgramError::UnknownParameter(file_key.to_string()))?;
        self.params.set(key, value);
        Ok(())
    }

    /// Text of the program with the current parameter values applied.
    pub fn rendered(&self) -> String {
        render(&self.content, &self.params)
    }

    /// Writes the rendered program to `path` and switches this file over to it.
    pub fn save_as(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let rendered = self.rendered();
        fs::write(&path, &rendered).map_err(|source| ProgramError::Io {
            path: path.clone(),
            source,
        })?;
        log::info!("Pulse program written to {}", path.display());
        self.path = path;
        self.content = rendered;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::error::ProgramError;
    use crate::params::*;
    use crate::program::*;

    const PROGRAM: &str = "PULSE_PROGRAM\n\
        %frequency = 2000\n\
        %echo_delay=1.5\n\
        %custom_flag = on\n\
        ; free-form comment\n\
        PULSE 0 90 12 %90_half_cycles\n\
        WAIT 100\n\
        PULSE 0 180 24 %180_half_cycles\n\
        READ_DATA 0 1 %num_points";

    #[test]
    fn parse_reads_params_and_triples() {
        let params = parse(PROGRAM);
        assert_eq!(params.get(ParamKey::Frequency), &ParamValue::Int(2000));
        assert_eq!(params.get(ParamKey::EchoDelay), &ParamValue::Float(1.5));
        assert_eq!(params.get(ParamKey::NumPoints), &ParamValue::Int(0));
        assert_eq!(params.first_pulse, [0, 90, 12]);
        assert_eq!(params.second_pulse, [0, 180, 24]);
        assert_eq!(params.read_data, [0, 1, 0]);
    }

    #[test]
    fn malformed_param_line_is_skipped() {
        let params = parse("PULSE_PROGRAM\n%frequency = 1 = 2\n%echo_delay = 3");
        assert_eq!(params.get(ParamKey::Frequency), &ParamValue::Int(0));
        assert_eq!(params.get(ParamKey::EchoDelay), &ParamValue::Int(3));
    }

    #[test]
    fn first_pulse_prefix_does_not_shadow_second() {
        assert_eq!(classify("PULSE 0 90 1"), LineKind::FirstPulse);
        assert_eq!(classify("PULSE 0 180 1"), LineKind::SecondPulse);
        assert_eq!(classify("READ_DATA 1 2 3"), LineKind::ReadData);
        assert_eq!(classify("PULSE 1 90 1"), LineKind::Other);
    }

    #[test]
    fn render_updates_known_lines_only() {
        let mut params = parse(PROGRAM);
        params.set(ParamKey::Frequency, ParamValue::Int(2100));
        params.first_pulse = [0, 90, 14];
        params.read_data = [0, 1, 1024];

        let rendered = render(PROGRAM, &params);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "PULSE_PROGRAM");
        assert_eq!(lines[1], "%frequency = 2100");
        assert_eq!(lines[2], "%echo_delay = 1.5");
        assert_eq!(lines[3], "%custom_flag = on");
        assert_eq!(lines[4], "; free-form comment");
        assert_eq!(lines[5], "PULSE 0 90 14 %90_half_cycles");
        assert_eq!(lines[6], "WAIT 100");
        assert_eq!(lines[7], "PULSE 0 180 24 %180_half_cycles");
        assert_eq!(lines[8], "READ_DATA 0 1 1024 %num_points");
        assert_eq!(lines.len(), 9);

        // Rendering is stable under re-parsing
        assert_eq!(parse(&rendered), params);
    }

    #[test]
    fn from_content_rejects_missing_header() {
        let err = PulseFile::from_content("x.txt", "%frequency = 1".to_string()).unwrap_err();
        assert!(matches!(err, ProgramError::MissingHeader(_)));
        let err = PulseFile::from_content("x.txt", "  \n".to_string()).unwrap_err();
        assert!(matches!(err, ProgramError::Empty(_)));
    }
}
