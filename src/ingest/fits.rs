// src/ingest/fits.rs

//! Primary-HDU header access for FITS files.
//!
//! The engine only ever needs header cards (the metadata contract); pixel
//! data is the external tools' business and is never decoded here. A FITS
//! header is a sequence of 2880-byte blocks of 80-byte ASCII cards, ending
//! at the `END` keyword.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use anyhow::{anyhow, Context};
use serde_json::{Map, Number, Value};

use crate::errors::Result;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;
/// Headers larger than this are not plausible capture output.
const MAX_HEADER_BLOCKS: usize = 64;

/// Read the primary header of a FITS file into a key/value map.
///
/// Values are typed where the card syntax allows: quoted strings, `T`/`F`
/// logicals, integers and floats. Unknown shapes are kept as raw strings so
/// no header information is lost.
pub fn read_primary_header(path: &Path) -> Result<Map<String, Value>> {
    let mut file = File::open(path)
        .with_context(|| format!("opening FITS file {}", path.display()))?;

    let mut headers = Map::new();
    let mut block = [0u8; BLOCK_SIZE];

    for block_index in 0..MAX_HEADER_BLOCKS {
        file.read_exact(&mut block).with_context(|| {
            format!(
                "reading FITS header block {block_index} of {}",
                path.display()
            )
        })?;

        if block_index == 0 && !block.starts_with(b"SIMPLE") {
            return Err(
                anyhow!("{} does not start with a SIMPLE card", path.display()).into(),
            );
        }

        for card in block.chunks_exact(CARD_SIZE) {
            let keyword = String::from_utf8_lossy(&card[..8]).trim_end().to_string();
            if keyword == "END" {
                return Ok(headers);
            }
            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }
            // Value indicator: "= " in columns 9-10.
            if &card[8..10] != b"= " {
                continue;
            }
            let raw = String::from_utf8_lossy(&card[10..]).to_string();
            if let Some(value) = parse_card_value(&raw) {
                headers.insert(keyword, value);
            }
        }
    }

    Err(anyhow!(
        "no END card within {MAX_HEADER_BLOCKS} header blocks in {}",
        path.display()
    )
    .into())
}

/// Parse the value portion of a header card (everything after `= `).
fn parse_card_value(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Some(rest) = trimmed.strip_prefix('\'') {
        // Quoted string: ends at the first single quote not doubled.
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        return Some(Value::String(out.trim_end().to_string()));
    }

    // Strip an inline comment (unquoted values only).
    let value_part = match trimmed.find('/') {
        Some(idx) => trimmed[..idx].trim(),
        None => trimmed,
    };
    if value_part.is_empty() {
        return None;
    }

    match value_part {
        "T" => return Some(Value::Bool(true)),
        "F" => return Some(Value::Bool(false)),
        _ => {}
    }
    if let Ok(int) = value_part.parse::<i64>() {
        return Some(Value::Number(int.into()));
    }
    if let Ok(float) = value_part.parse::<f64>() {
        return Number::from_f64(float).map(Value::Number);
    }
    Some(Value::String(value_part.to_string()))
}

/// Write a header-only FITS file (no data unit).
///
/// Real capture frames carry pixel data, but nothing in the engine reads past
/// the primary header, so fixtures and synthesized placeholder files only
/// need valid cards.
pub fn write_header_only(path: &Path, cards: &[(&str, Value)]) -> Result<()> {
    let mut content = String::new();
    push_card(&mut content, "SIMPLE", &Value::Bool(true));
    push_card(&mut content, "BITPIX", &Value::Number(8.into()));
    push_card(&mut content, "NAXIS", &Value::Number(0.into()));
    for (keyword, value) in cards {
        push_card(&mut content, keyword, value);
    }
    content.push_str(&format!("{:<80}", "END"));
    while content.len() % BLOCK_SIZE != 0 {
        content.push(' ');
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content.as_bytes())?;
    Ok(())
}

fn push_card(out: &mut String, keyword: &str, value: &Value) {
    let rendered = match value {
        Value::String(s) => format!("'{s}'"),
        Value::Bool(true) => "T".to_string(),
        Value::Bool(false) => "F".to_string(),
        Value::Number(n) => n.to_string(),
        other => format!("'{other}'"),
    };
    out.push_str(&format!("{keyword:<8}= {rendered:<70}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.fits");
        write_header_only(
            &path,
            &[
                ("NAXIS1", json!(1080)),
                ("NAXIS2", json!(1920)),
                ("IMAGETYP", json!("LIGHT")),
                ("EXPTIME", json!(10.0)),
                ("GAIN", json!(80)),
                ("FILTER", json!("LP")),
                ("OBJECT", json!("NGC 281")),
                ("DATE-OBS", json!("2025-07-15T22:00:00")),
                ("CCD-TEMP", json!(-9.5)),
                ("EXTEND", json!(true)),
            ],
        )
        .unwrap();

        let headers = read_primary_header(&path).unwrap();
        assert_eq!(headers["NAXIS1"], json!(1080));
        assert_eq!(headers["IMAGETYP"], json!("LIGHT"));
        assert_eq!(headers["EXPTIME"], json!(10.0));
        assert_eq!(headers["OBJECT"], json!("NGC 281"));
        assert_eq!(headers["CCD-TEMP"], json!(-9.5));
        assert_eq!(headers["EXTEND"], json!(true));
    }

    #[test]
    fn quoted_strings_keep_embedded_quotes() {
        assert_eq!(
            parse_card_value("'O''Neill'   "),
            Some(Value::String("O'Neill".into()))
        );
    }

    #[test]
    fn comments_are_stripped_from_unquoted_values() {
        assert_eq!(parse_card_value("  60 / exposure"), Some(json!(60)));
        assert_eq!(parse_card_value("  1.5E2 / f"), Some(json!(150.0)));
    }

    #[test]
    fn non_fits_files_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("not.fits");
        std::fs::write(&path, vec![0u8; BLOCK_SIZE]).unwrap();
        assert!(read_primary_header(&path).is_err());
    }
}
