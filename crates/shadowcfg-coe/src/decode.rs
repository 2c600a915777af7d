use shadowcfg_pci::PCIE_CONFIG_SPACE_SIZE;

use crate::encode::{BYTE_LENGTH_KEY, RADIX_KEY, VECTOR_KEY};
use crate::error::{CoeError, Result};

const MAX_WORDS: usize = PCIE_CONFIG_SPACE_SIZE / 4;

/// Words and optional exact length read from one COE artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCoe {
    pub words: Vec<u32>,
    pub byte_length: Option<usize>,
}

impl DecodedCoe {
    /// Unpacks the words back into bytes, honouring `byte_length` when present.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let mut bytes: Vec<u8> = self.words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let Some(byte_length) = self.byte_length else {
            return Ok(bytes);
        };

        let expected = byte_length.div_ceil(4);
        if expected != self.words.len() {
            return Err(CoeError::LengthMismatch {
                byte_length,
                expected,
                words: self.words.len(),
            });
        }
        if bytes[byte_length..].iter().any(|&b| b != 0) {
            return Err(CoeError::NonZeroPadding { byte_length });
        }
        bytes.truncate(byte_length);
        Ok(bytes)
    }
}

/// Parses one COE artifact.
///
/// Comment lines start with `;`. Outside the vector section, lines other than the radix
/// declaration are ignored. Inside it, words may be separated by commas or whitespace, may carry
/// a `0x` prefix and may use either case. The first `;` inside the vector terminates it; anything
/// after that `;` on the same line is a comment.
pub fn decode_words(text: &str) -> Result<DecodedCoe> {
    let mut radix_seen = false;
    let mut in_vector = false;
    let mut terminated = false;
    let mut byte_length = None;
    let mut words = Vec::new();

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(comment) = line.strip_prefix(';') {
            if let Some(value) = comment.trim().strip_prefix(BYTE_LENGTH_KEY) {
                let len = value
                    .trim_start()
                    .strip_prefix('=')
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or(CoeError::InvalidLengthHeader { line: line_no })?;
                byte_length = Some(len);
            }
            continue;
        }

        if terminated {
            return Err(CoeError::TrailingData { line: line_no });
        }

        let data = if in_vector {
            line
        } else {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key.trim().to_ascii_lowercase().as_str() {
                RADIX_KEY => {
                    let radix = value.split(';').next().unwrap_or("").trim();
                    if radix != "16" {
                        return Err(CoeError::UnsupportedRadix {
                            line: line_no,
                            radix: radix.to_string(),
                        });
                    }
                    radix_seen = true;
                    continue;
                }
                VECTOR_KEY => {
                    in_vector = true;
                    value
                }
                _ => continue,
            }
        };

        let (data, ends_here) = match data.split_once(';') {
            Some((data, _comment)) => (data, true),
            None => (data, false),
        };
        for token in data.split(|c: char| c == ',' || c.is_whitespace()) {
            if token.is_empty() {
                continue;
            }
            words.push(parse_word(token, line_no)?);
        }
        if ends_here {
            terminated = true;
        }
    }

    if !radix_seen {
        return Err(CoeError::MissingRadix);
    }
    if !in_vector {
        return Err(CoeError::MissingVector);
    }
    if !terminated {
        return Err(CoeError::MissingTerminator);
    }
    if words.len() > MAX_WORDS {
        return Err(CoeError::TooManyWords {
            words: words.len(),
            max: MAX_WORDS,
        });
    }

    tracing::trace!(words = words.len(), byte_length, "decoded COE vector");
    Ok(DecodedCoe { words, byte_length })
}

fn parse_word(token: &str, line: usize) -> Result<u32> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    let invalid = || CoeError::InvalidToken {
        line,
        token: token.to_string(),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let significant = digits.trim_start_matches('0');
    if significant.len() > 8 {
        return Err(CoeError::WordTooWide {
            line,
            token: token.to_string(),
        });
    }
    if significant.is_empty() {
        return Ok(0);
    }
    u32::from_str_radix(significant, 16).map_err(|_| invalid())
}
