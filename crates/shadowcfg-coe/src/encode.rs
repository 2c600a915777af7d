pub(crate) const RADIX_KEY: &str = "memory_initialization_radix";
pub(crate) const VECTOR_KEY: &str = "memory_initialization_vector";
pub(crate) const BYTE_LENGTH_KEY: &str = "byte_length";

/// Layout knobs for the encoder. The decoder accepts any layout, so these never affect what
/// decodes back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    pub words_per_line: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { words_per_line: 4 }
    }
}

/// Packs `bytes` into little-endian dwords, zero-padding the final partial word.
pub(crate) fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

/// Renders one COE artifact.
pub(crate) fn encode_words(title: &[&str], bytes: &[u8], options: &EncodeOptions) -> String {
    let words = words(bytes);
    let per_line = options.words_per_line.max(1);

    let mut out = String::with_capacity(words.len() * 9 + 256);
    for line in title {
        out.push_str(&format!("; {line}\n"));
    }
    out.push_str(&format!("; {BYTE_LENGTH_KEY}={}\n", bytes.len()));
    out.push_str(&format!("{RADIX_KEY}=16;\n"));

    if words.is_empty() {
        out.push_str(&format!("{VECTOR_KEY}=;\n"));
        return out;
    }

    out.push_str(&format!("{VECTOR_KEY}=\n"));
    let lines = words.len().div_ceil(per_line);
    for (i, line) in words.chunks(per_line).enumerate() {
        let joined = line
            .iter()
            .map(|w| format!("{w:08x}"))
            .collect::<Vec<_>>()
            .join(",");
        out.push_str(&joined);
        out.push(if i + 1 == lines { ';' } else { ',' });
        out.push('\n');
    }
    out
}
