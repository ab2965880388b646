//! Input text canonicalization.

const FULLWIDTH_START: u32 = 0xFF01;
const FULLWIDTH_END: u32 = 0xFF5E;
const FULLWIDTH_OFFSET: u32 = 0xFEE0;
const IDEOGRAPHIC_SPACE: char = '\u{3000}';

/// Normalize raw text before phonemization and tokenization.
///
/// Full-width ASCII variants become half-width, the ideographic space becomes
/// a plain space, runs of spaces collapse to one, and surrounding whitespace
/// is trimmed. The function is total and idempotent.
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;

    for ch in text.chars() {
        let mapped = to_half_width(ch);
        if mapped == ' ' {
            if prev_space {
                continue;
            }
            prev_space = true;
        } else {
            prev_space = false;
        }
        out.push(mapped);
    }

    out.trim().to_string()
}

fn to_half_width(ch: char) -> char {
    if ch == IDEOGRAPHIC_SPACE {
        return ' ';
    }
    let code = ch as u32;
    if (FULLWIDTH_START..=FULLWIDTH_END).contains(&code) {
        // The shifted range is printable ASCII, always a valid char.
        char::from_u32(code - FULLWIDTH_OFFSET).unwrap_or(ch)
    } else {
        ch
    }
}
