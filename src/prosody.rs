//! Pitch-accent tone resolution from OpenJTalk prosody labels.
//!
//! Each phoneme carries three label values from the full-context label:
//! A1 (mora distance to the accent nucleus), A2 (mora position in the
//! accent phrase, 1-based) and A3 (moras remaining in the phrase). Tones are
//! accumulated per accent phrase and then normalized to low (0) / high (1).

/// Markers that separate accent phrases and always receive tone 0.
pub fn is_silence(phoneme: &str) -> bool {
    matches!(phoneme, "sil" | "silB" | "silE" | "pau")
}

/// Vowels (voiced or devoiced), the moraic nasal and the geminate marker.
fn closes_mora(phoneme: &str) -> bool {
    matches!(
        phoneme,
        "a" | "i" | "u" | "e" | "o" | "A" | "I" | "U" | "E" | "O" | "N" | "cl"
    )
}

/// Resolve a binary tone for every phoneme.
///
/// All inputs are read up to the shortest length; the result has that
/// length. Within an accent phrase the rules are checked in order and the
/// first match wins:
///
/// 1. phrase boundary (`A3 == 1`, next `A2 == 1`, phoneme closes a mora):
///    flush the phrase and restart at 0,
/// 2. fall (`A1 == 0`, next `A2 == A2 + 1`, `A2 != A3`): delta - 1,
/// 3. rise (`A2 == 1`, next `A2 == 2`): delta + 1.
pub fn resolve_tones<S: AsRef<str>>(phonemes: &[S], a1: &[i32], a2: &[i32], a3: &[i32]) -> Vec<u8> {
    let count = phonemes.len().min(a1.len()).min(a2.len()).min(a3.len());
    let mut tones = vec![0u8; count];
    let mut phrase: Vec<(usize, i32)> = Vec::new();
    let mut delta = 0i32;

    for i in 0..count {
        let phoneme = phonemes[i].as_ref();

        if is_silence(phoneme) {
            flush_phrase(&mut phrase, &mut tones);
            delta = 0;
            tones[i] = 0;
            continue;
        }

        phrase.push((i, delta));

        let a2_next = if i + 1 < count { a2[i + 1] } else { 0 };

        if a3[i] == 1 && a2_next == 1 && closes_mora(phoneme) {
            flush_phrase(&mut phrase, &mut tones);
            delta = 0;
        } else if a1[i] == 0 && a2_next == a2[i] + 1 && a2[i] != a3[i] {
            delta -= 1;
        } else if a2[i] == 1 && a2_next == 2 {
            delta += 1;
        }
    }

    flush_phrase(&mut phrase, &mut tones);
    tones
}

/// Write one accent phrase into `tones`, shifting a `{-1, 0}` phrase up to
/// `{0, 1}` and clamping everything else into `[0, 1]`.
fn flush_phrase(phrase: &mut Vec<(usize, i32)>, tones: &mut [u8]) {
    if phrase.is_empty() {
        return;
    }
    let min = phrase.iter().map(|&(_, t)| t).min().unwrap_or(0);
    let shift = if min < 0 { 1 } else { 0 };
    for &(index, tone) in phrase.iter() {
        tones[index] = (tone + shift).clamp(0, 1) as u8;
    }
    phrase.clear();
}
