//! Character -> phoneme-count estimation for BERT feature alignment.
//!
//! Used when the phonemizer does not report its own alignment. Output has one
//! entry per character plus the `[CLS]` and `[SEP]` boundary tokens, and its
//! sum always equals the phoneme count.

const BOUNDARY_PHONES: usize = 1;
const KATAKANA_START: u32 = 0x30A0;
const KATAKANA_END: u32 = 0x30FF;
const KANA_FOLD: u32 = 0x60;

/// Expected phoneme count for a hiragana character, or `None` if unknown.
fn kana_phones(ch: char) -> Option<usize> {
    match ch {
        // Vowels, small kana, moraic nasal, を, sokuon, long vowel mark
        'あ' | 'い' | 'う' | 'え' | 'お' | 'ぁ' | 'ぃ' | 'ぅ' | 'ぇ' | 'ぉ' | 'ゃ' | 'ゅ'
        | 'ょ' | 'ゎ' | 'ん' | 'を' | 'っ' | 'ー' => Some(1),
        // Punctuation maps to a single pause/punctuation symbol
        '、' | '。' | '！' | '？' | '，' | '．' | '…' | '・' | ',' | '.' | '!' | '?' | '-'
        | '\'' => Some(1),
        // Consonant + vowel
        'か' | 'き' | 'く' | 'け' | 'こ' | 'が' | 'ぎ' | 'ぐ' | 'げ' | 'ご' | 'さ' | 'し'
        | 'す' | 'せ' | 'そ' | 'ざ' | 'じ' | 'ず' | 'ぜ' | 'ぞ' | 'た' | 'ち' | 'つ' | 'て'
        | 'と' | 'だ' | 'ぢ' | 'づ' | 'で' | 'ど' | 'な' | 'に' | 'ぬ' | 'ね' | 'の' | 'は'
        | 'ひ' | 'ふ' | 'へ' | 'ほ' | 'ば' | 'び' | 'ぶ' | 'べ' | 'ぼ' | 'ぱ' | 'ぴ' | 'ぷ'
        | 'ぺ' | 'ぽ' | 'ま' | 'み' | 'む' | 'め' | 'も' | 'や' | 'ゆ' | 'よ' | 'ら' | 'り'
        | 'る' | 'れ' | 'ろ' | 'わ' | 'ゔ' => Some(2),
        _ => None,
    }
}

fn fold_katakana(ch: char) -> char {
    let code = ch as u32;
    // ー (U+30FC) and ・ (U+30FB) have no hiragana counterpart.
    if (KATAKANA_START..=KATAKANA_END).contains(&code) && ch != 'ー' && ch != '・' {
        char::from_u32(code - KANA_FOLD).unwrap_or(ch)
    } else {
        ch
    }
}

/// Estimate how many phonemes each character of `text` produced.
///
/// Known kana get their table value; unknown characters (kanji, Latin, ...)
/// share whatever is left evenly, earlier ones taking the remainder. Any
/// difference against `total_phones` is settled on the last character, and
/// an overshoot is trimmed right to left so the sum matches exactly.
pub fn estimate_word2ph(text: &str, total_phones: usize) -> Vec<usize> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![total_phones, 0];
    }

    let mut word2ph = Vec::with_capacity(chars.len() + 2);
    word2ph.push(BOUNDARY_PHONES);

    let mut known_total = 0usize;
    let mut unknown = Vec::new();
    for &ch in &chars {
        match kana_phones(fold_katakana(ch)) {
            Some(count) => {
                known_total += count;
                word2ph.push(count);
            }
            None => {
                unknown.push(word2ph.len());
                word2ph.push(0);
            }
        }
    }
    word2ph.push(BOUNDARY_PHONES);

    let remainder = total_phones as i64 - known_total as i64 - 2 * BOUNDARY_PHONES as i64;
    if !unknown.is_empty() && remainder > 0 {
        let remainder = remainder as usize;
        let share = remainder / unknown.len();
        let extra = remainder % unknown.len();
        for (rank, &slot) in unknown.iter().enumerate() {
            word2ph[slot] = share + usize::from(rank < extra);
        }
    }

    settle(&mut word2ph, total_phones);
    word2ph
}

/// Force `sum(word2ph) == total`.
fn settle(word2ph: &mut [usize], total: usize) {
    let sum: usize = word2ph.iter().sum();
    let last_char = word2ph.len() - 2;
    if sum < total {
        word2ph[last_char] += total - sum;
        return;
    }

    let mut surplus = sum - total;
    // Characters first (right to left), boundary tokens last.
    let order = (1..=last_char).rev().chain([word2ph.len() - 1, 0]);
    for index in order {
        if surplus == 0 {
            break;
        }
        let take = surplus.min(word2ph[index]);
        word2ph[index] -= take;
        surplus -= take;
    }
}
