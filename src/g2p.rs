//! Japanese G2P: OpenJTalk phonemes -> model symbol ids, tones and word2ph.

use crate::error::{Result, TtsError};
use crate::normalizer::normalize;
use crate::phonemizer::Phonemizer;
use crate::prosody::resolve_tones;
use crate::symbols::SymbolTable;
use crate::word2ph::estimate_word2ph;
use serde::Serialize;
use std::collections::VecDeque;

/// Language id of Japanese in the multilingual symbol layout.
pub const JAPANESE_LANGUAGE_ID: i64 = 1;
/// Japanese tones occupy ids 6..=7 of the shared tone embedding.
pub const JAPANESE_TONE_OFFSET: i64 = 6;

/// Phoneme-level model inputs, pad-bracketed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PhonemeSequence {
    pub phoneme_ids: Vec<i64>,
    pub tones: Vec<i64>,
    pub language_ids: Vec<i64>,
}

impl PhonemeSequence {
    pub fn len(&self) -> usize {
        self.phoneme_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phoneme_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct G2pOutput {
    pub sequence: PhonemeSequence,
    /// Phonemes per BERT token (`[CLS]`, each character, `[SEP]`).
    pub word2ph: Vec<usize>,
    /// The text actually phonemized, after normalization.
    pub normalized_text: String,
}

/// Japanese text -> phoneme sequence using a [`Phonemizer`].
pub struct G2pEngine {
    phonemizer: Box<dyn Phonemizer>,
    symbols: SymbolTable,
}

impl G2pEngine {
    pub fn new(phonemizer: Box<dyn Phonemizer>, symbols: SymbolTable) -> Self {
        Self {
            phonemizer,
            symbols,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn process(&mut self, text: &str) -> Result<G2pOutput> {
        if text.trim().is_empty() {
            return Err(TtsError::Input("Text must not be empty".to_string()));
        }

        let normalized = normalize(text);
        let labels = self.phonemizer.phonemize_with_prosody(&normalized)?;
        if labels.is_empty() {
            return Err(TtsError::Phonemizer {
                code: -1,
                message: "phonemizer returned no phonemes".to_string(),
            });
        }

        let count = labels.len();
        let tones = resolve_tones(
            &labels.phonemes[..count],
            &labels.a1[..count],
            &labels.a2[..count],
            &labels.a3[..count],
        );
        let sequence = self.build_sequence(&labels.phonemes[..count], &tones, &normalized);
        let phone_len = sequence.len();
        let word2ph = match labels.word2ph {
            Some(ref provided) if provided.iter().sum::<usize>() == phone_len => provided.clone(),
            Some(ref provided) => {
                tracing::warn!(
                    provided = provided.iter().sum::<usize>(),
                    expected = phone_len,
                    "Phonemizer alignment does not cover the sequence; estimating"
                );
                estimate_word2ph(&normalized, phone_len)
            }
            None => estimate_word2ph(&normalized, phone_len),
        };

        tracing::debug!(
            target: "sbv2_jp::g2p",
            raw = %labels.phonemes[..count].join(" "),
            a1 = ?&labels.a1[..count],
            a2 = ?&labels.a2[..count],
            a3 = ?&labels.a3[..count],
            resolved_tones = ?tones,
            phoneme_ids = ?sequence.phoneme_ids,
            tones = ?sequence.tones,
            word2ph = ?word2ph,
            word2ph_sum = word2ph.iter().sum::<usize>(),
            "G2P complete"
        );

        Ok(G2pOutput {
            sequence,
            word2ph,
            normalized_text: normalized,
        })
    }

    fn build_sequence(&self, phonemes: &[String], tones: &[u8], normalized: &str) -> PhonemeSequence {
        let mut punctuation = punctuation_queue(normalized, &self.symbols);

        let pad = self.symbols.pad_id() as i64;
        let mut sequence = PhonemeSequence::default();
        sequence.push(pad, JAPANESE_TONE_OFFSET);

        let mut seen_speech = false;
        for (phoneme, &tone) in phonemes.iter().zip(tones) {
            let id = match phoneme.as_str() {
                "sil" | "silB" | "silE" => continue,
                "pau" if !seen_speech => continue,
                "pau" => match punctuation.pop_front() {
                    Some(id) => id,
                    None => continue,
                },
                other => {
                    seen_speech = true;
                    self.symbols.id(other) as i64
                }
            };
            sequence.push(id, i64::from(tone) + JAPANESE_TONE_OFFSET);
        }

        sequence.push(pad, JAPANESE_TONE_OFFSET);
        sequence
    }
}

impl PhonemeSequence {
    fn push(&mut self, id: i64, tone: i64) {
        self.phoneme_ids.push(id);
        self.tones.push(tone);
        self.language_ids.push(JAPANESE_LANGUAGE_ID);
    }
}

/// Model punctuation symbol for a source character.
pub fn punctuation_symbol(ch: char) -> Option<&'static str> {
    match ch {
        '、' | ',' | '，' | '・' => Some(","),
        '。' | '.' | '．' => Some("."),
        '!' | '！' => Some("!"),
        '?' | '？' => Some("?"),
        '…' => Some("…"),
        '\'' => Some("'"),
        '-' | '—' => Some("-"),
        _ => None,
    }
}

/// Punctuation ids in text order; each later pause consumes one.
fn punctuation_queue(text: &str, symbols: &SymbolTable) -> VecDeque<i64> {
    text.chars()
        .filter_map(punctuation_symbol)
        .map(|symbol| symbols.id(symbol) as i64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phonemizer::ProsodyPhonemes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Scripted {
        result: ProsodyPhonemes,
        calls: Arc<AtomicUsize>,
    }

    impl Phonemizer for Scripted {
        fn phonemize_with_prosody(&mut self, _text: &str) -> Result<ProsodyPhonemes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    fn engine(phonemes: &str, a1: &[i32], a2: &[i32], a3: &[i32]) -> (G2pEngine, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let phonemizer = Scripted {
            result: ProsodyPhonemes::from_space_delimited(
                phonemes,
                a1.to_vec(),
                a2.to_vec(),
                a3.to_vec(),
            ),
            calls: calls.clone(),
        };
        (G2pEngine::new(Box::new(phonemizer), SymbolTable::default()), calls)
    }

    fn konnichiwa() -> (G2pEngine, Arc<AtomicUsize>) {
        engine(
            "pau k o N n i ch i w a pau",
            &[0, -4, -4, -3, -2, -2, -1, -1, 0, 0, 0],
            &[0, 1, 1, 2, 3, 3, 4, 4, 5, 5, 0],
            &[0, 5, 5, 4, 3, 3, 2, 2, 1, 1, 0],
        )
    }

    #[test]
    fn empty_input_never_reaches_the_phonemizer() {
        let (mut g2p, calls) = konnichiwa();
        for text in ["", "   ", "\t\n"] {
            let err = g2p.process(text).unwrap_err();
            assert!(matches!(err, TtsError::Input(_)));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn konnichiwa_sequence() {
        let (mut g2p, calls) = konnichiwa();
        let out = g2p.process("こんにちは").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let table = SymbolTable::default();
        let expected: Vec<i64> = ["_", "k", "o", "N", "n", "i", "ch", "i", "w", "a", "_"]
            .iter()
            .map(|s| table.id(s) as i64)
            .collect();
        assert_eq!(out.sequence.phoneme_ids, expected);
        assert_eq!(out.sequence.tones, vec![6, 6, 6, 7, 7, 7, 7, 7, 7, 7, 6]);
        assert!(out.sequence.language_ids.iter().all(|&l| l == JAPANESE_LANGUAGE_ID));
        assert_eq!(out.word2ph.len(), "こんにちは".chars().count() + 2);
        assert_eq!(out.word2ph.iter().sum::<usize>(), out.sequence.len());
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn debug_trace_carries_labels_and_alignment() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let (mut g2p, _) = konnichiwa();
        tracing::subscriber::with_default(subscriber, || g2p.process("こんにちは").unwrap());

        let log = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(log.contains("sbv2_jp::g2p"), "{log}");
        assert!(log.contains("raw=pau k o N n i ch i w a pau"), "{log}");
        assert!(log.contains("a1=[0, -4, -4, -3"), "{log}");
        assert!(log.contains("a2=[0, 1, 1, 2"), "{log}");
        assert!(log.contains("a3=[0, 5, 5, 4"), "{log}");
        assert!(log.contains("resolved_tones=["), "{log}");
        assert!(log.contains("phoneme_ids=["), "{log}");
        assert!(log.contains("tones=[6, 6, 6, 7"), "{log}");
        assert!(log.contains("word2ph=["), "{log}");
        assert!(log.contains("word2ph_sum=11"), "{log}");
    }

    #[test]
    fn pauses_consume_punctuation_in_order() {
        let (mut g2p, _) = engine(
            "pau a pau i pau u pau",
            &[0; 7],
            &[0, 1, 0, 1, 0, 1, 0],
            &[0, 1, 0, 1, 0, 1, 0],
        );
        let out = g2p.process("あ、い？う").unwrap();
        let table = SymbolTable::default();
        let ids = &out.sequence.phoneme_ids;
        // pad a , i ? u pad  (leading pau skipped, trailing pau has nothing left)
        assert_eq!(
            ids,
            &vec![
                0,
                table.id("a") as i64,
                table.id(",") as i64,
                table.id("i") as i64,
                table.id("?") as i64,
                table.id("u") as i64,
                0,
            ]
        );
    }

    #[test]
    fn silence_markers_are_dropped() {
        let (mut g2p, _) = engine("sil a silE", &[0; 3], &[0, 1, 0], &[0, 1, 0]);
        let out = g2p.process("あ").unwrap();
        assert_eq!(out.sequence.len(), 3);
    }

    #[test]
    fn input_is_normalized_before_phonemizing() {
        let (mut g2p, _) = konnichiwa();
        let out = g2p.process("\u{3000}こんにちは！").unwrap();
        assert_eq!(out.normalized_text, "こんにちは!");
    }

    #[test]
    fn zero_phonemes_is_a_phonemizer_error() {
        let (mut g2p, _) = engine("", &[], &[], &[]);
        match g2p.process("あ") {
            Err(TtsError::Phonemizer { code, .. }) => assert_eq!(code, -1),
            other => panic!("expected phonemizer error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn provided_alignment_is_used_when_it_matches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut result = ProsodyPhonemes::from_space_delimited("a i", vec![0, 0], vec![1, 2], vec![2, 2]);
        result.word2ph = Some(vec![1, 1, 1, 1]);
        let mut g2p = G2pEngine::new(
            Box::new(Scripted {
                result,
                calls,
            }),
            SymbolTable::default(),
        );
        let out = g2p.process("あい").unwrap();
        assert_eq!(out.word2ph, vec![1, 1, 1, 1]);
    }

    #[test]
    fn punctuation_mapping() {
        assert_eq!(punctuation_symbol('、'), Some(","));
        assert_eq!(punctuation_symbol('・'), Some(","));
        assert_eq!(punctuation_symbol('。'), Some("."));
        assert_eq!(punctuation_symbol('？'), Some("?"));
        assert_eq!(punctuation_symbol('—'), Some("-"));
        assert_eq!(punctuation_symbol('あ'), None);
    }
}
