//! BERT vocabulary loading and character-level tokenization.

use crate::error::{Result, TtsError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const CLS_TOKEN: &str = "[CLS]";
pub const SEP_TOKEN: &str = "[SEP]";
pub const UNK_TOKEN: &str = "[UNK]";
pub const PAD_TOKEN: &str = "[PAD]";

const DEFAULT_CLS_ID: i64 = 1;
const DEFAULT_SEP_ID: i64 = 2;
const DEFAULT_UNK_ID: i64 = 3;
const DEFAULT_PAD_ID: i64 = 0;

#[derive(Debug, Deserialize)]
struct VocabFile {
    #[serde(flatten)]
    map: HashMap<String, i64>,
}

/// Encoded BERT input for one text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Encoding {
    pub input_ids: Vec<i64>,
    pub attention_mask: Vec<i64>,
}

impl Encoding {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Segment ids; the whole input is segment 0.
    pub fn token_type_ids(&self) -> Vec<i64> {
        vec![0; self.input_ids.len()]
    }
}

/// Character-level tokenizer over a DeBERTa vocabulary.
///
/// Only single-character vocabulary entries take part in encoding; every
/// character of the input yields exactly one token.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    chars: HashMap<char, i64>,
    vocab_size: usize,
    cls_id: i64,
    sep_id: i64,
    unk_id: i64,
    pad_id: i64,
}

impl Tokenizer {
    /// Load a flat `{ "token": id, ... }` JSON vocabulary.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|err| {
            TtsError::Config(format!("Failed to open vocab file {:?}: {}", path, err))
        })?;
        let vocab: VocabFile = serde_json::from_reader(BufReader::new(file))?;
        let tokenizer = Self::from_map(vocab.map);
        tracing::info!(
            path = ?path,
            entries = tokenizer.vocab_size,
            chars = tokenizer.chars.len(),
            "Loaded BERT vocabulary"
        );
        Ok(tokenizer)
    }

    pub fn from_map(map: HashMap<String, i64>) -> Self {
        let special = |token: &str, default: i64| map.get(token).copied().unwrap_or(default);
        let cls_id = special(CLS_TOKEN, DEFAULT_CLS_ID);
        let sep_id = special(SEP_TOKEN, DEFAULT_SEP_ID);
        let unk_id = special(UNK_TOKEN, DEFAULT_UNK_ID);
        let pad_id = special(PAD_TOKEN, DEFAULT_PAD_ID);

        let chars = map
            .iter()
            .filter_map(|(token, &id)| {
                let mut it = token.chars();
                match (it.next(), it.next()) {
                    (Some(ch), None) => Some((ch, id)),
                    _ => None,
                }
            })
            .collect();

        Self {
            chars,
            vocab_size: map.len(),
            cls_id,
            sep_id,
            unk_id,
            pad_id,
        }
    }

    /// `[CLS]` + one id per character + `[SEP]`, mask all ones.
    pub fn encode(&self, text: &str) -> Encoding {
        let mut input_ids = Vec::with_capacity(text.len() + 2);
        input_ids.push(self.cls_id);
        input_ids.extend(
            text.chars()
                .map(|ch| self.chars.get(&ch).copied().unwrap_or(self.unk_id)),
        );
        input_ids.push(self.sep_id);
        let attention_mask = vec![1; input_ids.len()];
        Encoding {
            input_ids,
            attention_mask,
        }
    }

    pub fn cls_id(&self) -> i64 {
        self.cls_id
    }

    pub fn sep_id(&self) -> i64 {
        self.sep_id
    }

    pub fn unk_id(&self) -> i64 {
        self.unk_id
    }

    pub fn pad_id(&self) -> i64 {
        self.pad_id
    }

    /// Number of entries in the vocabulary file.
    pub fn len(&self) -> usize {
        self.vocab_size
    }

    pub fn is_empty(&self) -> bool {
        self.vocab_size == 0
    }
}
