//! Phoneme symbol vocabulary shared with the synthesis model.

use crate::error::{Result, TtsError};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub const PAD: &str = "_";
pub const SP: &str = "SP";
pub const UNK: &str = "UNK";

/// Ids of the reserved entries in [`DEFAULT_SYMBOLS`].
pub const PAD_ID: usize = 0;
pub const SP_ID: usize = 110;
pub const UNK_ID: usize = 111;

/// Style-Bert-VITS2 symbol list: pad, the sorted union of the Chinese,
/// Japanese and English phoneme sets, punctuation, then `SP` and `UNK`.
pub const DEFAULT_SYMBOLS: [&str; 112] = [
    "_", "AA", "E", "EE", "En", "N", "OO", "V", "a", "a:", "aa", "ae", "ah", "ai", "an", "ang",
    "ao", "aw", "ay", "b", "by", "c", "ch", "d", "dh", "dy", "e", "e:", "eh", "ei", "en", "eng",
    "er", "ey", "f", "g", "gy", "h", "hh", "hy", "i", "i0", "i:", "ia", "ian", "iang", "iao",
    "ie", "ih", "in", "ing", "iong", "ir", "iu", "iy", "j", "jh", "k", "ky", "l", "m", "my", "n",
    "ng", "ny", "o", "o:", "ong", "ou", "ow", "oy", "p", "py", "q", "r", "ry", "s", "sh", "t",
    "th", "ts", "ty", "u", "u:", "ua", "uai", "uan", "uang", "uh", "ui", "un", "uo", "uw", "v",
    "van", "ve", "vn", "w", "x", "y", "z", "zh", "zy", "!", "?", "\u{2026}", ",", ".", "'", "-",
    "SP", "UNK",
];

/// Immutable id <-> symbol mapping.
///
/// Lookups canonicalize OpenJTalk spellings first (`cl` -> `q`, every
/// silence/pause marker -> `SP`, devoiced vowels -> lowercase) and fall back
/// to the `UNK` id, so [`SymbolTable::id`] never fails.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<String>,
    ids: HashMap<String, usize>,
    pad_id: usize,
    sp_id: usize,
    unk_id: usize,
}

#[derive(Deserialize)]
struct ModelConfigSymbols {
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn new<S: Into<String>>(symbols: impl IntoIterator<Item = S>) -> Result<Self> {
        let symbols: Vec<String> = symbols.into_iter().map(Into::into).collect();
        let mut ids = HashMap::with_capacity(symbols.len());
        for (index, symbol) in symbols.iter().enumerate() {
            if ids.insert(symbol.clone(), index).is_some() {
                return Err(TtsError::Config(format!("Duplicate symbol '{}'", symbol)));
            }
        }
        let pad_id = ids.get(PAD).copied().unwrap_or(0);
        let sp_id = ids.get(SP).copied().unwrap_or(0);
        let unk_id = ids.get(UNK).copied().unwrap_or(0);
        Ok(Self {
            symbols,
            ids,
            pad_id,
            sp_id,
            unk_id,
        })
    }

    /// Load the `symbols` array from a model `config.json`.
    pub fn from_config_json(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let config: ModelConfigSymbols = serde_json::from_reader(BufReader::new(file))?;
        Self::new(config.symbols)
    }

    /// Map a phonemizer symbol to its model id.
    pub fn id(&self, phoneme: &str) -> usize {
        self.ids
            .get(canonicalize(phoneme))
            .copied()
            .unwrap_or(self.unk_id)
    }

    pub fn contains(&self, phoneme: &str) -> bool {
        self.ids.contains_key(canonicalize(phoneme))
    }

    pub fn symbol(&self, id: usize) -> Option<&str> {
        self.symbols.get(id).map(String::as_str)
    }

    pub fn pad_id(&self) -> usize {
        self.pad_id
    }

    pub fn sp_id(&self) -> usize {
        self.sp_id
    }

    pub fn unk_id(&self) -> usize {
        self.unk_id
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        let symbols: Vec<String> = DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect();
        let ids = symbols
            .iter()
            .enumerate()
            .map(|(index, symbol)| (symbol.clone(), index))
            .collect();
        Self {
            symbols,
            ids,
            pad_id: PAD_ID,
            sp_id: SP_ID,
            unk_id: UNK_ID,
        }
    }
}

/// Collapse OpenJTalk variant spellings onto canonical model symbols.
pub fn canonicalize(phoneme: &str) -> &str {
    match phoneme {
        "cl" => "q",
        "pau" | "sil" | "silB" | "silE" => SP,
        "A" => "a",
        "I" => "i",
        "U" => "u",
        "E" => "e",
        "O" => "o",
        other => other,
    }
}
