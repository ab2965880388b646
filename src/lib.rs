//! Japanese Style-Bert-VITS2 text front end and synthesis runtime.
//!
//! Text is normalized, phonemized through OpenJTalk, mapped to model symbol
//! ids with pitch-accent tones, aligned against BERT features and handed to
//! a caller-supplied synthesis model.

pub mod alignment;
pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod g2p;
pub mod models;
pub mod normalizer;
pub mod phonemizer;
pub mod pipeline;
pub mod preprocessing;
pub mod prosody;
pub mod runtime;
pub mod symbols;
pub mod trace;
pub mod vocab;
pub mod voice;
pub mod word2ph;

pub use audio::{post_process, save_wav};
pub use config::{AudioConfig, GenerationDefaults, PipelineConfig};
pub use error::{ErrorKind, Result, TtsError};
pub use g2p::{G2pEngine, G2pOutput, PhonemeSequence};
pub use models::{select_backend, BackendSelection, EmbeddingModel, SynthesisInputs, SynthesisModel};
pub use phonemizer::{OpenJTalk, Phonemizer, ProsodyPhonemes};
pub use pipeline::{
    prepare_frontend,
    CancelToken,
    Frontend,
    Pipeline,
    PipelineBuilder,
    PipelineStage,
    StageObserver,
    SynthesisRequest,
    SynthesisResult,
    TracingObserver,
};
pub use runtime::{SynthesisQueue, SynthesisTicket};
pub use symbols::SymbolTable;
pub use vocab::Tokenizer;
pub use voice::StyleVectorStore;

/// Static constants shared with the exported models.
pub mod constants {
    pub const SAMPLE_RATE: u32 = 44_100;
    pub const STYLE_DIM: usize = crate::voice::STYLE_DIM;
    pub const EMBEDDING_DIM: usize = crate::alignment::EMBEDDING_DIM;
}
