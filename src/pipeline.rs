//! Text-to-speech pipeline: front end, model calls and post-processing.
//!
//! One [`Pipeline`] owns every engine it drives. Model calls always happen on
//! the thread that called [`Pipeline::synthesize`]; only the CPU alignment
//! step may fan out onto a rayon pool.

use crate::alignment::align_embeddings;
use crate::audio::{post_process, save_wav};
use crate::cache::LruCache;
use crate::config::{GenerationDefaults, PipelineConfig};
use crate::error::{Result, TtsError};
use crate::g2p::{G2pEngine, G2pOutput, PhonemeSequence, JAPANESE_LANGUAGE_ID, JAPANESE_TONE_OFFSET};
use crate::models::{select_backend, EmbeddingModel, SynthesisInputs, SynthesisModel};
use crate::normalizer::normalize;
use crate::phonemizer::{validate_dictionary, OpenJTalk, Phonemizer};
use crate::preprocessing::{adjust_word2ph_for_blanks, intersperse};
use crate::symbols::SymbolTable;
use crate::vocab::{Encoding, Tokenizer};
use crate::voice::{StyleVectorStore, STYLE_DIM};
use ndarray::{Array1, Array2};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and a request.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One synthesis job. Immutable; `with_*` returns an updated copy.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker_id: i64,
    pub style_id: usize,
    pub style_weight: f32,
    pub sdp_ratio: f32,
    pub noise_scale: f32,
    pub noise_scale_w: f32,
    pub length_scale: f32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self::with_defaults(text, &GenerationDefaults::default())
    }

    pub fn with_defaults(text: impl Into<String>, defaults: &GenerationDefaults) -> Self {
        Self {
            text: text.into(),
            speaker_id: 0,
            style_id: 0,
            style_weight: 1.0,
            sdp_ratio: defaults.sdp_ratio,
            noise_scale: defaults.noise_scale,
            noise_scale_w: defaults.noise_scale_w,
            length_scale: defaults.length_scale,
        }
    }

    pub fn with_speaker(self, speaker_id: i64) -> Self {
        Self { speaker_id, ..self }
    }

    pub fn with_style(self, style_id: usize) -> Self {
        Self { style_id, ..self }
    }

    pub fn with_style_weight(self, style_weight: f32) -> Self {
        Self {
            style_weight,
            ..self
        }
    }

    pub fn with_sdp_ratio(self, sdp_ratio: f32) -> Self {
        Self { sdp_ratio, ..self }
    }

    pub fn with_noise_scale(self, noise_scale: f32) -> Self {
        Self {
            noise_scale,
            ..self
        }
    }

    pub fn with_noise_scale_w(self, noise_scale_w: f32) -> Self {
        Self {
            noise_scale_w,
            ..self
        }
    }

    pub fn with_length_scale(self, length_scale: f32) -> Self {
        Self {
            length_scale,
            ..self
        }
    }
}

#[derive(Clone, Debug)]
pub struct SynthesisResult {
    pub audio: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesisResult {
    pub fn duration_secs(&self) -> f32 {
        if self.sample_rate == 0 {
            0.0
        } else {
            self.audio.len() as f32 / self.sample_rate as f32
        }
    }

    pub fn save_wav(&self, path: &Path) -> Result<()> {
        save_wav(&self.audio, path, self.sample_rate)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum PipelineStage {
    Idle,
    Normalizing,
    Phonemizing,
    Tokenizing,
    EmbeddingPending,
    Aligning,
    StyleResolving,
    SynthesisPending,
    PostProcessing,
    Complete,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Receives stage transitions and per-stage diagnostics.
pub trait StageObserver: Send {
    fn on_stage(&mut self, stage: PipelineStage);

    fn on_diagnostic(&mut self, _stage: PipelineStage, _message: &str) {}
}

/// Default observer: everything goes to `tracing` at DEBUG.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl StageObserver for TracingObserver {
    fn on_stage(&mut self, stage: PipelineStage) {
        tracing::debug!(%stage, "Pipeline stage");
    }

    fn on_diagnostic(&mut self, stage: PipelineStage, message: &str) {
        tracing::debug!(%stage, "{}", message);
    }
}

/// Model-ready front-end tensors for one text.
#[derive(Clone, Debug, Serialize)]
pub struct Frontend {
    pub g2p: G2pOutput,
    pub encoding: Encoding,
    /// Blank-interspersed phoneme ids, tones and language ids.
    pub sequence: PhonemeSequence,
    /// word2ph rescaled for `sequence`.
    pub word2ph: Vec<usize>,
}

/// Run the front end without any model.
pub fn prepare_frontend(g2p: &mut G2pEngine, tokenizer: &Tokenizer, text: &str) -> Result<Frontend> {
    let output = g2p.process(text)?;
    let encoding = tokenizer.encode(&output.normalized_text);
    check_token_alignment(&encoding, &output)?;
    let sequence = intersperse_sequence(&output.sequence);
    let word2ph = adjust_word2ph_for_blanks(&output.word2ph);
    Ok(Frontend {
        g2p: output,
        encoding,
        sequence,
        word2ph,
    })
}

fn check_token_alignment(encoding: &Encoding, output: &G2pOutput) -> Result<()> {
    if encoding.len() != output.word2ph.len() {
        return Err(TtsError::Alignment(format!(
            "{} tokens but word2ph has {} entries",
            encoding.len(),
            output.word2ph.len()
        )));
    }
    Ok(())
}

fn intersperse_sequence(sequence: &PhonemeSequence) -> PhonemeSequence {
    PhonemeSequence {
        phoneme_ids: intersperse(&sequence.phoneme_ids, 0),
        tones: intersperse(&sequence.tones, 0),
        language_ids: intersperse(&sequence.language_ids, 0),
    }
}

/// Stage bookkeeping for one request; every transition checks the token.
struct Progress<'a> {
    stage: &'a mut PipelineStage,
    observer: &'a mut Box<dyn StageObserver>,
    cancel: &'a CancelToken,
}

impl Progress<'_> {
    fn advance(&mut self, next: PipelineStage) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(TtsError::Cancelled);
        }
        *self.stage = next;
        self.observer.on_stage(next);
        Ok(())
    }

    fn diagnostic(&mut self, message: &str) {
        self.observer.on_diagnostic(*self.stage, message);
    }
}

struct Engines {
    g2p: G2pEngine,
    tokenizer: Tokenizer,
    embedding: Box<dyn EmbeddingModel>,
    synthesis: Box<dyn SynthesisModel>,
}

pub struct Pipeline {
    engines: Option<Engines>,
    styles: StyleVectorStore,
    cache: LruCache<String, Array2<f32>>,
    config: PipelineConfig,
    observer: Box<dyn StageObserver>,
    pool: Option<rayon::ThreadPool>,
    stage: PipelineStage,
}

impl Pipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(config)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn styles(&self) -> &StyleVectorStore {
        &self.styles
    }

    pub fn cached_embeddings(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.engines.is_none()
    }

    /// A request pre-filled with this pipeline's generation defaults.
    pub fn request(&self, text: impl Into<String>) -> SynthesisRequest {
        SynthesisRequest::with_defaults(text, &self.config.generation)
    }

    pub fn synthesize(&mut self, request: &SynthesisRequest) -> Result<SynthesisResult> {
        self.synthesize_with_cancel(request, &CancelToken::new())
    }

    pub fn synthesize_with_cancel(
        &mut self,
        request: &SynthesisRequest,
        cancel: &CancelToken,
    ) -> Result<SynthesisResult> {
        if self.engines.is_none() {
            return Err(TtsError::Disposed);
        }
        match self.run(request, cancel) {
            Ok(result) => Ok(result),
            Err(err) => {
                self.stage = PipelineStage::Failed;
                self.observer.on_stage(PipelineStage::Failed);
                if err.is_cancelled() {
                    tracing::debug!("Synthesis cancelled");
                } else {
                    tracing::warn!(error = %err, "Synthesis failed");
                }
                Err(err)
            }
        }
    }

    fn run(&mut self, request: &SynthesisRequest, cancel: &CancelToken) -> Result<SynthesisResult> {
        let Pipeline {
            engines,
            styles,
            cache,
            config,
            observer,
            pool,
            stage,
        } = self;
        let engines = engines.as_mut().ok_or(TtsError::Disposed)?;
        let mut progress = Progress {
            stage,
            observer,
            cancel,
        };

        progress.advance(PipelineStage::Normalizing)?;
        let normalized = normalize(&request.text);
        if normalized.is_empty() {
            return Err(TtsError::Input("Text must not be empty".to_string()));
        }
        if config.max_text_chars > 0 && normalized.chars().count() > config.max_text_chars {
            return Err(TtsError::Input(format!(
                "Text has {} characters, limit is {}",
                normalized.chars().count(),
                config.max_text_chars
            )));
        }

        progress.advance(PipelineStage::Phonemizing)?;
        let g2p = engines.g2p.process(&normalized)?;

        progress.advance(PipelineStage::Tokenizing)?;
        let encoding = engines.tokenizer.encode(&g2p.normalized_text);
        check_token_alignment(&encoding, &g2p)?;

        progress.advance(PipelineStage::EmbeddingPending)?;
        let (embeddings, fresh) = match cache.get(&g2p.normalized_text) {
            Some(hit) => (hit.clone(), false),
            None => {
                let out = engines
                    .embedding
                    .run(&encoding.input_ids, &encoding.attention_mask)?;
                (out, true)
            }
        };
        let hidden = engines.embedding.hidden_size();
        if embeddings.nrows() != hidden || embeddings.ncols() != encoding.len() {
            return Err(TtsError::Inference(format!(
                "embedding model returned [{}, {}], expected [{}, {}]",
                embeddings.nrows(),
                embeddings.ncols(),
                hidden,
                encoding.len()
            )));
        }

        progress.advance(PipelineStage::Aligning)?;
        let sequence = intersperse_sequence(&g2p.sequence);
        let word2ph = adjust_word2ph_for_blanks(&g2p.word2ph);
        let phone_len = sequence.len();
        let align = || align_embeddings(embeddings.view(), &word2ph, phone_len);
        let bert = match pool {
            Some(pool) => pool.install(align)?,
            None => align()?,
        };
        progress.diagnostic(&format!(
            "tokens={} phonemes={} cached={}",
            encoding.len(),
            phone_len,
            !fresh
        ));

        progress.advance(PipelineStage::StyleResolving)?;
        let style = styles.get_vector(request.style_id, request.style_weight)?;

        progress.advance(PipelineStage::SynthesisPending)?;
        let inputs = SynthesisInputs {
            phoneme_ids: &sequence.phoneme_ids,
            tones: &sequence.tones,
            language_ids: &sequence.language_ids,
            speaker_id: request.speaker_id,
            bert: bert.view(),
            style: style.view(),
            sdp_ratio: request.sdp_ratio,
            noise_scale: request.noise_scale,
            noise_scale_w: request.noise_scale_w,
            length_scale: request.length_scale,
        };
        inputs.check()?;
        let audio = engines.synthesis.run(&inputs)?;

        progress.advance(PipelineStage::PostProcessing)?;
        let audio = post_process(audio, &config.audio);

        progress.advance(PipelineStage::Complete)?;
        if fresh {
            cache.put(g2p.normalized_text, embeddings);
        }

        Ok(SynthesisResult {
            audio,
            sample_rate: config.audio.sample_rate,
        })
    }

    /// Exercise both models once with dummy inputs.
    ///
    /// Model failures are logged, not returned.
    pub fn warmup(&mut self) -> Result<()> {
        let engines = self.engines.as_mut().ok_or(TtsError::Disposed)?;

        let tokens = [1i64, 100, 2];
        let mask = [1i64; 3];
        if let Err(err) = engines.embedding.run(&tokens, &mask) {
            tracing::warn!(error = %err, "Embedding warmup failed");
        }

        let ids = [0i64, 0, 0];
        let tones = [JAPANESE_TONE_OFFSET; 3];
        let langs = [JAPANESE_LANGUAGE_ID; 3];
        let bert = Array2::<f32>::zeros((engines.embedding.hidden_size(), ids.len()));
        let style = Array1::<f32>::zeros(STYLE_DIM);
        let defaults = &self.config.generation;
        let inputs = SynthesisInputs {
            phoneme_ids: &ids,
            tones: &tones,
            language_ids: &langs,
            speaker_id: 0,
            bert: bert.view(),
            style: style.view(),
            sdp_ratio: defaults.sdp_ratio,
            noise_scale: defaults.noise_scale,
            noise_scale_w: defaults.noise_scale_w,
            length_scale: defaults.length_scale,
        };
        if let Err(err) = engines.synthesis.run(&inputs) {
            tracing::warn!(error = %err, "Synthesis warmup failed");
        }

        tracing::info!("Pipeline warmup complete");
        Ok(())
    }

    /// Release every engine. Later calls fail with [`TtsError::Disposed`].
    pub fn dispose(&mut self) {
        if self.engines.take().is_some() {
            self.cache.clear();
            self.styles = StyleVectorStore::new();
            self.stage = PipelineStage::Idle;
            tracing::info!("Pipeline disposed");
        }
    }
}

/// Assembles a [`Pipeline`]; anything not supplied is loaded from the
/// config's paths.
pub struct PipelineBuilder {
    config: PipelineConfig,
    phonemizer: Option<Box<dyn Phonemizer>>,
    symbols: Option<SymbolTable>,
    tokenizer: Option<Tokenizer>,
    embedding: Option<Box<dyn EmbeddingModel>>,
    synthesis: Option<Box<dyn SynthesisModel>>,
    styles: Option<StyleVectorStore>,
    observer: Option<Box<dyn StageObserver>>,
}

impl PipelineBuilder {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            phonemizer: None,
            symbols: None,
            tokenizer: None,
            embedding: None,
            synthesis: None,
            styles: None,
            observer: None,
        }
    }

    pub fn phonemizer(mut self, phonemizer: Box<dyn Phonemizer>) -> Self {
        self.phonemizer = Some(phonemizer);
        self
    }

    pub fn symbols(mut self, symbols: SymbolTable) -> Self {
        self.symbols = Some(symbols);
        self
    }

    pub fn tokenizer(mut self, tokenizer: Tokenizer) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn embedding_model(mut self, model: Box<dyn EmbeddingModel>) -> Self {
        self.embedding = Some(model);
        self
    }

    pub fn synthesis_model(mut self, model: Box<dyn SynthesisModel>) -> Self {
        self.synthesis = Some(model);
        self
    }

    pub fn styles(mut self, styles: StyleVectorStore) -> Self {
        self.styles = Some(styles);
        self
    }

    pub fn observer(mut self, observer: Box<dyn StageObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let config = self.config;
        config.validate()?;

        let phonemizer = match self.phonemizer {
            Some(phonemizer) => phonemizer,
            None => open_phonemizer(&config)?,
        };
        let symbols = match (self.symbols, &config.symbols_config_path) {
            (Some(symbols), _) => symbols,
            (None, Some(path)) => SymbolTable::from_config_json(path)?,
            (None, None) => SymbolTable::default(),
        };
        let tokenizer = match (self.tokenizer, &config.vocab_path) {
            (Some(tokenizer), _) => tokenizer,
            (None, Some(path)) => Tokenizer::load(path)?,
            (None, None) => return Err(TtsError::Config("No vocab_path configured".to_string())),
        };
        let styles = match (self.styles, &config.style_vector_path) {
            (Some(styles), _) => styles,
            (None, Some(path)) => StyleVectorStore::from_file(path)?,
            (None, None) => StyleVectorStore::new(),
        };
        let embedding = self
            .embedding
            .ok_or_else(|| TtsError::Config("No embedding model supplied".to_string()))?;
        let synthesis = self
            .synthesis
            .ok_or_else(|| TtsError::Config("No synthesis model supplied".to_string()))?;

        let pool = if config.cpu_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(config.cpu_threads)
                .thread_name(|i| format!("sbv2-cpu-{}", i))
                .build()
                .map_err(|err| TtsError::Config(format!("Failed to build thread pool: {}", err)))?;
            Some(pool)
        } else {
            None
        };

        let mut pipeline = Pipeline {
            engines: Some(Engines {
                g2p: G2pEngine::new(phonemizer, symbols),
                tokenizer,
                embedding,
                synthesis,
            }),
            styles,
            cache: LruCache::new(config.embedding_cache_capacity),
            observer: self
                .observer
                .unwrap_or_else(|| Box::new(TracingObserver) as Box<dyn StageObserver>),
            pool,
            stage: PipelineStage::Idle,
            config,
        };

        if pipeline.config.enable_warmup {
            pipeline.warmup()?;
        }
        Ok(pipeline)
    }
}

fn open_phonemizer(config: &PipelineConfig) -> Result<Box<dyn Phonemizer>> {
    let dict = config
        .dictionary_path
        .as_deref()
        .ok_or_else(|| TtsError::Config("No dictionary_path configured".to_string()))?;
    validate_dictionary(dict)?;
    // A configured library that fails to load falls back to the default search path.
    let phonemizer = match &config.phonemizer_library {
        Some(library) => select_backend(
            || OpenJTalk::open_with_library(library, dict),
            || OpenJTalk::open(dict),
        )
        .into_result()?,
        None => OpenJTalk::open(dict)?,
    };
    Ok(Box::new(phonemizer))
}
