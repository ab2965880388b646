use ndarray::Array2;
use sbv2_jp::{
    CancelToken, EmbeddingModel, Pipeline, PipelineConfig, PipelineStage, Phonemizer,
    ProsodyPhonemes, StageObserver, StyleVectorStore, SynthesisInputs, SynthesisModel,
    SynthesisQueue, SynthesisRequest, Tokenizer, TtsError,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};

/// One vowel per character, bracketed by pauses.
struct VowelPhonemizer {
    calls: Arc<AtomicUsize>,
}

impl Phonemizer for VowelPhonemizer {
    fn phonemize_with_prosody(&mut self, text: &str) -> sbv2_jp::Result<ProsodyPhonemes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = text.chars().count() as i32;
        let mut phonemes = vec!["pau".to_string()];
        phonemes.extend((0..n).map(|_| "a".to_string()));
        phonemes.push("pau".to_string());
        let mut a2 = vec![0];
        a2.extend(1..=n);
        a2.push(0);
        let mut a3 = vec![0];
        a3.extend((0..n).map(|_| n));
        a3.push(0);
        Ok(ProsodyPhonemes {
            a1: vec![0; phonemes.len()],
            phonemes,
            a2,
            a3,
            word2ph: None,
        })
    }
}

struct MockEmbedding {
    calls: Arc<AtomicUsize>,
}

impl EmbeddingModel for MockEmbedding {
    fn hidden_size(&self) -> usize {
        1024
    }

    fn run(&mut self, token_ids: &[i64], _attention_mask: &[i64]) -> sbv2_jp::Result<Array2<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Array2::from_shape_fn((1024, token_ids.len()), |(_, t)| t as f32))
    }
}

#[derive(Default)]
struct SynthLog {
    phone_lens: Vec<usize>,
    bert_cols: Vec<usize>,
    style_heads: Vec<f32>,
}

struct MockSynthesis {
    log: Arc<Mutex<SynthLog>>,
    fail: bool,
    started: Option<mpsc::Sender<()>>,
    gate: Option<mpsc::Receiver<()>>,
}

impl SynthesisModel for MockSynthesis {
    fn run(&mut self, inputs: &SynthesisInputs<'_>) -> sbv2_jp::Result<Vec<f32>> {
        {
            let mut log = self.log.lock().unwrap();
            log.phone_lens.push(inputs.phone_len());
            log.bert_cols.push(inputs.bert.ncols());
            log.style_heads.push(inputs.style[0]);
        }
        if let Some(started) = self.started.take() {
            let _ = started.send(());
        }
        if let Some(gate) = self.gate.take() {
            let _ = gate.recv();
        }
        if self.fail {
            return Err(TtsError::Inference("mock failure".to_string()));
        }
        Ok(vec![0.5; inputs.phone_len() * 512])
    }
}

struct Recorder(Arc<Mutex<Vec<PipelineStage>>>);

impl StageObserver for Recorder {
    fn on_stage(&mut self, stage: PipelineStage) {
        self.0.lock().unwrap().push(stage);
    }
}

struct Harness {
    phonemizer_calls: Arc<AtomicUsize>,
    embedding_calls: Arc<AtomicUsize>,
    synth: Arc<Mutex<SynthLog>>,
    stages: Arc<Mutex<Vec<PipelineStage>>>,
}

fn tokenizer() -> Tokenizer {
    let mut map = HashMap::new();
    map.insert("[CLS]".to_string(), 1);
    map.insert("[SEP]".to_string(), 2);
    map.insert("[UNK]".to_string(), 3);
    map.insert("あ".to_string(), 40);
    Tokenizer::from_map(map)
}

fn styles() -> StyleVectorStore {
    StyleVectorStore::from_array(Array2::from_shape_fn((3, 256), |(r, _)| r as f32)).unwrap()
}

fn build(config: PipelineConfig, synthesis: MockSynthesis, log: Arc<Mutex<SynthLog>>) -> (Pipeline, Harness) {
    let harness = Harness {
        phonemizer_calls: Arc::new(AtomicUsize::new(0)),
        embedding_calls: Arc::new(AtomicUsize::new(0)),
        synth: log,
        stages: Arc::new(Mutex::new(Vec::new())),
    };
    let pipeline = Pipeline::builder(config)
        .phonemizer(Box::new(VowelPhonemizer {
            calls: harness.phonemizer_calls.clone(),
        }))
        .tokenizer(tokenizer())
        .styles(styles())
        .embedding_model(Box::new(MockEmbedding {
            calls: harness.embedding_calls.clone(),
        }))
        .synthesis_model(Box::new(synthesis))
        .observer(Box::new(Recorder(harness.stages.clone())))
        .build()
        .expect("pipeline should build");
    (pipeline, harness)
}

fn no_warmup() -> PipelineConfig {
    PipelineConfig {
        enable_warmup: false,
        ..PipelineConfig::default()
    }
}

fn mock_synthesis(log: &Arc<Mutex<SynthLog>>) -> MockSynthesis {
    MockSynthesis {
        log: log.clone(),
        fail: false,
        started: None,
        gate: None,
    }
}

fn pipeline() -> (Pipeline, Harness) {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    build(no_warmup(), mock_synthesis(&log), log)
}

#[test]
fn full_request_produces_normalized_audio() {
    let (mut pipeline, harness) = pipeline();
    let result = pipeline
        .synthesize(&SynthesisRequest::new("あああ").with_style(2).with_style_weight(0.5))
        .unwrap();

    assert_eq!(result.sample_rate, 44_100);
    // pad + 3 vowels + pad = 5, interspersed to 11
    let log = harness.synth.lock().unwrap();
    assert_eq!(log.phone_lens, vec![11]);
    assert_eq!(log.bert_cols, vec![11]);
    assert_eq!(log.style_heads, vec![1.0]);
    assert_eq!(result.audio.len(), 11 * 512);
    assert!((result.audio[0] - 0.95).abs() < 1e-6);
    assert!((result.duration_secs() - (11.0 * 512.0 / 44_100.0)).abs() < 1e-6);
    assert_eq!(pipeline.stage(), PipelineStage::Complete);
}

#[test]
fn stages_are_reported_in_order() {
    let (mut pipeline, harness) = pipeline();
    pipeline.synthesize(&SynthesisRequest::new("ああ")).unwrap();
    assert_eq!(
        *harness.stages.lock().unwrap(),
        vec![
            PipelineStage::Normalizing,
            PipelineStage::Phonemizing,
            PipelineStage::Tokenizing,
            PipelineStage::EmbeddingPending,
            PipelineStage::Aligning,
            PipelineStage::StyleResolving,
            PipelineStage::SynthesisPending,
            PipelineStage::PostProcessing,
            PipelineStage::Complete,
        ]
    );
}

#[test]
fn empty_text_fails_before_phonemizing() {
    let (mut pipeline, harness) = pipeline();
    let err = pipeline.synthesize(&SynthesisRequest::new("\u{3000} ")).unwrap_err();
    assert!(matches!(err, TtsError::Input(_)));
    assert_eq!(harness.phonemizer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
    assert_eq!(harness.stages.lock().unwrap().last(), Some(&PipelineStage::Failed));
}

#[test]
fn embeddings_are_cached_by_normalized_text() {
    let (mut pipeline, harness) = pipeline();
    pipeline.synthesize(&SynthesisRequest::new("ああ")).unwrap();
    pipeline.synthesize(&SynthesisRequest::new("\u{3000}ああ ")).unwrap();
    assert_eq!(harness.embedding_calls.load(Ordering::SeqCst), 1);
    assert_eq!(pipeline.cached_embeddings(), 1);

    pipeline.clear_cache();
    pipeline.synthesize(&SynthesisRequest::new("ああ")).unwrap();
    assert_eq!(harness.embedding_calls.load(Ordering::SeqCst), 2);
}

#[test]
fn failed_request_leaves_cache_untouched() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let synthesis = MockSynthesis {
        fail: true,
        ..mock_synthesis(&log)
    };
    let (mut pipeline, _) = build(no_warmup(), synthesis, log);
    let err = pipeline.synthesize(&SynthesisRequest::new("ああ")).unwrap_err();
    assert!(matches!(err, TtsError::Inference(_)));
    assert_eq!(pipeline.cached_embeddings(), 0);
}

#[test]
fn style_out_of_range_is_reported() {
    let (mut pipeline, _) = pipeline();
    let err = pipeline
        .synthesize(&SynthesisRequest::new("あ").with_style(5))
        .unwrap_err();
    assert!(matches!(err, TtsError::StyleOutOfRange { id: 5, count: 3 }));
}

#[test]
fn cancelled_token_stops_before_any_work() {
    let (mut pipeline, harness) = pipeline();
    let cancel = CancelToken::new();
    cancel.cancel();
    let err = pipeline
        .synthesize_with_cancel(&SynthesisRequest::new("ああ"), &cancel)
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(harness.phonemizer_calls.load(Ordering::SeqCst), 0);
    assert_eq!(harness.embedding_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn cancel_during_synthesis_discards_audio() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let synthesis = MockSynthesis {
        started: Some(started_tx),
        gate: Some(gate_rx),
        ..mock_synthesis(&log)
    };
    let (mut pipeline, harness) = build(no_warmup(), synthesis, log);
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();

    let worker = std::thread::spawn(move || {
        let result = pipeline.synthesize_with_cancel(&SynthesisRequest::new("ああ"), &worker_cancel);
        (result, pipeline)
    });
    started_rx.recv().unwrap();
    cancel.cancel();
    gate_tx.send(()).unwrap();

    let (result, pipeline) = worker.join().unwrap();
    assert!(result.unwrap_err().is_cancelled());
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
    assert_eq!(pipeline.cached_embeddings(), 0);
    // The model call finished; its output was dropped at the next boundary.
    assert_eq!(harness.synth.lock().unwrap().phone_lens, vec![9]);
    assert!(!harness.stages.lock().unwrap().contains(&PipelineStage::PostProcessing));
}

/// Claims the exported width but returns a narrower feature matrix.
struct NarrowEmbedding;

impl EmbeddingModel for NarrowEmbedding {
    fn hidden_size(&self) -> usize {
        1024
    }

    fn run(&mut self, token_ids: &[i64], _attention_mask: &[i64]) -> sbv2_jp::Result<Array2<f32>> {
        Ok(Array2::zeros((768, token_ids.len())))
    }
}

#[test]
fn wrong_width_embeddings_never_reach_synthesis() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let mut pipeline = Pipeline::builder(no_warmup())
        .phonemizer(Box::new(VowelPhonemizer {
            calls: Arc::new(AtomicUsize::new(0)),
        }))
        .tokenizer(tokenizer())
        .styles(styles())
        .embedding_model(Box::new(NarrowEmbedding))
        .synthesis_model(Box::new(mock_synthesis(&log)))
        .build()
        .unwrap();
    let err = pipeline.synthesize(&SynthesisRequest::new("ああ")).unwrap_err();
    assert!(matches!(err, TtsError::Inference(_)));
    assert!(log.lock().unwrap().phone_lens.is_empty());
    assert_eq!(pipeline.cached_embeddings(), 0);
}

#[test]
fn text_limit_is_enforced() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let config = PipelineConfig {
        max_text_chars: 2,
        ..no_warmup()
    };
    let (mut pipeline, _) = build(config, mock_synthesis(&log), log);
    assert!(pipeline.synthesize(&SynthesisRequest::new("ああ")).is_ok());
    assert!(matches!(
        pipeline.synthesize(&SynthesisRequest::new("あああ")),
        Err(TtsError::Input(_))
    ));
}

#[test]
fn disposed_pipeline_rejects_requests() {
    let (mut pipeline, _) = pipeline();
    pipeline.dispose();
    assert!(pipeline.is_disposed());
    assert!(matches!(
        pipeline.synthesize(&SynthesisRequest::new("あ")),
        Err(TtsError::Disposed)
    ));
    assert!(matches!(pipeline.warmup(), Err(TtsError::Disposed)));
}

#[test]
fn warmup_runs_both_models_and_tolerates_failure() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let synthesis = MockSynthesis {
        fail: true,
        ..mock_synthesis(&log)
    };
    let (_pipeline, harness) = build(PipelineConfig::default(), synthesis, log);
    assert_eq!(harness.embedding_calls.load(Ordering::SeqCst), 1);
    assert_eq!(harness.synth.lock().unwrap().phone_lens, vec![3]);
}

#[test]
fn thread_pool_alignment_matches() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let config = PipelineConfig {
        cpu_threads: 2,
        ..no_warmup()
    };
    let (mut pipeline, harness) = build(config, mock_synthesis(&log), log);
    pipeline.synthesize(&SynthesisRequest::new("あああ")).unwrap();
    assert_eq!(harness.synth.lock().unwrap().bert_cols, vec![11]);
}

#[test]
fn queue_processes_in_submission_order() {
    let (pipeline, harness) = pipeline();
    let queue = SynthesisQueue::new(pipeline).unwrap();

    let tickets: Vec<_> = ["あ", "ああ", "あああ"]
        .iter()
        .map(|text| queue.submit(SynthesisRequest::new(*text), CancelToken::new()))
        .collect();
    for ticket in tickets {
        ticket.wait().unwrap();
    }

    // n characters -> 2 * (n + 2) + 1 phonemes
    assert_eq!(harness.synth.lock().unwrap().phone_lens, vec![7, 9, 11]);
}

#[test]
fn queue_ticket_is_a_future() {
    let (pipeline, _) = pipeline();
    let queue = SynthesisQueue::new(pipeline).unwrap();
    let ticket = queue.submit(SynthesisRequest::new("ああ"), CancelToken::new());
    let result = futures::executor::block_on(ticket).unwrap();
    assert_eq!(result.sample_rate, 44_100);
    assert!(queue.synthesize(SynthesisRequest::new("あ")).is_ok());
}

#[test]
fn queue_clear_cancels_waiting_requests() {
    let log = Arc::new(Mutex::new(SynthLog::default()));
    let (started_tx, started_rx) = mpsc::channel();
    let (gate_tx, gate_rx) = mpsc::channel();
    let synthesis = MockSynthesis {
        started: Some(started_tx),
        gate: Some(gate_rx),
        ..mock_synthesis(&log)
    };
    let (pipeline, _) = build(no_warmup(), synthesis, log);
    let queue = SynthesisQueue::new(pipeline).unwrap();

    let running = queue.submit(SynthesisRequest::new("あ"), CancelToken::new());
    started_rx.recv().unwrap();

    let second = queue.submit(SynthesisRequest::new("ああ"), CancelToken::new());
    let third = queue.submit(SynthesisRequest::new("あああ"), CancelToken::new());
    assert_eq!(queue.clear(), 2);
    gate_tx.send(()).unwrap();

    assert!(running.wait().is_ok());
    assert!(second.wait().unwrap_err().is_cancelled());
    assert!(third.wait().unwrap_err().is_cancelled());
}

#[test]
fn queue_shutdown_disposes() {
    let (pipeline, _) = pipeline();
    let mut queue = SynthesisQueue::new(pipeline).unwrap();
    assert!(queue.warmup().is_ok());
    queue.shutdown();
    assert!(!queue.is_running());
    assert!(matches!(
        queue.synthesize(SynthesisRequest::new("あ")),
        Err(TtsError::Disposed)
    ));
    assert!(matches!(queue.warmup(), Err(TtsError::Disposed)));
}
