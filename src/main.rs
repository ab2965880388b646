//! CLI for inspecting the Japanese SBV2 front end.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ndarray::Array1;
use ndarray_npy::ReadNpyExt;
use std::fs::File;
use std::path::PathBuf;

use sbv2_jp::normalizer::normalize;
use sbv2_jp::phonemizer::validate_dictionary;
use sbv2_jp::trace::save_frontend_tensors;
use sbv2_jp::{
    post_process, prepare_frontend, G2pEngine, OpenJTalk, PipelineConfig, StyleVectorStore, SymbolTable,
    SynthesisResult, Tokenizer,
};

#[derive(Parser, Debug)]
#[command(name = "sbv2-jp")]
#[command(about = "Japanese Style-Bert-VITS2 front-end tools")]
struct Cli {
    /// Log at DEBUG unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the normalized form of a text
    Normalize { text: String },

    /// Run G2P and tokenization, printing model-ready ids
    Frontend {
        /// Japanese text to process
        #[arg(short, long)]
        text: String,

        /// Pipeline config JSON; explicit flags override its paths
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// OpenJTalk dictionary directory
        #[arg(long)]
        dict: Option<PathBuf>,

        /// Path to the OpenJTalk wrapper library
        #[arg(long)]
        library: Option<PathBuf>,

        /// Path to the BERT vocab JSON
        #[arg(long)]
        vocab: Option<PathBuf>,

        /// Model config.json carrying the symbol list
        #[arg(long)]
        symbols_config: Option<PathBuf>,

        /// Style vector .npy; adds the resolved style to saved tensors
        #[arg(long)]
        styles: Option<PathBuf>,

        #[arg(long, default_value = "0")]
        style: usize,

        #[arg(long, default_value = "1.0")]
        style_weight: f32,

        /// Print the full front end as JSON
        #[arg(long)]
        json: bool,

        /// Save front-end tensors to this directory
        #[arg(long)]
        save_tensors: Option<PathBuf>,
    },

    /// Post-process a raw waveform and write it as WAV
    Postprocess {
        /// Raw mono waveform as a 1-D f32 .npy
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        /// Pipeline config JSON supplying the audio settings
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Inspect a style vector file
    Style {
        /// Path to style_vectors.npy
        file: PathBuf,

        #[arg(long)]
        id: Option<usize>,

        #[arg(long, default_value = "1.0")]
        weight: f32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .init();

    match cli.command {
        Command::Normalize { text } => {
            println!("{}", normalize(&text));
            Ok(())
        }
        Command::Frontend {
            text,
            config,
            dict,
            library,
            vocab,
            symbols_config,
            styles,
            style,
            style_weight,
            json,
            save_tensors,
        } => {
            let mut config = match config {
                Some(path) => PipelineConfig::load(&path).context("Failed to load config")?,
                None => PipelineConfig::default(),
            };
            config.dictionary_path = dict.or(config.dictionary_path);
            config.phonemizer_library = library.or(config.phonemizer_library);
            config.vocab_path = vocab.or(config.vocab_path);
            config.symbols_config_path = symbols_config.or(config.symbols_config_path);
            config.style_vector_path = styles.or(config.style_vector_path);

            let dict = config
                .dictionary_path
                .clone()
                .context("--dict or dictionary_path is required")?;
            let vocab = config
                .vocab_path
                .clone()
                .context("--vocab or vocab_path is required")?;

            validate_dictionary(&dict).context("Invalid OpenJTalk dictionary")?;
            let phonemizer = match &config.phonemizer_library {
                Some(library) => OpenJTalk::open_with_library(library, &dict),
                None => OpenJTalk::open(&dict),
            }
            .context("Failed to load OpenJTalk")?;
            let symbols = match &config.symbols_config_path {
                Some(path) => SymbolTable::from_config_json(path).context("Failed to load symbols")?,
                None => SymbolTable::default(),
            };
            let tokenizer = Tokenizer::load(&vocab).context("Failed to load vocabulary")?;

            let mut g2p = G2pEngine::new(Box::new(phonemizer), symbols);
            let frontend = prepare_frontend(&mut g2p, &tokenizer, &text).context("Front end failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&frontend)?);
            } else {
                println!("Normalized: {}", frontend.g2p.normalized_text);
                println!("Phoneme IDs: {:?} (len={})", frontend.g2p.sequence.phoneme_ids, frontend.g2p.sequence.len());
                println!("Tones: {:?}", frontend.g2p.sequence.tones);
                println!("word2ph: {:?}", frontend.g2p.word2ph);
                println!("Token IDs: {:?} (len={})", frontend.encoding.input_ids, frontend.encoding.len());
            }

            if let Some(ref tensor_dir) = save_tensors {
                let style_vector = match &config.style_vector_path {
                    Some(path) => {
                        let store = StyleVectorStore::from_file(path).context("Failed to load style vectors")?;
                        Some(store.get_vector(style, style_weight)?)
                    }
                    None => None,
                };
                let written = save_frontend_tensors(tensor_dir, &frontend, style_vector.as_ref())
                    .context("Failed to save tensors")?;
                for path in written {
                    println!("Saved {:?}", path);
                }
            }
            Ok(())
        }
        Command::Postprocess {
            input,
            output,
            config,
        } => {
            let config = match config {
                Some(path) => PipelineConfig::load(&path).context("Failed to load config")?,
                None => PipelineConfig::default(),
            };
            let file = File::open(&input).context(format!("Failed to open {:?}", input))?;
            let raw = Array1::<f32>::read_npy(file).context("Failed to read waveform .npy")?;
            let result = SynthesisResult {
                audio: post_process(raw.to_vec(), &config.audio),
                sample_rate: config.audio.sample_rate,
            };
            result.save_wav(&output).context("Failed to write WAV")?;
            println!(
                "Wrote {:?}: {} of {} samples kept ({:.2}s)",
                output,
                result.audio.len(),
                raw.len(),
                result.duration_secs()
            );
            Ok(())
        }
        Command::Style { file, id, weight } => {
            let store = StyleVectorStore::from_file(&file).context("Failed to load style vectors")?;
            println!("{:?}: {} styles", file, store.num_styles());
            let ids: Vec<usize> = match id {
                Some(id) => vec![id],
                None => (0..store.num_styles()).collect(),
            };
            for id in ids {
                let vector = store.get_vector(id, weight)?;
                let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                let head: Vec<f32> = vector.iter().take(4).copied().collect();
                println!("  style {:>3}: weight={:.2} |v|={:.4} head={:?}", id, weight, norm, head);
            }
            Ok(())
        }
    }
}
