use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "subgen", author, version, about = "AI subtitle generation and translation")]
pub struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate translated subtitles from a video or audio file
    Run {
        /// Input video/audio file (or subtitle file with --proofread-only)
        input: PathBuf,

        /// Target language code
        #[arg(long = "to", value_name = "LANG")]
        target_lang: Option<String>,

        /// Source language code (default: auto-detect)
        #[arg(long = "from", value_name = "LANG")]
        source_lang: Option<String>,

        /// Regroup fragments into sentences before translating
        #[arg(short = 's', long)]
        sentence_aware: bool,

        /// Run a proofreading pass over the translation
        #[arg(short = 'p', long)]
        proofread: bool,

        /// Only proofread an existing subtitle file
        #[arg(long)]
        proofread_only: bool,

        /// Transcribe without translating
        #[arg(long)]
        no_translate: bool,

        /// Emit bilingual subtitles (source line first)
        #[arg(long)]
        bilingual: bool,

        /// Embed the subtitles into the video (soft mux)
        #[arg(long)]
        embed: bool,

        /// Ignore the transcription cache
        #[arg(long)]
        force_transcribe: bool,

        /// Save the project file alongside the subtitles
        #[arg(long, value_name = "PATH")]
        save_project: Option<PathBuf>,

        /// Load a previously saved project instead of transcribing
        #[arg(long, value_name = "PATH")]
        load_project: Option<PathBuf>,

        /// Style preset (default, netflix, fansub, minimal)
        #[arg(long, value_name = "NAME")]
        style_preset: Option<String>,

        #[arg(long, value_name = "FONT")]
        primary_font: Option<String>,

        #[arg(long, value_name = "COLOR")]
        primary_color: Option<String>,

        #[arg(long, value_name = "FONT")]
        secondary_font: Option<String>,

        #[arg(long, value_name = "COLOR")]
        secondary_color: Option<String>,

        /// Output subtitle path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Subtitle format (srt, vtt, ass)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,
    },

    /// Download and install a component (engine, model, or tool)
    Install {
        /// Component id, e.g. whisper-cpp-cpu or model-whisper-base
        component: String,
    },

    /// Remove an installed component
    Uninstall {
        /// Component id
        component: String,
    },

    /// List available and installed components
    Components,

    /// Update installed components to the registry version
    Update {
        /// Specific component id (default: everything outdated)
        component: Option<String>,
    },

    /// Check the health of the local installation
    Doctor,
}
