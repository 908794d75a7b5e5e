use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ToneMappingArg {
    None,
    AcesHill,
    KhrNeutral,
}

impl From<ToneMappingArg> for crate::view_state::ToneMapping {
    fn from(arg: ToneMappingArg) -> Self {
        match arg {
            ToneMappingArg::None => Self::None,
            ToneMappingArg::AcesHill => Self::AcesHill,
            ToneMappingArg::KhrNeutral => Self::KhrNeutral,
        }
    }
}

#[derive(Parser)]
#[command(name = "kitsune-gltfview")]
#[command(about = "Kitsune glTF 2.0 scene viewer runtime")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load an asset and report its document structure.
    Inspect {
        asset: PathBuf,
        #[arg(long)]
        full: bool,
        /// Skip decoding images for their pixel dimensions.
        #[arg(long)]
        no_decode: bool,
    },
    /// List animations with durations, targets and compatibility.
    Animations {
        asset: PathBuf,
    },
    /// Evaluate one or more frames headlessly and report the draw plan.
    Frame {
        asset: PathBuf,
        #[arg(long, default_value_t = 0.0)]
        time: f32,
        #[arg(long, default_value_t = 1)]
        frames: usize,
        #[arg(long, default_value_t = 1.0 / 60.0)]
        frame_step: f32,
        #[arg(long)]
        camera_node: Option<usize>,
        /// Material variant to activate, by name.
        #[arg(long)]
        variant: Option<String>,
        #[arg(long = "animation")]
        animations: Vec<usize>,
        #[arg(long)]
        no_fallback_lights: bool,
        #[arg(long)]
        no_skinning: bool,
        #[arg(long, value_enum, default_value_t = ToneMappingArg::AcesHill)]
        tone_mapping: ToneMappingArg,
        /// Include the full backend call log in the report.
        #[arg(long)]
        calls: bool,
    },
    /// Merge a composition document and report the merged result.
    Compose {
        composition: PathBuf,
        #[arg(long)]
        full: bool,
    },
}
