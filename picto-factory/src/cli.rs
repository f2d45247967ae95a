//! CLI argument parsing for the pictogram pipeline

use clap::Parser;
use picto_factory_sdk::StepKind;

/// Batch pipeline turning natural-language utterances into accessible
/// SVG pictograms: utterance → NLU → visual blueprint → SVG.
#[derive(Parser, Debug, Clone)]
#[command(name = "picto-factory", version)]
pub struct Args {
    /// Dataset to import before processing (CSV, TSV or JSON)
    #[arg(short, long)]
    pub input: Option<String>,

    /// Export the store after processing (.json / .tsv / anything else = CSV)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Steps to run: "all" for the full cascade, or a comma-separated
    /// subset of nlu,visual,svg run step-by-step over the store
    #[arg(long, default_value = "all")]
    pub steps: String,

    /// Skip processing even when steps are selected
    #[arg(long)]
    pub no_process: bool,

    /// Number of rows processed in parallel (1 = sequential)
    #[arg(long, default_value = "1")]
    pub batch_size: usize,

    /// Per-row timeout in seconds (0 disables the guard)
    #[arg(long, default_value = "90")]
    pub timeout_secs: u64,

    /// Rerun rows that are already completed
    #[arg(long)]
    pub force: bool,

    /// Target language for the visual blueprint step
    #[arg(long)]
    pub lang: Option<String>,

    /// Pictogram canvas size in user units
    #[arg(long)]
    pub canvas: Option<u32>,

    /// Generation model identifier
    #[arg(long)]
    pub model: Option<String>,

    /// Attribution metadata stored with the dataset
    #[arg(long)]
    pub attribution: Option<String>,

    /// Database path (defaults to the per-user data directory)
    #[arg(long)]
    pub db: Option<String>,

    /// Find a row by text; a miss creates a row seeded with the query
    #[arg(long)]
    pub find: Option<String>,

    /// Print the store and exit
    #[arg(long)]
    pub list: bool,
}

impl Args {
    /// Parse the steps selector. `None` means the full cascade; a list
    /// means those single steps, run in the given order over the store.
    pub fn parse_steps(&self) -> Result<Option<Vec<StepKind>>, String> {
        let trimmed = self.steps.trim();
        if trimmed.is_empty() {
            return Ok(Some(Vec::new()));
        }
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(None);
        }
        trimmed
            .split(',')
            .map(|step| step.parse())
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}
