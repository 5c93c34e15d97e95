//! CLI tool that turns a PDF report into a JSON list of section descriptors

use clap::Parser;
use pdf_sections::{
    dedup_headings, extract_section_titles, structure_sections, HeadingConfig, OpenAiClient,
    StructuringConfig,
};
use std::error::Error;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

/// Extract section headings from a PDF and structure them with a language model
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the PDF file
    #[arg(long)]
    pdf: PathBuf,

    /// Print the candidate headings and skip the language model
    #[arg(long)]
    headings_only: bool,

    /// Drop repeated headings (e.g. running headers) before prompting
    #[arg(long)]
    dedup: bool,

    /// First-page headline zone, in points from the top edge
    #[arg(long, default_value_t = 200.0)]
    headline_zone: f32,

    /// API key for the chat completions endpoint
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat completions API root
    #[arg(long, env = "OPENAI_BASE_URL", default_value = pdf_sections::structuring::DEFAULT_BASE_URL)]
    base_url: String,

    /// Model name
    #[arg(long, env = "OPENAI_MODEL", default_value = pdf_sections::structuring::DEFAULT_MODEL)]
    model: String,

    /// Sampling temperature
    #[arg(long, default_value_t = 0.3)]
    temperature: f32,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 120)]
    timeout: u64,
}

fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

fn run(cli: Cli) -> Result<String, Box<dyn Error>> {
    let config = HeadingConfig {
        headline_zone_limit: cli.headline_zone,
        ..HeadingConfig::default()
    };

    let mut headings = extract_section_titles(&cli.pdf, &config)?;
    log::info!(
        "{}: {} candidate headings",
        cli.pdf.display(),
        headings.len()
    );
    if cli.dedup {
        headings = dedup_headings(headings);
    }

    if cli.headings_only {
        return Ok(serde_json::to_string(&headings)?);
    }

    let client = OpenAiClient::new(StructuringConfig {
        api_key: cli.api_key.unwrap_or_default(),
        base_url: cli.base_url,
        model: cli.model,
        temperature: cli.temperature,
        timeout: Duration::from_secs(cli.timeout),
    })?;

    let sections = structure_sections(&client, &headings)?;
    Ok(serde_json::to_string(&sections)?)
}
