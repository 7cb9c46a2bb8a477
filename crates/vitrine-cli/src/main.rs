use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use clap::{Parser, Subcommand};
use vitrine_contracts::costs::load_pricing;
use vitrine_contracts::events::EventWriter;
use vitrine_contracts::session::{
    AspectRatio, FlowMode, Resolution, SettingsPatch, SourceImage, WizardSession, WizardStep,
};
use vitrine_engine::{GeminiClient, Orchestrator, Progress, RunReport};

#[derive(Debug, Parser)]
#[command(name = "vitrine", version, about = "Product photo to marketing images wizard")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the full wizard and export the generated images.
    Generate(GenerateArgs),
    /// List the concept catalog for the individual flow.
    Concepts,
    /// Refine a custom prompt through the text model.
    Optimize(OptimizeArgs),
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Product photo to upload.
    #[arg(long)]
    image: PathBuf,
    /// Generation flow: grid, individual, macro-set, or custom.
    #[arg(long)]
    flow: String,
    /// Concept ids for the individual flow, e.g. 1,3,7.
    #[arg(long)]
    concepts: Option<String>,
    /// Prompt text for the custom flow.
    #[arg(long)]
    prompt: Option<String>,
    /// Refine the custom prompt before generating.
    #[arg(long)]
    optimize: bool,
    #[arg(long, default_value = "auto")]
    aspect_ratio: String,
    #[arg(long, default_value = "1k")]
    resolution: String,
    #[arg(long, default_value_t = 1)]
    variations: u32,
    /// Directory the images and event log are written to.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct OptimizeArgs {
    #[arg(long)]
    prompt: String,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("vitrine error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Concepts => run_concepts(),
        Command::Optimize(args) => run_optimize(args),
    }
}

fn run_generate(args: GenerateArgs) -> Result<()> {
    let flow = parse_flow(&args.flow)?;
    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = args
        .out
        .file_name()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("session")
        .to_string();

    let mut session = WizardSession::new();
    session.update_settings(SettingsPatch {
        aspect_ratio: Some(parse_aspect_ratio(&args.aspect_ratio)?),
        resolution: Some(parse_resolution(&args.resolution)?),
        variations: Some(args.variations),
    });

    let bytes = fs::read(&args.image)
        .with_context(|| format!("failed to read {}", args.image.display()))?;
    let mime_type = mime_for_path(&args.image)
        .with_context(|| format!("unsupported image type: {}", args.image.display()))?;
    session.set_image(
        SourceImage {
            data: BASE64.encode(&bytes),
            mime_type: mime_type.to_string(),
        },
        Some(args.image.display().to_string()),
    );
    session.advance();

    session.set_mode(flow);
    let orchestrator = Orchestrator::new(Box::new(GeminiClient::new()), load_pricing())
        .with_events(EventWriter::new(&events_path, session_id));

    match flow {
        FlowMode::Individual => {
            let raw = args
                .concepts
                .as_deref()
                .context("--concepts is required for the individual flow")?;
            for concept_id in parse_concept_list(raw)? {
                if orchestrator.registry().get(concept_id).is_none() {
                    bail!("unknown concept id {concept_id}; run `vitrine concepts`");
                }
                session.toggle_concept(concept_id);
            }
        }
        FlowMode::Custom => {
            let prompt = args
                .prompt
                .as_deref()
                .context("--prompt is required for the custom flow")?;
            session.set_custom_prompt(prompt);
            if args.optimize {
                match orchestrator.optimize_custom_prompt(&mut session) {
                    Ok(optimized) => {
                        eprintln!("optimized prompt: {optimized}");
                        session.apply_optimized_prompt();
                    }
                    // Refinement is optional; fall back to the raw draft.
                    Err(err) => eprintln!("prompt optimization skipped: {err:#}"),
                }
            }
        }
        FlowMode::Grid | FlowMode::MacroSet => {}
    }

    session.advance();
    if flow == FlowMode::Individual || flow == FlowMode::Custom {
        session.advance();
    }
    if session.current_step() != WizardStep::Results {
        bail!("wizard could not reach the results step; check the flow inputs");
    }

    let report = session_run(&orchestrator, &mut session)?;

    for (index, image) in session.results().iter().enumerate() {
        let bytes = BASE64
            .decode(image.image_data.as_bytes())
            .context("generated image is not valid base64")?;
        let stem = image
            .concept_name
            .as_deref()
            .map(slugify)
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "image".to_string());
        let path = args.out.join(format!(
            "{:02}-{}.{}",
            index + 1,
            stem,
            sniff_extension(&bytes)
        ));
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        println!("{}", path.display());
    }

    let costs = session.session_costs();
    eprintln!(
        "{} of {} images generated | tokens in {} out {} | estimated ${:.4}",
        report.succeeded,
        report.attempted,
        costs.total_input_tokens,
        costs.total_output_tokens,
        costs.estimated_cost_usd
    );
    if let Some(warning) = session.run_error() {
        eprintln!("some images failed to generate: {warning}");
    }
    Ok(())
}

fn session_run(orchestrator: &Orchestrator, session: &mut WizardSession) -> Result<RunReport> {
    let report = orchestrator.run(session, |progress: &Progress| {
        eprintln!(
            "[{}/{}] {}",
            progress.completed, progress.total, progress.label
        );
    });
    if !report.accepted {
        bail!("a generation run is already in flight for this session");
    }
    if report.is_total_failure() {
        bail!(
            "no images were generated: {}",
            report
                .last_error
                .clone()
                .unwrap_or_else(|| "unknown failure".to_string())
        );
    }
    Ok(report)
}

fn run_concepts() -> Result<()> {
    let orchestrator = Orchestrator::new(Box::new(GeminiClient::new()), load_pricing());
    for concept in orchestrator.registry().iter() {
        println!(
            "{} {} {} - {}",
            concept.id, concept.icon, concept.name, concept.description
        );
    }
    Ok(())
}

fn run_optimize(args: OptimizeArgs) -> Result<()> {
    let mut session = WizardSession::new();
    session.set_mode(FlowMode::Custom);
    session.set_custom_prompt(&args.prompt);
    let orchestrator = Orchestrator::new(Box::new(GeminiClient::new()), load_pricing());
    let optimized = orchestrator.optimize_custom_prompt(&mut session)?;
    println!("{optimized}");
    Ok(())
}

fn parse_flow(raw: &str) -> Result<FlowMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "grid" => Ok(FlowMode::Grid),
        "individual" => Ok(FlowMode::Individual),
        "macro-set" | "macroset" | "macro_set" => Ok(FlowMode::MacroSet),
        "custom" => Ok(FlowMode::Custom),
        other => bail!("unknown flow '{other}' (expected grid, individual, macro-set, or custom)"),
    }
}

fn parse_aspect_ratio(raw: &str) -> Result<AspectRatio> {
    match raw.trim() {
        "auto" => Ok(AspectRatio::Auto),
        "1:1" => Ok(AspectRatio::Square),
        "3:4" => Ok(AspectRatio::Portrait),
        "4:3" => Ok(AspectRatio::Landscape),
        "16:9" => Ok(AspectRatio::Wide),
        "9:16" => Ok(AspectRatio::Tall),
        other => bail!("unknown aspect ratio '{other}'"),
    }
}

fn parse_resolution(raw: &str) -> Result<Resolution> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1k" => Ok(Resolution::OneK),
        "2k" => Ok(Resolution::TwoK),
        "4k" => Ok(Resolution::FourK),
        other => bail!("unknown resolution '{other}' (expected 1k, 2k, or 4k)"),
    }
}

fn parse_concept_list(raw: &str) -> Result<Vec<u32>> {
    let mut ids = Vec::new();
    for part in raw.split(',') {
        let trimmed = part.trim();
        if trimmed.is_empty() {
            continue;
        }
        let id: u32 = trimmed
            .parse()
            .with_context(|| format!("invalid concept id '{trimmed}'"))?;
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    if ids.is_empty() {
        bail!("no concept ids given");
    }
    Ok(ids)
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn sniff_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "png"
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "jpg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "webp"
    } else {
        "png"
    }
}

fn slugify(value: &str) -> String {
    let mut slug = String::new();
    let mut last_dash = true;
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_flow_accepts_the_four_flows() -> Result<()> {
        assert_eq!(parse_flow("grid")?, FlowMode::Grid);
        assert_eq!(parse_flow("Individual")?, FlowMode::Individual);
        assert_eq!(parse_flow("macro-set")?, FlowMode::MacroSet);
        assert_eq!(parse_flow("macroSet")?, FlowMode::MacroSet);
        assert_eq!(parse_flow("custom")?, FlowMode::Custom);
        assert!(parse_flow("collage").is_err());
        Ok(())
    }

    #[test]
    fn parse_concept_list_dedupes_and_validates() -> Result<()> {
        assert_eq!(parse_concept_list("1, 3,7,3")?, vec![1, 3, 7]);
        assert!(parse_concept_list("1,x").is_err());
        assert!(parse_concept_list(" , ").is_err());
        Ok(())
    }

    #[test]
    fn sniff_extension_reads_magic_bytes() {
        assert_eq!(sniff_extension(&[0x89, b'P', b'N', b'G', 0x0D]), "png");
        assert_eq!(sniff_extension(&[0xFF, 0xD8, 0xFF, 0xE0]), "jpg");
        let webp = b"RIFF\x00\x00\x00\x00WEBPVP8 ";
        assert_eq!(sniff_extension(webp), "webp");
        assert_eq!(sniff_extension(b"plain"), "png");
    }

    #[test]
    fn mime_for_path_maps_known_extensions() {
        assert_eq!(mime_for_path(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(mime_for_path(Path::new("b.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_for_path(Path::new("c.tiff")), None);
    }

    #[test]
    fn slugify_flattens_labels() {
        assert_eq!(slugify("Logo & Branding"), "logo-branding");
        assert_eq!(slugify("Macro Detail"), "macro-detail");
        assert_eq!(slugify("!!!"), "");
    }
}
