use anyhow::{bail, Context, Result};
use clap::Parser;
use silhouette::{
    BatchItem, BatchSummary, Color, EngineConfig, ModelSelection, SilhouetteEngine,
    SilhouetteOptions,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Images to convert, as `ID=LOCATOR` or a bare path/URL/data URI
    #[arg(required_unless_present = "check")]
    inputs: Vec<String>,

    /// Path to the selfie segmentation model (ONNX file)
    #[arg(long, default_value = "models/selfie_segmentation.onnx")]
    model: PathBuf,

    /// Directory for the generated PNG files
    #[arg(short, long, default_value = "silhouettes")]
    output_dir: PathBuf,

    /// Color painted behind the person
    #[arg(long, default_value = "black")]
    background: Color,

    /// Color painted over the person
    #[arg(long, default_value = "white")]
    silhouette: Color,

    /// Use the faster landscape model variant
    #[arg(long)]
    landscape: bool,

    /// Treat inputs as mirrored front-camera photos
    #[arg(long)]
    selfie_mode: bool,

    /// ONNX Runtime intra-op threads (0 = runtime default)
    #[arg(long, default_value_t = 4)]
    threads: usize,

    /// Bearer token for fetching http(s) images
    #[arg(long, env = "SILHOUETTE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Print `ID<TAB>data URI` lines instead of writing files
    #[arg(long)]
    data_uri: bool,

    /// Only report whether this environment can run the engine
    #[arg(long)]
    check: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins when set
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let selection = if args.landscape {
        ModelSelection::Landscape
    } else {
        ModelSelection::General
    };
    let config = EngineConfig::new(&args.model)
        .with_model_selection(selection)
        .with_selfie_mode(args.selfie_mode)
        .with_intra_threads(args.threads)
        .with_bearer_token(args.token.clone());

    let engine = SilhouetteEngine::new(config);

    if args.check {
        let supported = engine.is_supported();
        println!("{}", if supported { "supported" } else { "unsupported" });
        if !supported {
            std::process::exit(1);
        }
        return Ok(());
    }

    let items = parse_inputs(&args.inputs);
    let options = SilhouetteOptions {
        background_color: args.background,
        silhouette_color: args.silhouette,
    };

    tracing::info!("Model: {}", args.model.display());
    tracing::info!("Images: {}", items.len());

    let start = Instant::now();
    let mut report = |fraction: f32| tracing::info!("Progress: {:.0}%", fraction * 100.0);
    let outcomes = engine
        .batch_transform_with(&items, &options, Some(&mut report))
        .await
        .context("Failed to initialize segmentation")?;

    if !args.data_uri {
        std::fs::create_dir_all(&args.output_dir).with_context(|| {
            format!("Failed to create output directory {}", args.output_dir.display())
        })?;
    }

    for outcome in &outcomes {
        match (&outcome.silhouette, &outcome.error) {
            (Some(silhouette), _) if args.data_uri => {
                println!("{}\t{}", outcome.id, silhouette.to_data_uri());
            }
            (Some(silhouette), _) => {
                let path = args.output_dir.join(format!("{}.png", outcome.id));
                silhouette.save_png(&path)?;
                tracing::info!("{} -> {}", outcome.id, path.display());
            }
            (None, error) => {
                tracing::error!(
                    "{}: {}",
                    outcome.id,
                    error.as_deref().unwrap_or("unknown error")
                );
            }
        }
    }

    let summary = BatchSummary::of(&outcomes);
    tracing::info!(
        "Done in {:.1}s: {} succeeded, {} failed",
        start.elapsed().as_secs_f64(),
        summary.succeeded,
        summary.failed
    );

    if summary.failed > 0 {
        bail!("{} of {} images failed", summary.failed, outcomes.len());
    }

    Ok(())
}

/// Build batch items; repeated ids get a `-2`, `-3`, ... suffix so outputs never collide
fn parse_inputs(inputs: &[String]) -> Vec<BatchItem> {
    let mut taken = HashSet::new();
    inputs
        .iter()
        .enumerate()
        .map(|(index, input)| {
            let (id, locator) = match split_id(input) {
                Some((id, locator)) => (id.to_string(), locator),
                None => (default_id(input, index), input.as_str()),
            };
            BatchItem::new(unique_id(id, &mut taken), locator)
        })
        .collect()
}

fn unique_id(id: String, taken: &mut HashSet<String>) -> String {
    if taken.insert(id.clone()) {
        return id;
    }
    let mut n = 2;
    loop {
        let candidate = format!("{id}-{n}");
        if taken.insert(candidate.clone()) {
            tracing::warn!("Duplicate id {:?} renamed to {:?}", id, candidate);
            return candidate;
        }
        n += 1;
    }
}

/// `alice=photos/a.jpg` -> (`alice`, `photos/a.jpg`). URLs with query strings are left alone.
fn split_id(input: &str) -> Option<(&str, &str)> {
    let (id, locator) = input.split_once('=')?;
    let valid_id = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    (valid_id && !locator.is_empty()).then_some((id, locator))
}

fn default_id(locator: &str, index: usize) -> String {
    let trimmed = locator.trim();
    if trimmed.to_ascii_lowercase().starts_with("data:") {
        return format!("image-{}", index + 1);
    }
    let without_query = trimmed.split(['?', '#']).next().unwrap_or_default();
    match Path::new(without_query).file_stem().and_then(|s| s.to_str()) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => format!("image-{}", index + 1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_split_from_locators() {
        assert_eq!(split_id("ada=photos/ada.jpg"), Some(("ada", "photos/ada.jpg")));
        assert_eq!(split_id("https://x.test/p?size=2"), None);
        assert_eq!(split_id("=a.png"), None);
    }

    #[test]
    fn bare_locators_use_file_stem() {
        let items = parse_inputs(&[
            "photos/Grace.JPG".to_string(),
            "https://x.test/people/bob.png?v=1".to_string(),
            "data:image/png;base64,AAAA".to_string(),
        ]);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["Grace", "bob", "image-3"]);
    }

    #[test]
    fn same_stem_in_different_folders_gets_distinct_ids() {
        let items = parse_inputs(&[
            "a/x.png".to_string(),
            "b/x.png".to_string(),
            "x-2=c/y.png".to_string(),
            "c/x.jpg".to_string(),
        ]);
        let ids: Vec<_> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, ["x", "x-2", "x-2-2", "x-3"]);
        assert_eq!(items[1].locator, "b/x.png");
    }
}
