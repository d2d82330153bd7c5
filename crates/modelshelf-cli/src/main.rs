//! Model Shelf CLI - terminal driver for the modelshelf-core library.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use modelshelf_core::{ModelShelf, ModelType, Settings};
use std::path::PathBuf;
use tracing::{debug, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "modelshelf")]
#[command(about = "Manage catalog-linked local model files")]
struct Args {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Web UI root directory holding models/, embeddings/ and the shelf data
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Catalog API base URL
    #[arg(long, global = true)]
    catalog_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List installed models with their status
    List {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Resolve models against the catalog
    Scan {
        /// Model key, e.g. LORA/style.safetensors (all models when omitted)
        key: Option<String>,
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
        /// Refresh catalog data even for models already scanned
        #[arg(short, long)]
        update: bool,
    },
    /// Print a model's report
    Show { key: String },
    /// Rename a model and everything kept next to it
    Rename { key: String, new_name: String },
    /// Rename a model back to its catalog file name
    ResetName { key: String },
    /// Delete a model and everything kept next to it
    Delete { key: String },
    /// Select the preview image (first visible image when no index is given)
    Preview { key: String, index: Option<u32> },
    /// Add a custom image
    AddImage {
        key: String,
        path: PathBuf,
        /// Make the new image the preview
        #[arg(long)]
        preview: bool,
    },
    /// Delete an image by index
    RemoveImage { key: String, index: u32 },
    /// Rebuild every report
    Reports,
    /// Replace hidden previews and select missing ones
    FixPreviews {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Create or remove companion links to match the settings
    FixLinks {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Drop scan records of models that are no longer installed
    Purge,
    /// Download a catalog model version
    Download {
        /// Catalog model id or page URL
        model: String,
        /// Version id (latest when omitted)
        #[arg(long)]
        version: Option<u64>,
    },
    /// Download the latest version of outdated models
    Update {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Download missing companion VAEs
    FetchVae {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
    /// Download missing catalog images
    FetchImages {
        #[arg(short = 't', long = "type")]
        model_type: Option<ModelType>,
    },
}

fn default_root() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join("stable-diffusion-webui"))
        .unwrap_or_else(|| PathBuf::from("."))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let root = args.root.clone().unwrap_or_else(default_root);

    let settings = Settings::load(&modelshelf_core::LibraryLayout::new(&root).settings_file())
        .unwrap_or_default();

    // Set up logging
    let log_level = if args.debug || settings.debug_mode {
        Level::DEBUG
    } else {
        Level::INFO
    };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    debug!("Library root: {}", root.display());

    let mut builder = ModelShelf::builder(&root)
        .settings(settings)
        .auto_create_dirs(true)
        .purge_on_start(true);
    if let Some(url) = args.catalog_url {
        builder = builder.catalog_base_url(url);
    }
    let shelf = builder.build()?;

    let result = commands::run(&shelf, args.command).await;
    shelf.shutdown().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_with_type() {
        let args = Args::try_parse_from(["modelshelf", "scan", "--type", "lora", "--update"]).unwrap();
        match args.command {
            Command::Scan {
                key,
                model_type,
                update,
            } => {
                assert!(key.is_none());
                assert_eq!(model_type, Some(ModelType::Lora));
                assert!(update);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::try_parse_from([
            "modelshelf",
            "rename",
            "LORA/style.safetensors",
            "style_v2",
            "--root",
            "/tmp/webui",
            "--debug",
        ])
        .unwrap();
        assert!(args.debug);
        assert_eq!(args.root, Some(PathBuf::from("/tmp/webui")));
        assert!(matches!(args.command, Command::Rename { .. }));
    }

    #[test]
    fn test_parse_rejects_unknown_type() {
        assert!(Args::try_parse_from(["modelshelf", "list", "--type", "unet"]).is_err());
    }
}
