//! Integration tests for the model registry.
//!
//! These tests run against a real library directory with a mock catalog and
//! check scanning, status, images, rename and delete end to end.

mod common;

use common::*;
use modelshelf_core::model_library::ModelKey;
use modelshelf_core::{Filename, ModelShelf, ModelType, Settings, ShelfError};
use std::path::Path;
use std::sync::Arc;

const CASTLE: &[u8] = b"castle checkpoint weights";
const VAE: &[u8] = b"castle vae weights";

fn castle_model(castle_hash: &str, vae_hash: &str, images: Vec<serde_json::Value>) -> serde_json::Value {
    model_json(
        42,
        "Castle",
        "Checkpoint",
        vec![version_json(
            100,
            42,
            vec![
                file_json(1, "castle.safetensors", "Model", castle_hash, true, "http://files.invalid/1"),
                file_json(2, "castle.vae.pt", "VAE", vae_hash, false, "http://files.invalid/2"),
            ],
            images,
        )],
    )
}

fn checkpoint(shelf: &ModelShelf, name: &str) -> Arc<modelshelf_core::ModelHandle> {
    shelf
        .registry()
        .get(ModelType::Checkpoint, &Filename::parse(name))
        .unwrap()
}

fn checkpoint_dir(root: &Path) -> std::path::PathBuf {
    root.join("models/Stable-diffusion")
}

const SDXL: &[u8] = b"sdxl base weights";

fn sdxl_model(images: Vec<serde_json::Value>) -> serde_json::Value {
    model_json(
        7,
        "SDXL",
        "Checkpoint",
        vec![version_json(
            700,
            7,
            vec![file_json(
                70,
                "sd_xl_base_1.0.safetensors",
                "Model",
                &sha256(SDXL),
                true,
                "http://files.invalid/70",
            )],
            images,
        )],
    )
}

fn dir_names(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect()
}

#[tokio::test]
async fn test_get_returns_shared_handle() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Lora, "style.safetensors", b"style");
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();

    let name = Filename::parse("style.safetensors");
    let first = registry.get(ModelType::Lora, &name).unwrap();
    let second = registry.get(ModelType::Lora, &name).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.cached_count(), 1);

    let missing = registry.get(ModelType::Lora, &Filename::parse("missing.safetensors"));
    assert!(matches!(missing, Err(ShelfError::ModelNotFound { .. })));
    assert!(registry.get(ModelType::Checkpoint, &name).is_err());
}

#[tokio::test]
async fn test_scan_unknown_model_asks_catalog_once() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Lora, "style.safetensors", b"style");
    let catalog = Arc::new(MockCatalog::default());
    let shelf = open_shelf(temp.path(), catalog.clone(), Settings::default());
    let registry = shelf.registry();
    let handle = registry.get(ModelType::Lora, &Filename::parse("style.safetensors")).unwrap();

    assert_eq!(registry.status(&handle).unwrap().to_string(), "Not Scanned");
    registry.scan(&handle, false).await.unwrap();
    assert_eq!(catalog.calls(), 1);
    assert_eq!(registry.status(&handle).unwrap().to_string(), "Scanned");
    assert_eq!(handle.content_hash(), Some(sha256(b"style")));
    assert!(!handle.in_catalog());

    registry.scan(&handle, false).await.unwrap();
    assert_eq!(catalog.calls(), 1);

    let key = ModelKey::parse("LORA/style.safetensors").unwrap();
    let record = registry.scan_store().get(&key).unwrap().unwrap();
    assert_eq!(record.remote_model_id, None);

    let report = std::fs::read_to_string(temp.path().join("models/Lora/style.md")).unwrap();
    assert!(report.contains("| Local file | style.safetensors |"));
}

#[tokio::test]
async fn test_scan_matches_local_snapshot_without_network() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), vec![]));
    let catalog = Arc::new(MockCatalog::default());
    let shelf = open_shelf(temp.path(), catalog.clone(), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "castle.safetensors");

    registry.scan(&handle, false).await.unwrap();
    assert_eq!(catalog.calls(), 0);
    assert_eq!(handle.remote_model_id(), Some(42));
    assert_eq!(registry.status(&handle).unwrap().to_string(), "Latest -V");

    let report = registry.build_report(&handle).unwrap();
    assert!(report.starts_with("# Castle"));
    assert!(report.contains("(installed) (current)"));
    assert!(report.contains("`NOT INSTALLED`"));
    assert!(report.contains("- castle style"));
}

#[tokio::test]
async fn test_scan_fetches_snapshot_from_catalog() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    let catalog = Arc::new(
        MockCatalog::default().with_model(castle_model(&sha256(CASTLE), &sha256(VAE), vec![])),
    );
    let shelf = open_shelf(temp.path(), catalog.clone(), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "castle.safetensors");

    registry.scan(&handle, false).await.unwrap();
    assert_eq!(catalog.calls(), 2);
    assert_eq!(handle.remote_model_id(), Some(42));
    assert!(temp.path().join("database/42.json").exists());

    registry.scan(&handle, false).await.unwrap();
    assert_eq!(catalog.calls(), 2);

    // An update refreshes the snapshot only; the id is already known
    registry.scan(&handle, true).await.unwrap();
    assert_eq!(catalog.calls(), 3);
}

#[tokio::test]
async fn test_outdated_model_offers_latest_and_companion() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    let newer_hash = sha256(b"castle v2");
    let mut model = castle_model(&sha256(CASTLE), &sha256(VAE), vec![]);
    let newer = version_json(
        101,
        42,
        vec![file_json(3, "castle_v2.safetensors", "Model", &newer_hash, true, "http://files.invalid/3")],
        vec![],
    );
    model["modelVersions"].as_array_mut().unwrap().insert(0, newer);
    store_snapshot(temp.path(), &model);

    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "castle.safetensors");
    registry.scan(&handle, false).await.unwrap();

    assert_eq!(registry.status(&handle).unwrap().to_string(), "Outdated -V");
    let latest = registry.latest_job(&handle).unwrap();
    assert_eq!(latest.url, "http://files.invalid/3");
    assert_eq!(latest.filename.as_str(), "castle_v2.safetensors");
    let companion = registry.companion_job(&handle).unwrap();
    assert_eq!(companion.model_type, ModelType::Vae);
    assert_eq!(companion.url, "http://files.invalid/2");
}

#[tokio::test]
async fn test_companion_link_and_delete_cascade() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    let vae_path = write_model(temp.path(), ModelType::Vae, "castle-vae.pt", VAE);
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), vec![]));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();

    let castle = checkpoint(&shelf, "castle.safetensors");
    let vae = registry.get(ModelType::Vae, &Filename::parse("castle-vae.pt")).unwrap();
    registry.scan(&castle, false).await.unwrap();
    registry.scan(&vae, false).await.unwrap();

    // The catalog files the VAE under the checkpoint, so it stays unlinked
    assert!(!vae.in_catalog());
    assert_eq!(registry.status(&vae).unwrap().to_string(), "Scanned I");
    assert_eq!(registry.status(&castle).unwrap().to_string(), "Latest +V");

    let link = checkpoint_dir(temp.path()).join("castle.vae.pt");
    assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    assert_eq!(registry.companion_links(&castle), vec![link.clone()]);

    registry.delete(&vae).unwrap();
    assert!(vae.is_deleted());
    assert!(!vae_path.exists());
    assert!(link.symlink_metadata().is_err());
    assert!(matches!(registry.status(&vae), Err(ShelfError::HandleDeleted { .. })));
    assert_eq!(registry.status(&castle).unwrap().to_string(), "Latest -V");

    let report = std::fs::read_to_string(checkpoint_dir(temp.path()).join("castle.md")).unwrap();
    assert!(report.contains("`NOT INSTALLED`"));
    let key = ModelKey::parse("VAE/castle-vae.pt").unwrap();
    assert!(registry.scan_store().get(&key).unwrap().is_none());
}

#[tokio::test]
async fn test_companion_links_follow_setting() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    write_model(temp.path(), ModelType::Vae, "castle-vae.pt", VAE);
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), vec![]));
    let settings = Settings {
        create_vae_symlinks: false,
        ..Settings::default()
    };
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), settings);
    let registry = shelf.registry();

    let castle = checkpoint(&shelf, "castle.safetensors");
    let vae = registry.get(ModelType::Vae, &Filename::parse("castle-vae.pt")).unwrap();
    registry.scan(&castle, false).await.unwrap();
    registry.scan(&vae, false).await.unwrap();
    assert!(registry.companion_links(&castle).is_empty());
    assert_eq!(registry.status(&castle).unwrap().to_string(), "Latest +V");

    // A stale link left from when links were enabled is removed
    let link = checkpoint_dir(temp.path()).join("castle.vae.pt");
    std::os::unix::fs::symlink(temp.path().join("models/VAE/castle-vae.pt"), &link).unwrap();
    assert!(registry.fix_companion_link(&castle).unwrap());
    assert!(link.symlink_metadata().is_err());
    assert!(!registry.fix_companion_link(&castle).unwrap());
}

#[tokio::test]
async fn test_rename_conflict_changes_nothing() {
    let temp = create_test_env();
    let castle_path = write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    let tower_path = write_model(temp.path(), ModelType::Checkpoint, "tower.safetensors", b"tower");
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let castle = checkpoint(&shelf, "castle.safetensors");

    for taken in ["tower", "TOWER"] {
        assert!(matches!(
            registry.rename(&castle, taken),
            Err(ShelfError::Conflict { .. })
        ));
    }
    for invalid in ["", "castle", "a/b"] {
        assert!(matches!(
            registry.rename(&castle, invalid),
            Err(ShelfError::Validation { .. })
        ));
    }

    assert_eq!(std::fs::read(&castle_path).unwrap(), CASTLE);
    assert_eq!(std::fs::read(&tower_path).unwrap(), b"tower");
    assert_eq!(castle.filename().as_str(), "castle.safetensors");
}

#[tokio::test]
async fn test_rename_moves_everything_attached() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), vec![]));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "castle.safetensors");
    registry.scan(&handle, false).await.unwrap();

    let source = temp.path().join("upload.png");
    write_png(&source);
    registry.add_custom_image(&handle, &source, false).unwrap();

    registry.rename(&handle, "fortress").unwrap();

    let dir = checkpoint_dir(temp.path());
    assert!(dir.join("fortress.safetensors").exists());
    assert!(!dir.join("castle.safetensors").exists());
    assert!(dir.join("fortress.md").exists());
    assert!(!dir.join("castle.md").exists());
    assert!(dir.join("fortress.preview.png").exists());
    assert!(dir.join("castle.preview.png").symlink_metadata().is_err());

    let images = temp.path().join("images");
    assert!(images.join("CHECKPOINT_fortress.1000.png").exists());
    assert!(!images.join("CHECKPOINT_castle.1000.png").exists());
    assert_eq!(registry.preview_index(&handle), Some(1000));

    assert_eq!(handle.key().to_string(), "CHECKPOINT/fortress.safetensors");
    assert_eq!(handle.remote_model_id(), Some(42));
    let renamed = checkpoint(&shelf, "fortress.safetensors");
    assert!(Arc::ptr_eq(&handle, &renamed));

    let old_key = ModelKey::parse("CHECKPOINT/castle.safetensors").unwrap();
    let new_key = ModelKey::parse("CHECKPOINT/fortress.safetensors").unwrap();
    assert!(registry.scan_store().get(&old_key).unwrap().is_none());
    assert_eq!(
        registry.scan_store().get(&new_key).unwrap().unwrap().remote_model_id,
        Some(42)
    );

    // Back to the catalog's file name
    registry.reset_name(&handle).unwrap();
    assert_eq!(handle.filename().as_str(), "castle.safetensors");
}

#[tokio::test]
async fn test_case_only_rename_is_allowed() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "Castle.safetensors", CASTLE);
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "Castle.safetensors");

    registry.rename(&handle, "castle").unwrap();

    let names = dir_names(&checkpoint_dir(temp.path()));
    assert!(names.contains(&"castle.safetensors".to_string()));
    assert!(!names.contains(&"Castle.safetensors".to_string()));
    assert_eq!(handle.filename().as_str(), "castle.safetensors");
}

#[tokio::test]
async fn test_reset_name_accepts_dotted_catalog_name() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "sd_xl_base_1.0.safetensors", SDXL);
    store_snapshot(temp.path(), &sdxl_model(vec![]));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "sd_xl_base_1.0.safetensors");
    registry.scan(&handle, false).await.unwrap();
    assert_eq!(handle.remote_model_id(), Some(7));

    registry.rename(&handle, "sdxl").unwrap();
    assert_eq!(handle.filename().as_str(), "sdxl.safetensors");

    // User names still may not end in an index
    assert!(matches!(
        registry.rename(&handle, "sdxl_2.0"),
        Err(ShelfError::Validation { .. })
    ));

    registry.reset_name(&handle).unwrap();
    assert_eq!(handle.filename().as_str(), "sd_xl_base_1.0.safetensors");
    assert!(checkpoint_dir(temp.path()).join("sd_xl_base_1.0.safetensors").exists());
    assert_eq!(handle.remote_model_id(), Some(7));
}

#[tokio::test]
async fn test_dotted_model_name_keeps_its_images() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "sd_xl_base_1.0.safetensors", SDXL);
    let images = vec![
        image_json("http://img.invalid/width=450/0.jpeg", "None"),
        image_json("http://img.invalid/width=450/1.jpeg", "None"),
    ];
    store_snapshot(temp.path(), &sdxl_model(images));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "sd_xl_base_1.0.safetensors");
    registry.scan(&handle, false).await.unwrap();

    let images_dir = temp.path().join("images");
    let expected = vec![
        images_dir.join("CHECKPOINT_sd_xl_base_1.0.0.png"),
        images_dir.join("CHECKPOINT_sd_xl_base_1.0.1.png"),
    ];
    assert_eq!(registry.image_files(&handle), expected);
    assert_eq!(registry.missing_images(&handle), expected);
    let job_names: Vec<String> = registry
        .image_jobs(&handle)
        .iter()
        .map(|job| job.filename.as_str().to_string())
        .collect();
    assert_eq!(
        job_names,
        vec!["CHECKPOINT_sd_xl_base_1.0.0.png", "CHECKPOINT_sd_xl_base_1.0.1.png"]
    );

    for path in &expected {
        write_png(path);
    }
    // An image of a model called `sd_xl_base_1`
    write_png(&images_dir.join("CHECKPOINT_sd_xl_base_1.0.png"));

    assert_eq!(registry.all_images(&handle), expected);
    assert!(registry.missing_images(&handle).is_empty());
    assert!(registry.select_preview(&handle, None).unwrap());
    assert_eq!(registry.preview_index(&handle), Some(0));

    let custom = temp.path().join("upload.png");
    write_png(&custom);
    let added = registry.add_custom_image(&handle, &custom, false).unwrap();
    assert_eq!(added, images_dir.join("CHECKPOINT_sd_xl_base_1.0.1000.png"));
    assert_eq!(registry.all_images(&handle).len(), 3);
}

#[tokio::test]
async fn test_custom_images_and_preview_selection() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Lora, "style.safetensors", b"style");
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = registry.get(ModelType::Lora, &Filename::parse("style.safetensors")).unwrap();

    let source = temp.path().join("upload.png");
    write_png(&source);

    let first = registry.add_custom_image(&handle, &source, false).unwrap();
    assert!(first.ends_with("LORA_style.1000.png"));
    assert_eq!(registry.preview_index(&handle), Some(1000));

    registry.add_custom_image(&handle, &source, false).unwrap();
    assert_eq!(registry.preview_index(&handle), Some(1000));

    registry.add_custom_image(&handle, &source, true).unwrap();
    assert_eq!(registry.preview_index(&handle), Some(1002));
    assert_eq!(registry.all_images(&handle).len(), 3);

    assert!(registry.remove_image(&handle, 1002).unwrap());
    assert_eq!(registry.preview_index(&handle), Some(1000));
    assert!(!registry.remove_image(&handle, 5).unwrap());
    assert_eq!(registry.all_images(&handle).len(), 2);

    let missing = temp.path().join("nope.png");
    assert!(matches!(
        registry.add_custom_image(&handle, &missing, false),
        Err(ShelfError::FileNotFound(_))
    ));
}

#[tokio::test]
async fn test_fix_preview_replaces_hidden_image() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    let images = vec![
        image_json("http://img.invalid/width=450/0.jpeg", "X"),
        image_json("http://img.invalid/width=450/1.jpeg", "None"),
    ];
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), images));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let registry = shelf.registry();
    let handle = checkpoint(&shelf, "castle.safetensors");
    registry.scan(&handle, false).await.unwrap();

    assert_eq!(registry.missing_images(&handle).len(), 2);
    assert_eq!(registry.image_jobs(&handle).len(), 2);

    let hidden = temp.path().join("images/CHECKPOINT_castle.0.png");
    write_png(&hidden);
    write_png(&temp.path().join("images/CHECKPOINT_castle.1.png"));
    assert!(registry.image_jobs(&handle).is_empty());
    assert_eq!(registry.visible_images(&handle).len(), 1);

    registry.set_preview(&handle, &hidden).unwrap();
    assert!(registry.has_hidden_preview(&handle));
    assert!(registry.fix_preview(&handle).unwrap());
    assert_eq!(registry.preview_index(&handle), Some(1));
    assert!(!registry.fix_preview(&handle).unwrap());
}

#[tokio::test]
async fn test_scan_all_counts_linked_models() {
    let temp = create_test_env();
    write_model(temp.path(), ModelType::Checkpoint, "castle.safetensors", CASTLE);
    write_model(temp.path(), ModelType::Lora, "style.safetensors", b"style");
    store_snapshot(temp.path(), &castle_model(&sha256(CASTLE), &sha256(VAE), vec![]));
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());

    let summary = shelf.registry().scan_all(false).await;
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(shelf.registry().refresh_reports().unwrap(), 2);
}

#[tokio::test]
async fn test_purge_on_start_drops_removed_models() {
    let temp = create_test_env();
    let path = write_model(temp.path(), ModelType::Lora, "style.safetensors", b"style");
    {
        let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
        let handle = shelf
            .registry()
            .get(ModelType::Lora, &Filename::parse("style.safetensors"))
            .unwrap();
        shelf.registry().scan(&handle, false).await.unwrap();
        shelf.shutdown().await;
    }
    std::fs::remove_file(&path).unwrap();

    let shelf = ModelShelf::builder(temp.path())
        .settings(Settings::default())
        .catalog(Arc::new(MockCatalog::default()))
        .purge_on_start(true)
        .build()
        .unwrap();
    let key = ModelKey::parse("LORA/style.safetensors").unwrap();
    assert!(shelf.registry().scan_store().get(&key).unwrap().is_none());
}

#[tokio::test]
async fn test_build_requires_existing_root() {
    let result = ModelShelf::builder("/nonexistent/path/that/does/not/exist")
        .catalog(Arc::new(MockCatalog::default()))
        .build();
    assert!(matches!(result, Err(ShelfError::Config { .. })));
}

#[tokio::test]
async fn test_saved_settings_apply_on_next_open() {
    let temp = create_test_env();
    let shelf = open_shelf(temp.path(), Arc::new(MockCatalog::default()), Settings::default());
    let settings = Settings {
        hide_nsfw_images: false,
        request_delay_secs: 0.0,
        ..Settings::default()
    };
    shelf.save_settings(&settings).unwrap();
    assert!(shelf.settings().hide_nsfw_images);

    let reopened = ModelShelf::builder(temp.path())
        .catalog(Arc::new(MockCatalog::default()))
        .build()
        .unwrap();
    assert_eq!(reopened.settings(), &settings);
}
