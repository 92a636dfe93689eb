//! CLI `doctor` command: check model files and the saved index.

use anyhow::Result;

use convo_rag::config::{default_config_path, RagConfig};
use convo_rag::index::{metadata_path, IndexOptions, VectorIndex};
use convo_rag::paths::{DataDirResolver, PathResolver};

/// Print a health report for the configuration, model cache and index files.
pub async fn doctor(config: &RagConfig) -> Result<()> {
    let config_path = default_config_path();
    let cache_dir = config.embedding.resolved_cache_dir();
    let model_path = cache_dir.join("model.onnx");
    let tokenizer_path = cache_dir.join("tokenizer.json");
    let index_path = DataDirResolver::new(config.data_dir()).resolve(&config.storage.index_file);
    let sidecar_path = metadata_path(&index_path);

    println!("convo-rag Health Report");
    println!("=======================");
    println!();
    println!("Config file:       {} ({})", config_path.display(), present(config_path.exists()));
    println!("Log level:         {}", config.logging.log_level);
    println!();
    println!("Embedding model:   {}", config.embedding.model);
    println!("  model.onnx:      {}", file_status(&model_path));
    println!("  tokenizer.json:  {}", file_status(&tokenizer_path));
    if !model_path.exists() || !tokenizer_path.exists() {
        println!("  Run `convo-rag model download` to fetch the model.");
    }
    println!();
    println!("Index file:        {}", file_status(&index_path));
    println!("Metadata sidecar:  {}", file_status(&sidecar_path));

    // A scratch load only touches the files when they turn out to be corrupt.
    let had_snapshot = index_path.exists() || sidecar_path.exists();
    let index = VectorIndex::new(IndexOptions::from(&config.index));
    match index.load(&index_path).await {
        Ok(true) => {
            let stats = index.stats();
            println!("Load check:        PASSED");
            println!("  Chunks:          {}", stats.num_elements);
            println!("  Dimensions:      {}", stats.num_dimensions);
            println!("  Capacity:        {} ({:.1}% used)", stats.max_elements, stats.utilization_percent);
            println!("  Sessions:        {}", index.session_counts().len());
            if stats.num_dimensions != config.index.dimensions {
                println!(
                    "  WARNING: index has {} dimensions but config expects {}. Run `convo-rag reset`.",
                    stats.num_dimensions, config.index.dimensions
                );
            }
        }
        Ok(false) if had_snapshot => {
            println!("Load check:        FAILED (snapshot was corrupt and has been removed)");
        }
        Ok(false) => println!("Load check:        no saved index yet"),
        Err(e) => println!("Load check:        FAILED ({e})"),
    }

    Ok(())
}

fn present(exists: bool) -> &'static str {
    if exists {
        "found"
    } else {
        "not found, using defaults"
    }
}

fn file_status(path: &std::path::Path) -> String {
    match std::fs::metadata(path) {
        Ok(m) => format!("{} ({})", path.display(), format_bytes(m.len())),
        Err(_) => format!("{} (missing)", path.display()),
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
