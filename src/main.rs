use anyhow::{Context, Result};
use clap::Parser;
use class_cache::cache::content_hash;
use class_cache::cli::{Cli, Commands, OutputFormat};
use class_cache::config::resolve_loader_config;
use class_cache::loader::{Lookup, ResourceLoader};
use class_cache::scan::default_delimiter;
use rayon::prelude::*;
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CLASS_CACHE_LOG";

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = resolve_loader_config(&cli)?;
    let loader = ResourceLoader::from_config(&config).context("Failed to set up resource loader")?;
    register_sources(&loader, &cli)?;

    let outcome = match cli.command.clone() {
        Commands::Resolve {
            ids,
            format,
            output,
        } => {
            let result = resolve_all(&loader, &ids);
            write_resolve_output(&result, format, output.as_deref())?;
            let missing = result.resources.iter().filter(|r| !r.found).count();
            if missing > 0 {
                Err(anyhow::anyhow!("{missing} of {} resource(s) not resolved", ids.len()))
            } else {
                Ok(())
            }
        }
        Commands::Index => {
            let listing = index_listing(&loader);
            println!("{}", serde_json::to_string_pretty(&listing)?);
            Ok(())
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&loader.cache().stats())?);
            Ok(())
        }
    };

    loader.close();
    outcome
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn register_sources(loader: &ResourceLoader, cli: &Cli) -> Result<()> {
    for jar in cli.jars.iter() {
        loader
            .add_jar(jar)
            .with_context(|| format!("Failed to register jar: {}", jar.display()))?;
    }
    for dir in cli.dirs.iter() {
        loader
            .add_dir(dir)
            .with_context(|| format!("Failed to register directory: {}", dir.display()))?;
    }
    if let Some(list) = cli.dir_list.as_deref() {
        let delimiter = cli.delimiter.as_deref().unwrap_or(default_delimiter());
        loader
            .add_dirs(list, delimiter)
            .with_context(|| format!("Failed to register directories: {list}"))?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct ResolvedResource {
    id: String,
    found: bool,
    cache_hit: bool,
    resolver: Option<String>,
    size: Option<usize>,
    content_hash: Option<String>,
    error: Option<String>,
    #[serde(skip)]
    bytes: Option<class_cache::cache::Blob>,
}

#[derive(Debug, Serialize)]
struct ResolveResult {
    resolvers: Vec<String>,
    duration_ms: u64,
    resources: Vec<ResolvedResource>,
}

#[derive(Debug, Serialize)]
struct IndexedEntry {
    key: String,
    size: usize,
}

#[derive(Debug, Serialize)]
struct IndexListing {
    sources: Vec<String>,
    entries: Vec<IndexedEntry>,
}

fn resolve_all(loader: &ResourceLoader, ids: &[String]) -> ResolveResult {
    let start = Instant::now();
    let resources = ids
        .par_iter()
        .map(|id| match loader.lookup(id) {
            Ok(lookup) => {
                let resolver = match &lookup {
                    Lookup::Cached(_) => None,
                    Lookup::Resolved { resolver, .. } => Some(resolver.clone()),
                };
                let cache_hit = lookup.cache_hit();
                let blob = lookup.into_blob();
                ResolvedResource {
                    id: id.clone(),
                    found: true,
                    cache_hit,
                    resolver,
                    size: Some(blob.len()),
                    content_hash: Some(content_hash(&blob)),
                    error: None,
                    bytes: Some(blob),
                }
            }
            Err(err) => ResolvedResource {
                id: id.clone(),
                found: false,
                cache_hit: false,
                resolver: None,
                size: None,
                content_hash: None,
                error: Some(err.to_string()),
                bytes: None,
            },
        })
        .collect();

    ResolveResult {
        resolvers: loader.resolver_names(),
        duration_ms: start.elapsed().as_millis() as u64,
        resources,
    }
}

fn index_listing(loader: &ResourceLoader) -> IndexListing {
    let mut entries: Vec<IndexedEntry> = loader
        .cache()
        .entries()
        .into_iter()
        .map(|(key, blob)| IndexedEntry {
            size: blob.len(),
            key,
        })
        .collect();
    entries.sort_by(|a, b| a.key.cmp(&b.key));

    IndexListing {
        sources: loader
            .archives()
            .sources()
            .into_iter()
            .map(|(path, _)| path.to_string_lossy().to_string())
            .collect(),
        entries,
    }
}

fn write_resolve_output(
    result: &ResolveResult,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<()> {
    let content: Vec<u8> = match format {
        OutputFormat::Json => {
            let mut json = serde_json::to_vec_pretty(result)?;
            json.push(b'\n');
            json
        }
        OutputFormat::Text => {
            let mut out = String::new();
            out.push_str(&format!("resolvers: {}\n", result.resolvers.join(", ")));
            out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
            for r in &result.resources {
                match (&r.size, &r.content_hash) {
                    (Some(size), Some(hash)) => out.push_str(&format!(
                        "- {}: {} bytes, sha256 {}, cache_hit: {}\n",
                        r.id, size, hash, r.cache_hit
                    )),
                    _ => out.push_str(&format!(
                        "- {}: {}\n",
                        r.id,
                        r.error.as_deref().unwrap_or("not found")
                    )),
                }
            }
            out.into_bytes()
        }
        OutputFormat::Raw => {
            if result.resources.len() != 1 {
                anyhow::bail!("raw output needs exactly one identifier");
            }
            match result.resources[0].bytes.as_ref() {
                Some(bytes) => bytes.to_vec(),
                None => Vec::new(),
            }
        }
    };

    if let Some(path) = output {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write output: {}", path.display()))?;
    } else {
        std::io::stdout().lock().write_all(&content)?;
    }

    Ok(())
}
