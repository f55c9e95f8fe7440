use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use xshell::{Shell, cmd};

#[derive(Debug, Clone)]
struct Crate {
    name: String,
    path: PathBuf,
    version: String,
    local_deps: Vec<String>,
}

pub fn run_publish(dry_run: bool) -> Result<()> {
    println!("{}", "📦 Starting Publish Workflow...".magenta().bold());
    if dry_run {
        println!("{}", "ℹ️  DRY RUN MODE".yellow());
    }

    let version = workspace_version(Path::new("Cargo.toml"))?;
    let crates = load_workspace(&version)?;
    let layers = topological_sort(&crates)?;

    for (i, layer) in layers.iter().enumerate() {
        let names: Vec<_> = layer.iter().map(|c| c.name.as_str()).collect();
        println!("   Layer {}: {:?}", i, names);
    }

    for (i, layer) in layers.iter().enumerate() {
        println!("\n▶️  Executing Layer {} ({})", i, layer.len());
        layer
            .par_iter()
            .try_for_each(|krate| publish_crate(dry_run, krate))?;

        if !dry_run {
            for krate in layer {
                wait_for_index_propagation(&krate.name, &krate.version)?;
            }
        }
    }

    println!("{}", "\n🎉 Publish workflow finished successfully!".magenta().bold());
    Ok(())
}

fn publish_crate(dry_run: bool, krate: &Crate) -> Result<()> {
    // Shell is !Sync, so each rayon worker gets its own.
    let sh = Shell::new()?;
    let _guard = sh.push_dir(&krate.path);
    let name = &krate.name;

    if dry_run {
        println!("{}", format!("🔍 Packaging {}@{}...", name, krate.version).cyan());
        cmd!(sh, "cargo publish --dry-run --allow-dirty").run()?;
        return Ok(());
    }

    let search = cmd!(sh, "cargo search {name} --limit 1").read().unwrap_or_default();
    if search.contains(&format!("{} = \"{}\"", name, krate.version)) {
        println!("{}", format!("⏭️  {} v{} already exists, skipping", name, krate.version).yellow());
        return Ok(());
    }

    let max_attempts = 3;
    for attempt in 1..=max_attempts {
        let output = std::process::Command::new("cargo")
            .arg("publish")
            .current_dir(&krate.path)
            .output()?;

        if output.status.success() {
            println!("{}", format!("✅ Published {} v{}", name, krate.version).green());
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("is already uploaded") || stderr.contains("already exists") {
            println!("{}", format!("⏭️  {} already published, skipping", name).yellow());
            return Ok(());
        }

        if attempt == max_attempts {
            anyhow::bail!(
                "`cargo publish` failed for {} after {} attempts: {}\n{}",
                name,
                attempt,
                output.status,
                stderr
            );
        }

        println!(
            "{}",
            format!("   [RETRY] {} (attempt {}/{}) - waiting 5s...", name, attempt, max_attempts)
                .yellow()
        );
        std::thread::sleep(Duration::from_secs(5));
    }

    Ok(())
}

fn workspace_version(manifest: &Path) -> Result<String> {
    let content = fs::read_to_string(manifest)
        .with_context(|| format!("Failed to read {:?}", manifest))?;
    let doc = content.parse::<toml_edit::DocumentMut>()?;
    doc["workspace"]["package"]["version"]
        .as_str()
        .map(str::to_string)
        .context("Missing workspace.package.version")
}

fn load_workspace(workspace_version: &str) -> Result<Vec<Crate>> {
    let mut crates = Vec::new();
    for entry in fs::read_dir("crates")? {
        let path = entry?.path();
        if path.is_dir() && path.join("Cargo.toml").exists() {
            crates.push(parse_crate(&path, workspace_version)?);
        }
    }

    // Keep only edges between workspace members.
    let names: HashSet<String> = crates.iter().map(|c| c.name.clone()).collect();
    for krate in &mut crates {
        krate.local_deps.retain(|dep| names.contains(dep));
    }
    Ok(crates)
}

fn parse_crate(path: &Path, workspace_version: &str) -> Result<Crate> {
    let manifest_path = path.join("Cargo.toml");
    let content = fs::read_to_string(&manifest_path)
        .with_context(|| format!("Failed to read {:?}", manifest_path))?;
    let doc = content.parse::<toml_edit::DocumentMut>()?;

    let name = doc["package"]["name"]
        .as_str()
        .context("Missing package name")?
        .to_string();
    let version = doc["package"]["version"]
        .as_str()
        .unwrap_or(workspace_version)
        .to_string();

    let local_deps = doc
        .get("dependencies")
        .and_then(|d| d.as_table())
        .map(|deps| deps.iter().map(|(dep, _)| dep.to_string()).collect())
        .unwrap_or_default();

    Ok(Crate {
        name,
        path: path.to_path_buf(),
        version,
        local_deps,
    })
}

fn topological_sort(crates: &[Crate]) -> Result<Vec<Vec<Crate>>> {
    let mut layers = Vec::new();
    let mut remaining: HashMap<String, Crate> =
        crates.iter().map(|c| (c.name.clone(), c.clone())).collect();

    while !remaining.is_empty() {
        let mut layer: Vec<Crate> = remaining
            .values()
            .filter(|c| c.local_deps.iter().all(|dep| !remaining.contains_key(dep)))
            .cloned()
            .collect();

        if layer.is_empty() {
            anyhow::bail!(
                "Cycle detected between workspace crates: {:?}",
                remaining.keys()
            );
        }

        layer.sort_by(|a, b| a.name.cmp(&b.name));
        for c in &layer {
            remaining.remove(&c.name);
        }
        layers.push(layer);
    }

    Ok(layers)
}

/// Wait for crates.io index to propagate the new version
fn wait_for_index_propagation(crate_name: &str, version: &str) -> Result<()> {
    let sh = Shell::new()?;
    let pb = ProgressBar::new(30);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {msg}")?
            .progress_chars("#>-"),
    );
    pb.set_message(format!("Waiting for {} v{} to propagate...", crate_name, version));

    for _ in 0..15 {
        pb.inc(2);
        std::thread::sleep(Duration::from_secs(2));

        let search = cmd!(sh, "cargo search {crate_name} --limit 1")
            .read()
            .unwrap_or_default();
        if search.contains(version) {
            pb.finish_with_message(format!("✓ {} v{} available on crates.io", crate_name, version));
            return Ok(());
        }
    }

    pb.finish_with_message(format!("Timeout - {} may take longer to appear", crate_name));
    Ok(())
}
