// CLI commands for managing Crucible toolchains and workspaces
use anyhow::{bail, Context, Result};
use crucible_common::toolchain::{ToolchainProfile, ToolchainTable, ToolchainsJson, DEFAULT_TOOLCHAINS_PATH};
use crucible_common::types::TestType;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::templates::{self, TemplateLang};

/// Load toolchain overrides; a missing file means no overrides
fn load_toolchains_config(path: &Path) -> Result<ToolchainsJson> {
    if !path.exists() {
        return Ok(ToolchainsJson { languages: vec![] });
    }

    let content = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Save toolchain overrides
fn save_toolchains_config(path: &Path, config: &ToolchainsJson) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let json_content = serde_json::to_string_pretty(config).context("Failed to serialize toolchains.json")?;
    fs::write(path, json_content).with_context(|| format!("Failed to write {}", path.display()))?;

    Ok(())
}

fn split_template(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

fn build_profile(
    name: &str,
    exts: &[String],
    compile: Option<&str>,
    run: &str,
    artifact: Option<&str>,
) -> Result<ToolchainProfile> {
    let compile = compile.map(split_template).unwrap_or_default();
    let needs_compile = !compile.is_empty();
    let default_artifact = if needs_compile { "{output}" } else { "{source}" };

    let profile = ToolchainProfile {
        language: name.trim().to_string(),
        extensions: exts
            .iter()
            .map(|e| e.trim().trim_start_matches('.').to_lowercase())
            .filter(|e| !e.is_empty())
            .collect(),
        needs_compile,
        compile,
        run: split_template(run),
        artifact: artifact.unwrap_or(default_artifact).to_string(),
    };
    profile.validate()?;
    Ok(profile)
}

/// Add a language profile to the override file
pub async fn add_language(
    config_path: &Path,
    name: &str,
    exts: &[String],
    compile: Option<&str>,
    run: &str,
    artifact: Option<&str>,
) -> Result<()> {
    println!("🚀 Adding language: {}", name);

    let profile = build_profile(name, exts, compile, run, artifact)?;
    let mut toolchains_json = load_toolchains_config(config_path)?;

    if toolchains_json.languages.iter().any(|l| l.language == profile.language) {
        bail!("Language '{}' already exists in {}", profile.language, config_path.display());
    }

    let current = ToolchainTable::load_with_overrides(config_path)?;
    if current.get(&profile.language).is_ok() {
        println!("ℹ️  '{}' replaces the built-in profile", profile.language);
    }
    for ext in &profile.extensions {
        if let Ok(existing) = current.detect(&format!("file.{}", ext)) {
            if existing.language != profile.language {
                println!("⚠️  .{} was handled by '{}', now '{}'", ext, existing.language, profile.language);
            }
        }
    }

    toolchains_json.languages.push(profile);

    println!("📝 Updating {}...", config_path.display());
    save_toolchains_config(config_path, &toolchains_json)?;

    println!("✅ Language '{}' added successfully!", name);
    println!("\n📋 Next steps:");
    println!("  1. Check the table: crucible-cli list-langs");
    println!("  2. Name workspace files with one of: {}", exts.join(", "));

    Ok(())
}

/// Remove a language profile from the override file
pub async fn remove_language(config_path: &Path, name: &str, yes: bool) -> Result<()> {
    println!("🗑️  Removing language: {}", name);

    let mut toolchains_json = load_toolchains_config(config_path)?;

    let Some(lang_index) = toolchains_json.languages.iter().position(|l| l.language == name) else {
        if ToolchainTable::builtin().get(name).is_ok() {
            bail!("'{}' is a built-in profile; only entries in {} can be removed", name, config_path.display());
        }
        bail!("Language '{}' not found in {}", name, config_path.display());
    };

    if !yes {
        println!("⚠️  This will remove the '{}' entry from {}", name, config_path.display());
        print!("\nContinue? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            println!("❌ Aborted");
            return Ok(());
        }
    }

    toolchains_json.languages.remove(lang_index);
    println!("📝 Removing from {}...", config_path.display());
    save_toolchains_config(config_path, &toolchains_json)?;

    println!("✅ Language '{}' removed successfully!", name);
    if ToolchainTable::builtin().get(name).is_ok() {
        println!("ℹ️  The built-in '{}' profile applies again", name);
    }

    Ok(())
}

/// List every language the engine will accept
pub async fn list_languages(config_path: &Path) -> Result<()> {
    let overrides = load_toolchains_config(config_path)?;
    let table = ToolchainTable::load_with_overrides(config_path)?;

    println!("📋 Toolchains:\n");
    println!("{:<12} {:<20} {:<10} {:<36} {:<10}", "Name", "Extensions", "Compiled", "Run", "Source");
    println!("{}", "─".repeat(92));

    for profile in table.profiles() {
        let source = if overrides.languages.iter().any(|l| l.language == profile.language) {
            "override"
        } else {
            "built-in"
        };
        println!(
            "{:<12} {:<20} {:<10} {:<36} {:<10}",
            profile.language,
            profile.extensions.join(","),
            if profile.needs_compile { "yes" } else { "no" },
            profile.run.join(" "),
            source
        );
    }

    println!("\n✅ Total: {} language(s)", table.profiles().len());

    Ok(())
}

/// Scaffold a workspace: one template source per required role plus an
/// empty toolchain override file
pub async fn init_project(path: &Path, test_type: TestType, lang: TemplateLang) -> Result<()> {
    println!("🚀 Initializing {} workspace at: {}", test_type, path.display());

    fs::create_dir_all(path).with_context(|| format!("Failed to create directory: {}", path.display()))?;

    for &role in test_type.required_roles() {
        let name = templates::file_name(role, lang);
        let file_path = path.join(&name);
        if file_path.exists() {
            println!("  ⏭️  Kept existing: {}", name);
            continue;
        }
        fs::write(&file_path, templates::source(role, lang))
            .with_context(|| format!("Failed to write {}", file_path.display()))?;
        println!("  ✅ Created: {} ({})", name, role);
    }

    let toolchains_path = path.join(DEFAULT_TOOLCHAINS_PATH);
    if !toolchains_path.exists() {
        save_toolchains_config(&toolchains_path, &ToolchainsJson { languages: vec![] })?;
        println!("  ✅ Created: {}", DEFAULT_TOOLCHAINS_PATH);
    }

    println!("✅ Workspace initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Fill in the role sources");
    println!(
        "  2. Run the suite: crucible-worker run --workspace {} --test-type {} --count 10",
        path.display(),
        test_type
    );
    for role in test_type.optional_roles() {
        println!("  ℹ️  Optional: add {} to also compare outputs", templates::file_name(*role, lang));
    }

    Ok(())
}
