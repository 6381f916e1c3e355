// Toolchain profiles and extension-based language detection
//
// The table is static data: adding a language means adding an entry here or in
// config/toolchains.json, nothing else.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_TOOLCHAINS_PATH: &str = "config/toolchains.json";

#[derive(Debug, Error)]
pub enum ToolchainError {
    #[error("unsupported language for {path}: extension '{extension}' is not in the toolchain table")]
    UnsupportedLanguage { path: String, extension: String },

    #[error("no toolchain profile for language '{0}'")]
    UnknownLanguage(String),

    #[error("invalid toolchain profile '{language}': {reason}")]
    InvalidProfile { language: String, reason: String },

    #[error("failed to read toolchain table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse toolchain table {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How one language is compiled and run.
///
/// Templates may use `{source}`, `{dir}`, `{output}` and `{class}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainProfile {
    pub language: String,
    /// Lowercase extensions without the leading dot
    pub extensions: Vec<String>,
    pub needs_compile: bool,
    #[serde(default)]
    pub compile: Vec<String>,
    pub run: Vec<String>,
    /// Path whose existence proves the artifact is still usable
    #[serde(default = "default_artifact")]
    pub artifact: String,
}

fn default_artifact() -> String {
    "{output}".to_string()
}

impl ToolchainProfile {
    fn new(language: &str, extensions: &[&str], compile: &[&str], run: &[&str], artifact: &str) -> Self {
        Self {
            language: language.to_string(),
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            needs_compile: !compile.is_empty(),
            compile: compile.iter().map(|s| s.to_string()).collect(),
            run: run.iter().map(|s| s.to_string()).collect(),
            artifact: artifact.to_string(),
        }
    }

    pub fn validate(&self) -> Result<(), ToolchainError> {
        let invalid = |reason: &str| ToolchainError::InvalidProfile {
            language: self.language.clone(),
            reason: reason.to_string(),
        };
        if self.language.trim().is_empty() {
            return Err(invalid("language id is empty"));
        }
        if self.extensions.is_empty() {
            return Err(invalid("no file extensions"));
        }
        if self.run.is_empty() {
            return Err(invalid("run template is empty"));
        }
        if self.needs_compile && self.compile.is_empty() {
            return Err(invalid("needs_compile is set but compile template is empty"));
        }
        Ok(())
    }
}

/// Values substituted into toolchain templates.
#[derive(Debug, Clone)]
pub struct TemplateVars {
    pub source: PathBuf,
    pub dir: PathBuf,
    pub output: PathBuf,
    pub class: String,
}

impl TemplateVars {
    /// Variables for a source copied into `dir`.
    pub fn for_source(dir: &Path, file_name: &str) -> Self {
        let class = file_name.split('.').next().unwrap_or(file_name).to_string();
        Self {
            source: dir.join(file_name),
            dir: dir.to_path_buf(),
            output: dir.join(&class),
            class,
        }
    }

    pub fn expand_arg(&self, template: &str) -> String {
        template
            .replace("{source}", &self.source.to_string_lossy())
            .replace("{output}", &self.output.to_string_lossy())
            .replace("{dir}", &self.dir.to_string_lossy())
            .replace("{class}", &self.class)
    }

    pub fn expand(&self, template: &[String]) -> Vec<String> {
        template.iter().map(|arg| self.expand_arg(arg)).collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolchainsJson {
    pub languages: Vec<ToolchainProfile>,
}

/// Extension → toolchain profile lookup.
#[derive(Debug, Clone)]
pub struct ToolchainTable {
    profiles: Vec<ToolchainProfile>,
    by_extension: HashMap<String, usize>,
}

impl ToolchainTable {
    pub fn from_profiles(profiles: Vec<ToolchainProfile>) -> Result<Self, ToolchainError> {
        let mut table = Self {
            profiles: Vec::new(),
            by_extension: HashMap::new(),
        };
        for profile in profiles {
            table.insert(profile)?;
        }
        Ok(table)
    }

    /// Built-in profiles for the languages the tool ships with.
    pub fn builtin() -> Self {
        let profiles = vec![
            ToolchainProfile::new(
                "cpp",
                &["cpp", "cc", "cxx", "c++"],
                &["g++", "-O2", "-std=c++17", "-pipe", "{source}", "-o", "{output}"],
                &["{output}"],
                "{output}",
            ),
            ToolchainProfile::new(
                "c",
                &["c"],
                &["gcc", "-O2", "-pipe", "{source}", "-o", "{output}"],
                &["{output}"],
                "{output}",
            ),
            ToolchainProfile::new("python", &["py", "pyw"], &[], &["python3", "-u", "{source}"], "{source}"),
            ToolchainProfile::new(
                "java",
                &["java"],
                &["javac", "-d", "{dir}", "{source}"],
                &["java", "-cp", "{dir}", "{class}"],
                "{dir}/{class}.class",
            ),
            ToolchainProfile::new(
                "rust",
                &["rs"],
                &["rustc", "-O", "{source}", "-o", "{output}"],
                &["{output}"],
                "{output}",
            ),
            ToolchainProfile::new("shell", &["sh"], &[], &["sh", "{source}"], "{source}"),
        ];
        let mut table = Self {
            profiles,
            by_extension: HashMap::new(),
        };
        table.reindex();
        table
    }

    /// Read a `{"languages": [...]}` file.
    pub fn load(path: &Path) -> Result<Self, ToolchainError> {
        let content = fs::read_to_string(path).map_err(|source| ToolchainError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed: ToolchainsJson =
            serde_json::from_str(&content).map_err(|source| ToolchainError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_profiles(parsed.languages)
    }

    /// Built-ins overlaid with `path` when it exists.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ToolchainError> {
        let mut table = Self::builtin();
        if !path.exists() {
            debug!(path = %path.display(), "No toolchain overrides found, using built-in table");
            return Ok(table);
        }
        let overrides = Self::load(path)?;
        for profile in overrides.profiles {
            table.insert(profile)?;
        }
        info!(
            path = %path.display(),
            languages = ?table.list_languages(),
            "Loaded toolchain table"
        );
        Ok(table)
    }

    /// Add a profile, replacing any existing one with the same language id.
    pub fn insert(&mut self, profile: ToolchainProfile) -> Result<(), ToolchainError> {
        profile.validate()?;
        self.profiles.retain(|p| p.language != profile.language);
        self.profiles.push(profile);
        self.reindex();
        Ok(())
    }

    fn reindex(&mut self) {
        self.by_extension.clear();
        for (idx, profile) in self.profiles.iter().enumerate() {
            for ext in &profile.extensions {
                self.by_extension
                    .insert(ext.trim_start_matches('.').to_lowercase(), idx);
            }
        }
    }

    /// Detect the toolchain for a file path by its extension.
    pub fn detect(&self, path: &str) -> Result<&ToolchainProfile, ToolchainError> {
        let extension = extension_of(path);
        self.by_extension
            .get(&extension)
            .map(|&idx| &self.profiles[idx])
            .ok_or_else(|| ToolchainError::UnsupportedLanguage {
                path: path.to_string(),
                extension,
            })
    }

    pub fn supports(&self, path: &str) -> bool {
        self.by_extension.contains_key(&extension_of(path))
    }

    pub fn get(&self, language: &str) -> Result<&ToolchainProfile, ToolchainError> {
        self.profiles
            .iter()
            .find(|p| p.language == language)
            .ok_or_else(|| ToolchainError::UnknownLanguage(language.to_string()))
    }

    pub fn list_languages(&self) -> Vec<String> {
        self.profiles.iter().map(|p| p.language.clone()).collect()
    }

    pub fn profiles(&self) -> &[ToolchainProfile] {
        &self.profiles
    }
}

fn extension_of(path: &str) -> String {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(pos) if pos + 1 < name.len() => name[pos + 1..].to_lowercase(),
        _ => String::new(),
    }
}
