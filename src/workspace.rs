//! Filesystem-backed project collaborators.
//!
//! [`FsWorkspace`] serves the configured `[[programs]]`: each version id
//! maps to a root directory on disk. It implements all three collaborator
//! traits the pipeline consumes:
//!
//! - [`ProjectSource`]: walks the version root (`walkdir`, include and
//!   exclude `globset`s), classifies files, detects language, project type,
//!   entry points, and dependencies, and serves file bytes.
//! - [`VersionResolver`]: the program's `current_version`.
//! - [`ComponentCatalog`]: `[[programs.components]]`.
//!
//! Paths handed to [`ProjectSource::get_file_content`] are relative to the
//! version root; absolute paths and `..` components are rejected with
//! [`SourceError::InvalidPath`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use walkdir::WalkDir;

use code_assist_core::chunk::is_config_file;
use code_assist_core::indexer::detect_language;
use code_assist_core::models::{ProjectStructureAnalysis, UiComponentMapping};
use code_assist_core::source::{ComponentCatalog, ProjectSource, SourceError, VersionResolver};

use crate::config::{Config, ProgramConfig};

const DEFAULT_EXCLUDES: &[&str] = &[
    "**/.git/**",
    "**/target/**",
    "**/node_modules/**",
    "**/bin/**",
    "**/obj/**",
    "**/dist/**",
    "**/__pycache__/**",
];

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "pdf", "zip", "gz", "tgz", "tar", "7z",
    "dll", "exe", "so", "dylib", "a", "o", "class", "jar", "pyc", "wasm", "woff", "woff2", "ttf",
    "eot", "otf", "mp3", "mp4", "wav", "mov", "sqlite", "db", "bin",
];

/// Files that configure a build even though their extension says otherwise.
const CONFIG_FILE_NAMES: &[&str] = &[
    "requirements.txt",
    "Dockerfile",
    "Makefile",
    ".editorconfig",
    ".gitignore",
    ".env",
];

/// Languages that are markup or data rather than code.
const NON_PROGRAMMING: &[&str] = &[
    "text", "markdown", "json", "yaml", "toml", "xml", "ini", "html", "css", "sql",
];

const ENTRY_POINT_NAMES: &[&str] = &[
    "Program.cs",
    "Startup.cs",
    "main.py",
    "__main__.py",
    "app.py",
    "manage.py",
    "index.js",
    "index.ts",
    "main.js",
    "main.ts",
    "app.js",
    "app.ts",
    "server.js",
    "server.ts",
    "main.rs",
    "lib.rs",
    "Main.java",
    "Application.java",
    "main.go",
];

static PACKAGE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"<PackageReference\s+Include\s*=\s*"([^"]+)""#).unwrap());
static REQUIREMENT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z0-9][A-Za-z0-9._-]*)").unwrap());

pub struct FsWorkspace {
    programs: BTreeMap<String, ProgramConfig>,
}

impl FsWorkspace {
    pub fn new(programs: &[ProgramConfig]) -> Self {
        Self {
            programs: programs
                .iter()
                .map(|p| (p.id.clone(), p.clone()))
                .collect(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.programs)
    }

    pub fn programs(&self) -> impl Iterator<Item = &ProgramConfig> {
        self.programs.values()
    }

    fn program(&self, program_id: &str) -> Result<&ProgramConfig> {
        self.programs
            .get(program_id)
            .ok_or_else(|| SourceError::NotFound(format!("program '{}'", program_id)).into())
    }

    fn version_root(&self, program_id: &str, version_id: &str) -> Result<(&ProgramConfig, &Path)> {
        let program = self.program(program_id)?;
        let root = program.versions.get(version_id).ok_or_else(|| {
            SourceError::NotFound(format!("version '{}' of program '{}'", version_id, program_id))
        })?;
        Ok((program, root.as_path()))
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob '{}'", pattern))?);
    }
    Ok(builder.build()?)
}

/// Relative paths (with `/` separators) of every included file under
/// `root`, sorted.
pub fn scan_files(program: &ProgramConfig, root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(SourceError::NotFound(format!("project root {}", root.display())).into());
    }

    let include_set = build_globset(&program.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(program.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    let walker = WalkDir::new(root).follow_links(program.follow_symlinks);
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }
        files.push(rel_str);
    }

    // Sort for deterministic ordering
    files.sort();
    Ok(files)
}

fn extension(path: &str) -> String {
    Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileClass {
    Source,
    Config,
    Binary,
}

/// Classify by name and extension; files with an unknown extension are
/// sniffed for NUL bytes.
pub fn classify_file(root: &Path, path: &str) -> FileClass {
    let ext = extension(path);
    if BINARY_EXTENSIONS.contains(&ext.as_str()) {
        return FileClass::Binary;
    }
    if CONFIG_FILE_NAMES.contains(&file_name(path)) || is_config_file(path) {
        return FileClass::Config;
    }
    if detect_language(path) == "text" && looks_binary(&root.join(path)) {
        return FileClass::Binary;
    }
    FileClass::Source
}

fn looks_binary(path: &Path) -> bool {
    use std::io::Read;
    let mut buf = [0u8; 8000];
    match std::fs::File::open(path).and_then(|mut f| f.read(&mut buf)) {
        Ok(n) => buf[..n].contains(&0),
        Err(_) => false,
    }
}

/// Most common programming language among `files`, ties broken by name.
pub fn dominant_language(files: &[String]) -> String {
    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for f in files {
        let lang = detect_language(f);
        if !NON_PROGRAMMING.contains(&lang) {
            *counts.entry(lang).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
        .map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn any_named(files: &[String], pred: impl Fn(&str) -> bool) -> bool {
    files.iter().any(|f| pred(file_name(f)))
}

pub fn detect_project_type(files: &[String]) -> &'static str {
    if any_named(files, |n| n.ends_with(".csproj") || n.ends_with(".sln")) {
        "dotnet"
    } else if any_named(files, |n| n == "package.json") {
        "node"
    } else if any_named(files, |n| n == "Cargo.toml") {
        "rust"
    } else if any_named(files, |n| {
        n == "pyproject.toml" || n == "requirements.txt" || n == "setup.py"
    }) {
        "python"
    } else if any_named(files, |n| {
        n == "pom.xml" || n == "build.gradle" || n == "build.gradle.kts"
    }) {
        "java"
    } else {
        "generic"
    }
}

fn detect_entry_points(files: &[String], package_main: Option<&str>) -> Vec<String> {
    let mut entries: BTreeSet<String> = files
        .iter()
        .filter(|f| ENTRY_POINT_NAMES.contains(&file_name(f)))
        .cloned()
        .collect();
    if let Some(main) = package_main {
        let main = main.trim_start_matches("./");
        if let Some(f) = files.iter().find(|f| f.as_str() == main) {
            entries.insert(f.clone());
        }
    }
    entries.into_iter().collect()
}

/// Dependency names declared in one manifest.
pub fn parse_dependencies(file: &str, content: &str) -> Vec<String> {
    let name = file_name(file);
    if name == "package.json" {
        let Ok(json) = serde_json::from_str::<serde_json::Value>(content) else {
            return Vec::new();
        };
        ["dependencies", "devDependencies"]
            .iter()
            .filter_map(|k| json.get(*k).and_then(|d| d.as_object()))
            .flat_map(|deps| deps.keys().cloned())
            .collect()
    } else if name == "requirements.txt" {
        content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with('-'))
            .filter_map(|l| REQUIREMENT_NAME.captures(l).map(|c| c[1].to_string()))
            .collect()
    } else if name == "Cargo.toml" {
        let Ok(value) = toml::from_str::<toml::Value>(content) else {
            return Vec::new();
        };
        ["dependencies", "dev-dependencies"]
            .iter()
            .filter_map(|k| value.get(*k).and_then(|d| d.as_table()))
            .flat_map(|deps| deps.keys().cloned())
            .collect()
    } else if name.ends_with(".csproj") {
        PACKAGE_REFERENCE
            .captures_iter(content)
            .map(|c| c[1].to_string())
            .collect()
    } else {
        Vec::new()
    }
}

/// Build the structure snapshot for one version root.
pub fn analyze_root(program: &ProgramConfig, root: &Path) -> Result<ProjectStructureAnalysis> {
    let files = scan_files(program, root)?;

    let mut analysis = ProjectStructureAnalysis::default();
    for f in &files {
        match classify_file(root, f) {
            FileClass::Source => analysis.source_files.push(f.clone()),
            FileClass::Config => analysis.config_files.push(f.clone()),
            FileClass::Binary => analysis.binary_files.push(f.clone()),
        }
    }

    let mut dependencies = BTreeSet::new();
    let mut package_main = None;
    for f in &analysis.config_files {
        let name = file_name(f);
        let is_manifest = matches!(name, "package.json" | "requirements.txt" | "Cargo.toml")
            || name.ends_with(".csproj");
        if !is_manifest {
            continue;
        }
        match std::fs::read_to_string(root.join(f)) {
            Ok(content) => {
                if name == "package.json" && package_main.is_none() {
                    package_main = serde_json::from_str::<serde_json::Value>(&content)
                        .ok()
                        .and_then(|j| j.get("main").and_then(|m| m.as_str()).map(str::to_string));
                }
                dependencies.extend(parse_dependencies(f, &content));
            }
            Err(e) => tracing::warn!(file = %f, error = %e, "skipping unreadable manifest"),
        }
    }

    analysis.language = dominant_language(&analysis.source_files);
    analysis.project_type = detect_project_type(&files).to_string();
    analysis.entry_points = detect_entry_points(&analysis.source_files, package_main.as_deref());
    analysis.dependencies = dependencies.into_iter().collect();
    Ok(analysis)
}

/// Resolve a project-relative path, refusing anything that could leave
/// `root`.
pub fn resolve_relative(root: &Path, path: &str) -> Result<PathBuf, SourceError> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(SourceError::InvalidPath("empty path".into()));
    }
    let rel = Path::new(trimmed);
    let escapes = rel.is_absolute()
        || trimmed.starts_with('/')
        || trimmed.starts_with('\\')
        || rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        || trimmed.split(['/', '\\']).any(|part| part == "..");
    if escapes {
        return Err(SourceError::InvalidPath(path.to_string()));
    }
    Ok(root.join(rel))
}

#[async_trait]
impl ProjectSource for FsWorkspace {
    async fn analyze_project_structure(
        &self,
        program_id: &str,
        version_id: &str,
    ) -> Result<ProjectStructureAnalysis> {
        let (program, root) = self.version_root(program_id, version_id)?;
        let program = program.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || analyze_root(&program, &root)).await?
    }

    async fn get_file_content(&self, program_id: &str, version_id: &str, path: &str) -> Result<Vec<u8>> {
        let (_, root) = self.version_root(program_id, version_id)?;
        let full = resolve_relative(root, path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SourceError::NotFound(path.to_string()).into())
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", full.display())),
        }
    }
}

#[async_trait]
impl VersionResolver for FsWorkspace {
    async fn current_version(&self, program_id: &str) -> Result<String> {
        let program = self.program(program_id)?;
        program.current_version.clone().ok_or_else(|| {
            SourceError::NotFound(format!("current version of program '{}'", program_id)).into()
        })
    }
}

#[async_trait]
impl ComponentCatalog for FsWorkspace {
    async fn component_mappings(
        &self,
        program_id: &str,
        _version_id: &str,
    ) -> Result<Vec<UiComponentMapping>> {
        Ok(self
            .programs
            .get(program_id)
            .map(|p| {
                p.components
                    .iter()
                    .map(|c| UiComponentMapping {
                        component_name: c.component_name.clone(),
                        mapping_name: c.mapping_name.clone(),
                        configuration: c.configuration.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn program(root: &Path) -> ProgramConfig {
        ProgramConfig {
            id: "shop".into(),
            current_version: Some("v1".into()),
            versions: [("v1".to_string(), root.to_path_buf())].into_iter().collect(),
            include_globs: vec!["**/*".into()],
            exclude_globs: vec![],
            follow_symlinks: false,
            components: vec![],
        }
    }

    fn dotnet_project() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "Program.cs", b"class Program { static void Main() {} }");
        write(root, "Services/CartService.cs", b"public class CartService {}");
        write(root, "scripts/seed.py", b"print('x')");
        write(
            root,
            "Shop.csproj",
            br#"<Project><ItemGroup><PackageReference Include="Newtonsoft.Json" Version="13.0.1" /></ItemGroup></Project>"#,
        );
        write(root, "appsettings.json", b"{}");
        write(root, "wwwroot/logo.png", &[0x89, b'P', b'N', b'G', 0]);
        write(root, "obj/Debug/generated.cs", b"// generated");
        write(root, "data.blob", &[1, 0, 2, 0]);
        tmp
    }

    #[test]
    fn test_analyze_dotnet_project() {
        let tmp = dotnet_project();
        let analysis = analyze_root(&program(tmp.path()), tmp.path()).unwrap();

        assert_eq!(analysis.project_type, "dotnet");
        assert_eq!(analysis.language, "csharp");
        assert_eq!(
            analysis.source_files,
            vec!["Program.cs", "Services/CartService.cs", "scripts/seed.py"]
        );
        assert_eq!(analysis.config_files, vec!["Shop.csproj", "appsettings.json"]);
        assert_eq!(analysis.binary_files, vec!["data.blob", "wwwroot/logo.png"]);
        assert_eq!(analysis.entry_points, vec!["Program.cs"]);
        assert_eq!(analysis.dependencies, vec!["Newtonsoft.Json"]);
    }

    #[test]
    fn test_parse_dependencies_manifests() {
        let pkg = r#"{"main": "src/index.js", "dependencies": {"express": "^4"}, "devDependencies": {"jest": "^29"}}"#;
        assert_eq!(parse_dependencies("package.json", pkg), vec!["express", "jest"]);

        let reqs = "# pinned\nrequests==2.31\nflask>=2\n-r other.txt\n";
        assert_eq!(parse_dependencies("requirements.txt", reqs), vec!["requests", "flask"]);

        let cargo = "[package]\nname = \"x\"\n[dependencies]\nserde = \"1\"\n";
        assert_eq!(parse_dependencies("Cargo.toml", cargo), vec!["serde"]);
    }

    #[test]
    fn test_resolve_relative_rejects_escapes() {
        let root = Path::new("/srv/project");
        assert!(resolve_relative(root, "src/app.ts").is_ok());
        for bad in ["../secret", "src/../../etc/passwd", "/etc/passwd", "\\windows", ""] {
            assert!(
                matches!(resolve_relative(root, bad), Err(SourceError::InvalidPath(_))),
                "{} should be rejected",
                bad
            );
        }
    }

    #[tokio::test]
    async fn test_get_file_content_and_errors() {
        let tmp = dotnet_project();
        let ws = FsWorkspace::new(&[program(tmp.path())]);

        let bytes = ws.get_file_content("shop", "v1", "Program.cs").await.unwrap();
        assert!(bytes.starts_with(b"class Program"));

        let err = ws.get_file_content("shop", "v1", "../x").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::InvalidPath(_))
        ));

        let err = ws.get_file_content("shop", "v1", "Missing.cs").await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SourceError>(),
            Some(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_version_resolution() {
        let tmp = TempDir::new().unwrap();
        let mut no_current = program(tmp.path());
        no_current.id = "draft".into();
        no_current.current_version = None;
        let ws = FsWorkspace::new(&[program(tmp.path()), no_current]);

        assert_eq!(ws.current_version("shop").await.unwrap(), "v1");
        for id in ["draft", "ghost"] {
            let err = ws.current_version(id).await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<SourceError>(),
                Some(SourceError::NotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_components_served_from_config() {
        let tmp = TempDir::new().unwrap();
        let mut p = program(tmp.path());
        p.components.push(crate::config::ComponentConfig {
            component_name: "CartView".into(),
            mapping_name: "cart".into(),
            configuration: None,
        });
        let ws = FsWorkspace::new(&[p]);
        let comps = ws.component_mappings("shop", "v1").await.unwrap();
        assert_eq!(comps.len(), 1);
        assert!(ws.component_mappings("ghost", "v1").await.unwrap().is_empty());
    }
}
