//! Logical project model
//!
//! A project arrives as a nested folder/file description. Before anything
//! touches the filesystem it is turned into a [`ProjectPlan`]: a flat,
//! fully validated list of relative paths plus the resolved main file.

pub mod kind;
pub mod paths;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EngineError;
pub use kind::{classify, is_binary_format, supported_extensions, FileKind};
pub use paths::validate_name;

/// File names tried, in order, when no main file is specified
const CONVENTIONAL_MAIN_FILES: &[&str] = &["main.tex", "document.tex", "paper.tex", "thesis.tex"];

/// How far into a file to look for `\documentclass`
const DOCUMENTCLASS_SCAN_CHARS: usize = 1000;

/// A file in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileNode {
    pub id: String,
    #[serde(default)]
    pub folder_id: String,
    pub name: String,
    /// Declared format tag (e.g. "tex", "png")
    #[serde(default)]
    pub format: String,
    /// Inline content; base64 for binary formats
    #[serde(default)]
    pub content: Option<String>,
    /// Remote location used when there is no inline content
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, rename = "projectId", skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

/// Where a file's bytes come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileSource<'a> {
    Inline(&'a str),
    Remote(&'a str),
}

impl FileNode {
    /// Create a file with inline content
    pub fn inline(
        id: impl Into<String>,
        folder_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let format = Path::new(&name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        Self {
            id: id.into(),
            folder_id: folder_id.into(),
            name,
            format,
            content: Some(content.into()),
            url: None,
            project_id: None,
        }
    }

    /// Create a file fetched from a URL
    pub fn remote(
        id: impl Into<String>,
        folder_id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        let mut node = Self::inline(id, folder_id, name, "");
        node.content = None;
        node.url = Some(url.into());
        node
    }

    /// The effective source of this file's bytes
    ///
    /// Non-empty inline content wins; otherwise a non-empty URL; a file
    /// with neither is an empty inline file.
    pub fn source(&self) -> FileSource<'_> {
        match (self.content.as_deref(), self.url.as_deref()) {
            (Some(content), _) if !content.is_empty() => FileSource::Inline(content),
            (_, Some(url)) if !url.trim().is_empty() => FileSource::Remote(url.trim()),
            _ => FileSource::Inline(""),
        }
    }

    /// Extension from the name, falling back to the format tag
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .or_else(|| {
                let format = self.format.trim().trim_start_matches('.');
                (!format.is_empty()).then(|| format.to_ascii_lowercase())
            })
    }

    /// Whether inline content must be base64-decoded
    pub fn is_binary(&self) -> bool {
        is_binary_format(&self.format) || self.extension().is_some_and(|e| is_binary_format(&e))
    }
}

/// A folder in a project
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FolderNode {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_root: bool,
    #[serde(default)]
    pub files: Vec<FileNode>,
    #[serde(default)]
    pub subfolders: Vec<FolderNode>,
}

impl FolderNode {
    /// Create the root folder
    pub fn root(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_root: true,
            files: Vec::new(),
            subfolders: Vec::new(),
        }
    }

    /// Create a non-root folder
    pub fn folder(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            is_root: false,
            ..Self::root(id, name)
        }
    }

    pub fn with_file(mut self, file: FileNode) -> Self {
        self.files.push(file);
        self
    }

    pub fn with_subfolder(mut self, folder: FolderNode) -> Self {
        self.subfolders.push(folder);
        self
    }
}

/// A complete project: the root folder and an optional main-file name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectTree {
    pub root: FolderNode,
    #[serde(default)]
    pub main_file: Option<String>,
}

/// A validated file, ready to be written
#[derive(Debug, Clone)]
pub struct PlannedFile<'a> {
    pub relative_path: PathBuf,
    pub node: &'a FileNode,
    pub kind: FileKind,
}

/// A validated project
#[derive(Debug, Clone)]
pub struct ProjectPlan<'a> {
    pub files: Vec<PlannedFile<'a>>,
    main_index: usize,
}

impl<'a> ProjectPlan<'a> {
    /// The resolved main file
    pub fn main(&self) -> &PlannedFile<'a> {
        &self.files[self.main_index]
    }
}

impl ProjectTree {
    pub fn new(root: FolderNode, main_file: Option<String>) -> Self {
        Self { root, main_file }
    }

    /// A one-file project whose root folder holds `main.tex`
    pub fn single_file(project_name: impl Into<String>, source: impl Into<String>) -> Self {
        let root = FolderNode::root("root", project_name)
            .with_file(FileNode::inline("main", "root", "main.tex", source));
        Self::new(root, Some("main.tex".to_string()))
    }

    /// Validate the whole tree and resolve the main file
    ///
    /// Nothing is written here, so any rejection happens before the first
    /// byte reaches the disk.
    pub fn plan(&self) -> Result<ProjectPlan<'_>, EngineError> {
        if !self.root.is_root {
            return Err(EngineError::InvalidProject(
                "top-level folder must have the root flag set".to_string(),
            ));
        }

        let mut folder_ids = HashSet::new();
        let mut folders = HashSet::new();
        let mut files = Vec::new();
        collect(&self.root, Path::new(""), &mut folder_ids, &mut folders, &mut files)?;

        if files.is_empty() {
            return Err(EngineError::InvalidProject(
                "no files found in project".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for file in &files {
            if !seen.insert(file.relative_path.clone()) {
                return Err(EngineError::InvalidProject(format!(
                    "duplicate file path '{}'",
                    file.relative_path.display()
                )));
            }
        }

        // A path is either a file or a directory, never both
        for file in &files {
            let clash = folders
                .get(&file.relative_path)
                .map(PathBuf::as_path)
                .or_else(|| {
                    file.relative_path
                        .ancestors()
                        .skip(1)
                        .find(|ancestor| seen.contains(*ancestor))
                });
            if let Some(path) = clash {
                return Err(EngineError::InvalidProject(format!(
                    "'{}' is used as both a file and a folder",
                    path.display()
                )));
            }
        }

        let main_index = resolve_main(&files, self.main_file.as_deref())?;
        debug!(
            files = files.len(),
            main = %files[main_index].relative_path.display(),
            "Project plan resolved"
        );

        Ok(ProjectPlan { files, main_index })
    }
}

fn collect<'a>(
    folder: &'a FolderNode,
    parent: &Path,
    folder_ids: &mut HashSet<&'a str>,
    folders: &mut HashSet<PathBuf>,
    out: &mut Vec<PlannedFile<'a>>,
) -> Result<(), EngineError> {
    if !folder_ids.insert(folder.id.as_str()) {
        return Err(EngineError::InvalidProject(format!(
            "duplicate folder id '{}'",
            folder.id
        )));
    }

    let dir = if folder.is_root {
        parent.to_path_buf()
    } else {
        parent.join(validate_name(&folder.name)?)
    };
    if !folder.is_root {
        folders.insert(dir.clone());
    }

    for file in &folder.files {
        if !file.folder_id.is_empty() && file.folder_id != folder.id {
            return Err(EngineError::InvalidProject(format!(
                "file '{}' claims folder '{}' but is listed under '{}'",
                file.name, file.folder_id, folder.id
            )));
        }

        let relative = validate_name(&file.name)?;
        let kind = file
            .extension()
            .and_then(|ext| classify(&ext))
            .ok_or_else(|| EngineError::UnsupportedExtension(file.name.clone()))?;

        out.push(PlannedFile {
            relative_path: dir.join(relative),
            node: file,
            kind,
        });
    }

    for sub in &folder.subfolders {
        if sub.is_root {
            return Err(EngineError::InvalidProject(format!(
                "folder '{}' is nested but has the root flag set",
                sub.name
            )));
        }
        collect(sub, &dir, folder_ids, folders, out)?;
    }

    Ok(())
}

fn is_tex(file: &PlannedFile<'_>) -> bool {
    file.relative_path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("tex"))
}

fn file_name_of(file: &PlannedFile<'_>) -> String {
    file.relative_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn resolve_main(files: &[PlannedFile<'_>], requested: Option<&str>) -> Result<usize, EngineError> {
    if let Some(requested) = requested.map(str::trim).filter(|r| !r.is_empty()) {
        let requested_path = validate_name(requested)?;
        let matches: Vec<usize> = files
            .iter()
            .enumerate()
            .filter(|(_, f)| f.node.name == requested || f.relative_path == requested_path)
            .map(|(i, _)| i)
            .collect();

        return match matches.as_slice() {
            [index] if is_tex(&files[*index]) => Ok(*index),
            [_] => Err(EngineError::MainFileNotFound(format!(
                "'{}' is not a .tex file",
                requested
            ))),
            [] => Err(EngineError::MainFileNotFound(format!(
                "'{}' does not exist in the project",
                requested
            ))),
            _ => Err(EngineError::MainFileNotFound(format!(
                "'{}' is ambiguous; use its path within the project",
                requested
            ))),
        };
    }

    let tex: Vec<usize> = (0..files.len()).filter(|&i| is_tex(&files[i])).collect();
    if tex.is_empty() {
        return Err(EngineError::MainFileNotFound(
            "no .tex file in project".to_string(),
        ));
    }

    for conventional in CONVENTIONAL_MAIN_FILES {
        if let Some(&index) = tex
            .iter()
            .find(|&&i| file_name_of(&files[i]).eq_ignore_ascii_case(conventional))
        {
            return Ok(index);
        }
    }

    let declares_class = |i: &&usize| match files[**i].node.source() {
        FileSource::Inline(text) => text
            .chars()
            .take(DOCUMENTCLASS_SCAN_CHARS)
            .collect::<String>()
            .contains("\\documentclass"),
        FileSource::Remote(_) => false,
    };
    if let Some(&index) = tex.iter().find(declares_class) {
        return Ok(index);
    }

    Ok(tex[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tex(id: &str, folder: &str, name: &str, body: &str) -> FileNode {
        FileNode::inline(id, folder, name, body)
    }

    fn paths(plan: &ProjectPlan<'_>) -> Vec<String> {
        plan.files
            .iter()
            .map(|f| f.relative_path.to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_plan_flattens_nested_tree() {
        let root = FolderNode::root("r", "paper")
            .with_file(tex("1", "r", "main.tex", "\\documentclass{article}"))
            .with_subfolder(
                FolderNode::folder("c", "chapters")
                    .with_file(tex("2", "c", "intro.tex", "Intro"))
                    .with_subfolder(
                        FolderNode::folder("f", "figures")
                            .with_file(FileNode::remote("3", "f", "plot.png", "https://x/p.png")),
                    ),
            );
        let tree = ProjectTree::new(root, Some("main.tex".into()));
        let plan = tree.plan().unwrap();

        assert_eq!(
            paths(&plan),
            vec!["main.tex", "chapters/intro.tex", "chapters/figures/plot.png"]
        );
        assert_eq!(plan.main().node.id, "1");
        assert_eq!(plan.files[2].kind, FileKind::Asset);
    }

    #[test]
    fn test_traversal_in_folder_name_rejected() {
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_subfolder(FolderNode::folder("x", "..").with_file(tex("2", "x", "a.tex", "")));
        let err = ProjectTree::new(root, None).plan().unwrap_err();
        assert!(matches!(err, EngineError::UnsafePath { .. }));
    }

    #[test]
    fn test_unsupported_extension_rejected() {
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_file(tex("2", "r", "run.sh", "rm -rf /"));
        let err = ProjectTree::new(root, None).plan().unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedExtension(name) if name == "run.sh"));
    }

    #[test]
    fn test_extension_inferred_from_format() {
        let mut file = tex("1", "r", "Makefile", "");
        file.format = "txt".to_string();
        let root = FolderNode::root("r", "p")
            .with_file(tex("0", "r", "main.tex", ""))
            .with_file(file);
        let tree = ProjectTree::new(root, None);
        let plan = tree.plan().unwrap();
        assert_eq!(plan.files[1].kind, FileKind::Data);
    }

    #[test]
    fn test_root_flag_rules() {
        let not_root = FolderNode::folder("r", "p").with_file(tex("1", "r", "main.tex", ""));
        assert!(matches!(
            ProjectTree::new(not_root, None).plan(),
            Err(EngineError::InvalidProject(_))
        ));

        let two_roots = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_subfolder(FolderNode::root("s", "sub"));
        assert!(matches!(
            ProjectTree::new(two_roots, None).plan(),
            Err(EngineError::InvalidProject(_))
        ));
    }

    #[test]
    fn test_duplicate_folder_ids_rejected() {
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_subfolder(FolderNode::folder("r", "again"));
        let err = ProjectTree::new(root, None).plan().unwrap_err();
        assert!(err.to_string().contains("duplicate folder id"));
    }

    #[test]
    fn test_file_named_like_folder_rejected() {
        let mut figs = tex("2", "r", "figs", "");
        figs.format = "txt".to_string();
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_file(figs)
            .with_subfolder(FolderNode::folder("f", "figs").with_file(tex("3", "f", "a.tex", "")));
        let err = ProjectTree::new(root, None).plan().unwrap_err();
        assert!(matches!(err, EngineError::InvalidProject(_)));
        assert!(err.to_string().contains("both a file and a folder"));
    }

    #[test]
    fn test_file_used_as_parent_of_another_file_rejected() {
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_file(tex("2", "r", "a.tex", ""))
            .with_file(tex("3", "r", "a.tex/b.tex", ""));
        let err = ProjectTree::new(root, None).plan().unwrap_err();
        assert!(err.to_string().contains("'a.tex' is used as both"));
    }

    #[test]
    fn test_empty_folder_clash_rejected() {
        let mut data = tex("2", "r", "data", "");
        data.format = "csv".to_string();
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "main.tex", ""))
            .with_file(data)
            .with_subfolder(FolderNode::folder("d", "data"));
        assert!(matches!(
            ProjectTree::new(root, None).plan(),
            Err(EngineError::InvalidProject(_))
        ));
    }

    #[test]
    fn test_mismatched_folder_id_rejected() {
        let root = FolderNode::root("r", "p").with_file(tex("1", "elsewhere", "main.tex", ""));
        assert!(matches!(
            ProjectTree::new(root, None).plan(),
            Err(EngineError::InvalidProject(_))
        ));
    }

    #[test]
    fn test_main_file_must_exist() {
        let root = FolderNode::root("r", "p").with_file(tex("1", "r", "paper.tex", ""));
        let err = ProjectTree::new(root, Some("main.tex".into()))
            .plan()
            .unwrap_err();
        assert!(matches!(err, EngineError::MainFileNotFound(_)));
    }

    #[test]
    fn test_ambiguous_main_file_resolved_by_path() {
        let root = FolderNode::root("r", "p")
            .with_subfolder(FolderNode::folder("a", "a").with_file(tex("1", "a", "main.tex", "")))
            .with_subfolder(FolderNode::folder("b", "b").with_file(tex("2", "b", "main.tex", "")));
        let tree = ProjectTree::new(root.clone(), Some("main.tex".into()));
        assert!(tree.plan().unwrap_err().to_string().contains("ambiguous"));

        let tree = ProjectTree::new(root, Some("b/main.tex".into()));
        assert_eq!(tree.plan().unwrap().main().node.id, "2");
    }

    #[test]
    fn test_main_file_fallbacks() {
        // Conventional names win over \documentclass
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "notes.tex", "\\documentclass{article}"))
            .with_file(tex("2", "r", "Thesis.tex", "body"));
        let tree = ProjectTree::new(root, None);
        assert_eq!(tree.plan().unwrap().main().node.id, "2");

        // Then the first file declaring a class
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "macros.tex", "\\newcommand{\\x}{y}"))
            .with_file(tex("2", "r", "report.tex", "\\documentclass{report}"));
        let tree = ProjectTree::new(root, None);
        assert_eq!(tree.plan().unwrap().main().node.id, "2");

        // Then the first .tex file
        let root = FolderNode::root("r", "p")
            .with_file(tex("1", "r", "refs.bib", "@book{x}"))
            .with_file(tex("2", "r", "a.tex", "a"))
            .with_file(tex("3", "r", "b.tex", "b"));
        let tree = ProjectTree::new(root, None);
        assert_eq!(tree.plan().unwrap().main().node.id, "2");
    }

    #[test]
    fn test_no_tex_file() {
        let root = FolderNode::root("r", "p").with_file(tex("1", "r", "refs.bib", ""));
        assert!(matches!(
            ProjectTree::new(root, None).plan(),
            Err(EngineError::MainFileNotFound(_))
        ));
    }

    #[test]
    fn test_source_precedence() {
        let mut file = FileNode::remote("1", "r", "a.png", "https://example.org/a.png");
        assert_eq!(file.source(), FileSource::Remote("https://example.org/a.png"));
        file.content = Some(String::new());
        assert_eq!(file.source(), FileSource::Remote("https://example.org/a.png"));
        file.content = Some("aGk=".to_string());
        assert_eq!(file.source(), FileSource::Inline("aGk="));
        assert!(file.is_binary());
    }

    #[test]
    fn test_deserialize_project_json() {
        let json = serde_json::json!({
            "root": {
                "id": "root",
                "name": "My Paper",
                "is_root": true,
                "files": [
                    {"id": "f1", "folder_id": "root", "name": "main.tex", "format": "tex",
                     "content": "\\documentclass{article}", "url": ""}
                ],
                "subfolders": []
            },
            "main_file": "main.tex"
        });
        let tree: ProjectTree = serde_json::from_value(json).unwrap();
        assert_eq!(tree.root.files[0].url.as_deref(), Some(""));
        assert!(tree.plan().is_ok());
    }
}
