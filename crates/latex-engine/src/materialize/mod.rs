//! Project materialization
//!
//! Writes a validated project into a freshly created, uniquely named
//! scratch directory. The directory is owned by a [`Workspace`] and is
//! removed when the workspace is closed or dropped, so every exit path of
//! a request (including panics and cancellation) releases it.

pub mod fetch;

use std::path::{Path, PathBuf};

use base64::Engine as _;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::project::{FileKind, FileSource, PlannedFile, ProjectTree};
pub use fetch::{AssetFetcher, FetchError, HttpFetcher};

const SCRATCH_PREFIX: &str = "latex-build-";

/// A file written into a workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    /// Path relative to the workspace root
    pub relative_path: PathBuf,
    pub kind: FileKind,
    /// Decoded from base64; never read as TeX or Lua source
    pub binary: bool,
}

impl MaterializedFile {
    /// Whether this is a bibliography database (`.bib`)
    pub fn is_bibliography_database(&self) -> bool {
        self.relative_path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("bib"))
    }
}

/// An exclusively owned scratch directory holding one materialized project
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
    files: Vec<MaterializedFile>,
}

impl Workspace {
    /// Create an empty workspace under `scratch_root` (system temp dir if `None`)
    pub fn create(scratch_root: Option<&Path>) -> Result<Self, EngineError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SCRATCH_PREFIX);
        let dir = match scratch_root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!(root = %dir.path().display(), "Workspace created");
        Ok(Self {
            dir,
            files: Vec::new(),
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn files(&self) -> &[MaterializedFile] {
        &self.files
    }

    /// Absolute path of a workspace-relative path
    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.dir.path().join(relative)
    }

    pub fn has_bibliography_database(&self) -> bool {
        self.files.iter().any(MaterializedFile::is_bibliography_database)
    }

    /// Remove the directory tree, reporting failure instead of ignoring it
    pub fn close(self) -> Result<(), EngineError> {
        let root = self.dir.path().to_path_buf();
        self.dir.close()?;
        debug!(root = %root.display(), "Workspace removed");
        Ok(())
    }

    async fn write(&mut self, file: &PlannedFile<'_>, bytes: &[u8]) -> Result<(), EngineError> {
        let target = self.resolve(&file.relative_path);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        self.files.push(MaterializedFile {
            relative_path: file.relative_path.clone(),
            kind: file.kind,
            binary: file.node.is_binary(),
        });
        Ok(())
    }
}

/// A materialized project ready for compilation
#[derive(Debug)]
pub struct CompilationRequest {
    pub workspace: Workspace,
    /// Main file, relative to the workspace root
    pub main_file: PathBuf,
}

impl CompilationRequest {
    /// Directory the compiler runs in (the main file's folder)
    pub fn working_dir(&self) -> PathBuf {
        self.workspace
            .resolve(self.main_file.parent().unwrap_or_else(|| Path::new("")))
    }

    /// Main file name as passed to the compiler
    pub fn main_file_name(&self) -> String {
        self.main_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Job name: the main file name without its extension
    pub fn job_name(&self) -> String {
        self.main_file
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Where the compiler writes the PDF
    pub fn artifact_path(&self) -> PathBuf {
        self.working_dir().join(format!("{}.pdf", self.job_name()))
    }
}

/// Materialize a project into a new workspace
///
/// The whole tree is validated before the workspace is created. If writing
/// or fetching fails midway, the partially written workspace is dropped
/// (and removed) before the error is returned.
pub async fn materialize(
    tree: &ProjectTree,
    config: &EngineConfig,
    fetcher: &dyn AssetFetcher,
) -> Result<CompilationRequest, EngineError> {
    let plan = tree.plan()?;
    let mut workspace = Workspace::create(config.scratch_root.as_deref())?;

    for file in &plan.files {
        let bytes = load_bytes(file, config, fetcher).await?;
        workspace.write(file, &bytes).await?;
        debug!(path = %file.relative_path.display(), bytes = bytes.len(), "Created file");
    }

    let main_file = plan.main().relative_path.clone();
    info!(
        files = workspace.files().len(),
        main = %main_file.display(),
        "Project materialized"
    );

    Ok(CompilationRequest {
        workspace,
        main_file,
    })
}

async fn load_bytes(
    file: &PlannedFile<'_>,
    config: &EngineConfig,
    fetcher: &dyn AssetFetcher,
) -> Result<Vec<u8>, EngineError> {
    match file.node.source() {
        FileSource::Inline(content) if file.node.is_binary() => {
            base64::engine::general_purpose::STANDARD
                .decode(content.trim())
                .map_err(|e| EngineError::AssetEncoding(file.node.name.clone(), e.to_string()))
        }
        FileSource::Inline(content) => Ok(content.as_bytes().to_vec()),
        FileSource::Remote(url) => {
            info!(name = %file.node.name, url, "Fetching remote asset");
            fetcher.fetch(url).await.map_err(|err| {
                warn!(name = %file.node.name, error = %err, "Asset fetch failed");
                match err {
                    FetchError::TimedOut => EngineError::Timeout {
                        what: format!("fetching '{}'", file.node.name),
                        after: config.fetch_timeout(),
                    },
                    other => EngineError::AssetFetch {
                        name: file.node.name.clone(),
                        reason: other.to_string(),
                    },
                }
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{FileNode, FolderNode};
    use crate::testing::StaticFetcher;

    fn config_in(dir: &Path) -> EngineConfig {
        EngineConfig {
            scratch_root: Some(dir.to_path_buf()),
            ..EngineConfig::default()
        }
    }

    fn entries(dir: &Path) -> usize {
        std::fs::read_dir(dir).unwrap().count()
    }

    #[tokio::test]
    async fn test_materialize_writes_tree() {
        let scratch = tempfile::tempdir().unwrap();
        let root = FolderNode::root("r", "paper")
            .with_file(FileNode::inline("1", "r", "main.tex", "\\input{sections/a}"))
            .with_subfolder(
                FolderNode::folder("s", "sections").with_file(FileNode::inline("2", "s", "a.tex", "A")),
            )
            .with_file(FileNode::inline("3", "r", "dot.png", "iVBORw=="));
        let tree = ProjectTree::new(root, None);

        let request = materialize(&tree, &config_in(scratch.path()), &StaticFetcher::new())
            .await
            .unwrap();

        let ws = &request.workspace;
        assert!(ws.root().starts_with(scratch.path()));
        assert_eq!(
            std::fs::read_to_string(ws.resolve(Path::new("sections/a.tex"))).unwrap(),
            "A"
        );
        assert_eq!(
            std::fs::read(ws.resolve(Path::new("dot.png"))).unwrap(),
            vec![0x89, 0x50, 0x4E, 0x47]
        );
        assert_eq!(request.main_file, PathBuf::from("main.tex"));
        assert_eq!(request.job_name(), "main");
        assert_eq!(request.artifact_path(), ws.root().join("main.pdf"));
    }

    #[tokio::test]
    async fn test_remote_asset_fetched() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new().with("https://cdn.test/logo.png", b"PNGDATA".to_vec());
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_file(FileNode::remote("2", "r", "logo.png", "https://cdn.test/logo.png"));
        let tree = ProjectTree::new(root, None);

        let request = materialize(&tree, &config_in(scratch.path()), &fetcher)
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(request.workspace.resolve(Path::new("logo.png"))).unwrap(),
            b"PNGDATA"
        );
        assert_eq!(fetcher.requests(), vec!["https://cdn.test/logo.png".to_string()]);
    }

    #[tokio::test]
    async fn test_fetch_failure_names_file_and_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_file(FileNode::remote("2", "r", "missing.png", "https://cdn.test/404.png"));
        let tree = ProjectTree::new(root, None);

        let err = materialize(&tree, &config_in(scratch.path()), &StaticFetcher::new())
            .await
            .unwrap_err();
        assert!(matches!(&err, EngineError::AssetFetch { name, .. } if name == "missing.png"));
        assert_eq!(entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_fetch_timeout_maps_to_timeout() {
        let scratch = tempfile::tempdir().unwrap();
        let fetcher = StaticFetcher::new().with_error("https://slow.test/a.pdf", FetchError::TimedOut);
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_file(FileNode::remote("2", "r", "a.pdf", "https://slow.test/a.pdf"));
        let tree = ProjectTree::new(root, None);

        let err = materialize(&tree, &config_in(scratch.path()), &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_traversal_rejected_before_any_write() {
        let scratch = tempfile::tempdir().unwrap();
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_file(FileNode::inline("2", "r", "../escape.tex", "x"));
        let tree = ProjectTree::new(root, None);

        let err = materialize(&tree, &config_in(scratch.path()), &StaticFetcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnsafePath { .. }));
        assert_eq!(entries(scratch.path()), 0);
        assert!(!scratch.path().parent().unwrap().join("escape.tex").exists());
    }

    #[tokio::test]
    async fn test_bad_base64_rejected() {
        let scratch = tempfile::tempdir().unwrap();
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_file(FileNode::inline("2", "r", "img.jpg", "not base64!!"));
        let tree = ProjectTree::new(root, None);

        let err = materialize(&tree, &config_in(scratch.path()), &StaticFetcher::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::AssetEncoding(name, _) if name == "img.jpg"));
    }

    #[tokio::test]
    async fn test_concurrent_workspaces_are_distinct() {
        let scratch = tempfile::tempdir().unwrap();
        let a = Workspace::create(Some(scratch.path())).unwrap();
        let b = Workspace::create(Some(scratch.path())).unwrap();
        assert_ne!(a.root(), b.root());

        let root_a = a.root().to_path_buf();
        a.close().unwrap();
        assert!(!root_a.exists());
        drop(b);
        assert_eq!(entries(scratch.path()), 0);
    }

    #[tokio::test]
    async fn test_bibliography_database_detected() {
        let scratch = tempfile::tempdir().unwrap();
        let root = FolderNode::root("r", "p")
            .with_file(FileNode::inline("1", "r", "main.tex", "x"))
            .with_subfolder(
                FolderNode::folder("b", "bib").with_file(FileNode::inline("2", "b", "refs.BIB", "@x")),
            );
        let tree = ProjectTree::new(root, None);
        let request = materialize(&tree, &config_in(scratch.path()), &StaticFetcher::new())
            .await
            .unwrap();
        assert!(request.workspace.has_bibliography_database());
    }
}
