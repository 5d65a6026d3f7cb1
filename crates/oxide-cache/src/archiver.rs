//! Cache archive packing and extraction.

use globset::{GlobBuilder, GlobMatcher};
use oxide_core::{CompressionMethod, Error, Result};
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// First component of archive names that live under the home directory.
const HOME_ANCHOR: &str = "~";

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// Packs cache paths into a single archive file and back.
pub trait Archiver: Send + Sync {
    /// Create `archive_dir/<archive name>` from `paths`.
    ///
    /// Fails with [`Error::NoCachePaths`] when none of the paths resolve, so
    /// an empty archive is never produced.
    fn pack(
        &self,
        archive_dir: &Path,
        paths: &[PathBuf],
        compression: CompressionMethod,
    ) -> Result<PathBuf>;

    /// Extract an archive into the workspace it was packed from.
    fn unpack(&self, archive: &Path, compression: CompressionMethod) -> Result<()>;

    /// Entry names in archive order.
    fn list_contents(&self, archive: &Path, compression: CompressionMethod) -> Result<Vec<String>>;
}

/// Tar archiver with zstd or gzip compression.
///
/// Cache paths may start with `~` and may contain glob patterns. Entries are
/// stored relative to the workspace, or under a `~` anchor when they live in
/// the home directory, so an archive restores to the same layout on any
/// runner.
#[derive(Debug, Clone)]
pub struct TarArchiver {
    workspace: PathBuf,
    home: Option<PathBuf>,
}

impl TarArchiver {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            home: directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf()),
        }
    }

    /// Override the home directory `~` expands to.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    fn expand(&self, path: &Path) -> Option<PathBuf> {
        match path.strip_prefix(HOME_ANCHOR) {
            Ok(rest) => match &self.home {
                Some(home) => Some(home.join(rest)),
                None => {
                    warn!(path = %path.display(), "No home directory to expand, skipping");
                    None
                }
            },
            Err(_) if path.is_absolute() => Some(path.to_path_buf()),
            Err(_) => Some(self.workspace.join(path)),
        }
    }

    /// Existing filesystem paths a requested cache path stands for.
    fn resolve(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let Some(expanded) = self.expand(path) else {
            return Ok(Vec::new());
        };
        if !expanded.to_string_lossy().contains(GLOB_CHARS) {
            return Ok(if expanded.symlink_metadata().is_ok() {
                vec![expanded]
            } else {
                Vec::new()
            });
        }

        // Walk from the longest literal prefix and match the rest.
        let mut base = PathBuf::new();
        let mut pattern = Vec::new();
        for component in expanded.components() {
            let text = component.as_os_str().to_string_lossy();
            if pattern.is_empty() && !text.contains(GLOB_CHARS) {
                base.push(component);
            } else {
                pattern.push(text.into_owned());
            }
        }
        let matcher = glob_matcher(&pattern.join("/"))?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }

        let mut matched = Vec::new();
        let mut walker = WalkDir::new(&base)
            .follow_links(false)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();
        while let Some(entry) = walker.next() {
            let entry = entry.map_err(|e| {
                Error::Archive(format!("Failed to walk {}: {}", base.display(), e))
            })?;
            let Ok(relative) = entry.path().strip_prefix(&base) else {
                continue;
            };
            if matcher.is_match(relative) {
                if entry.file_type().is_dir() {
                    walker.skip_current_dir();
                }
                matched.push(entry.into_path());
            }
        }
        Ok(matched)
    }

    /// Name a resolved path is stored under.
    fn archive_name(&self, path: &Path) -> Option<PathBuf> {
        if let Ok(rel) = path.strip_prefix(&self.workspace) {
            return Some(if rel.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                rel.to_path_buf()
            });
        }
        if let Some(home) = &self.home {
            if let Ok(rel) = path.strip_prefix(home) {
                return Some(Path::new(HOME_ANCHOR).join(rel));
            }
        }
        warn!(path = %path.display(), "Path is outside the workspace and home directory, skipping");
        None
    }

    /// Resolve every requested path into `(location, archive name)` pairs,
    /// dropping paths already covered by an earlier one.
    fn entries(&self, paths: &[PathBuf]) -> Result<Vec<(PathBuf, PathBuf)>> {
        let mut entries: Vec<(PathBuf, PathBuf)> = Vec::new();
        for path in paths {
            let resolved = self.resolve(path)?;
            if resolved.is_empty() {
                warn!(path = %path.display(), "Cache path does not exist, skipping");
            }
            for location in resolved {
                if entries.iter().any(|(kept, _)| location.starts_with(kept)) {
                    continue;
                }
                if let Some(name) = self.archive_name(&location) {
                    entries.push((location, name));
                }
            }
        }
        Ok(entries)
    }

    /// Where an archive entry lands on this runner.
    fn destination(&self, name: &Path) -> Result<PathBuf> {
        let (root, rest) = match name.strip_prefix(HOME_ANCHOR) {
            Ok(rest) => {
                let home = self.home.as_ref().ok_or_else(|| {
                    Error::Archive(format!("No home directory for {}", name.display()))
                })?;
                (home, rest)
            }
            Err(_) => (&self.workspace, name),
        };
        if rest
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Archive(format!(
                "Refusing to unpack entry outside its root: {}",
                name.display()
            )));
        }
        Ok(root.join(rest))
    }

    fn append_entries<W: Write>(&self, writer: W, entries: &[(PathBuf, PathBuf)]) -> Result<()> {
        let mut builder = tar::Builder::new(writer);
        builder.follow_symlinks(false);

        for (location, name) in entries {
            if location.is_dir() {
                builder
                    .append_dir_all(name, location)
                    .map_err(|e| Error::Archive(format!("Failed to pack dir: {}", e)))?;
            } else {
                builder
                    .append_path_with_name(location, name)
                    .map_err(|e| Error::Archive(format!("Failed to pack file: {}", e)))?;
            }
            debug!(path = %name.display(), "Packed cache path");
        }

        builder
            .finish()
            .map_err(|e| Error::Archive(format!("Failed to finish tar: {}", e)))
    }
}

fn glob_matcher(pattern: &str) -> Result<GlobMatcher> {
    Ok(GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| Error::Archive(format!("Invalid glob pattern {}: {}", pattern, e)))?
        .compile_matcher())
}

fn open_decoder(archive: &Path, compression: CompressionMethod) -> Result<Box<dyn Read>> {
    let file = File::open(archive)?;
    Ok(match compression {
        CompressionMethod::Zstd => Box::new(
            zstd::stream::read::Decoder::new(file)
                .map_err(|e| Error::Archive(format!("Failed to create decoder: {}", e)))?,
        ),
        CompressionMethod::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
    })
}

impl Archiver for TarArchiver {
    fn pack(
        &self,
        archive_dir: &Path,
        paths: &[PathBuf],
        compression: CompressionMethod,
    ) -> Result<PathBuf> {
        let entries = self.entries(paths)?;
        if entries.is_empty() {
            return Err(Error::NoCachePaths(
                paths.iter().map(|p| p.display().to_string()).collect(),
            ));
        }

        let archive_path = archive_dir.join(compression.archive_name());
        let writer = BufWriter::new(File::create(&archive_path)?);

        match compression {
            CompressionMethod::Zstd => {
                let mut encoder = zstd::stream::write::Encoder::new(writer, 3)
                    .map_err(|e| Error::Archive(format!("Zstd init failed: {}", e)))?;
                self.append_entries(&mut encoder, &entries)?;
                encoder
                    .finish()
                    .map_err(|e| Error::Archive(format!("Zstd finish failed: {}", e)))?
                    .flush()?;
            }
            CompressionMethod::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(writer, flate2::Compression::default());
                self.append_entries(&mut encoder, &entries)?;
                encoder
                    .finish()
                    .map_err(|e| Error::Archive(format!("Gzip finish failed: {}", e)))?
                    .flush()?;
            }
        }

        Ok(archive_path)
    }

    fn unpack(&self, archive: &Path, compression: CompressionMethod) -> Result<()> {
        std::fs::create_dir_all(&self.workspace)?;
        let mut tar = tar::Archive::new(open_decoder(archive, compression)?);
        tar.set_preserve_permissions(true);
        tar.set_overwrite(true);

        let entries = tar
            .entries()
            .map_err(|e| Error::Archive(format!("Failed to read archive: {}", e)))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| Error::Archive(format!("Corrupt entry: {}", e)))?;
            let name = entry
                .path()
                .map_err(|e| Error::Archive(format!("Invalid entry path: {}", e)))?
                .into_owned();
            let dest = self.destination(&name)?;
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            entry
                .unpack(&dest)
                .map_err(|e| Error::Archive(format!("Failed to unpack {}: {}", name.display(), e)))?;
        }
        Ok(())
    }

    fn list_contents(&self, archive: &Path, compression: CompressionMethod) -> Result<Vec<String>> {
        let mut tar = tar::Archive::new(open_decoder(archive, compression)?);
        let entries = tar
            .entries()
            .map_err(|e| Error::Archive(format!("Failed to read archive: {}", e)))?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Archive(format!("Corrupt entry: {}", e)))?;
            let path = entry
                .path()
                .map_err(|e| Error::Archive(format!("Invalid entry path: {}", e)))?;
            names.push(path.display().to_string());
        }
        Ok(names)
    }
}
