//! Locating runtime caches inside layered depots.
//!
//! A depot is a root directory that may hold compiled artifacts. Caches live
//! under a version-dependent subpath so incompatible installations never
//! share files.

use crate::error::{Error, Result};
use crate::llvm::llvm_version;
use log::debug;
use std::{
    env,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;

pub const DEPOT_PATH_ENV: &str = "KERNELC_DEPOT_PATH";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DepotPath {
    roots: Vec<PathBuf>,
}

/// Cache directories chosen for one process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedDepots {
    /// Where an existing cache was found; may be a lower layer.
    pub input: PathBuf,
    /// Cache directory inside the first configured root; the only one written to.
    pub output: PathBuf,
}

impl ResolvedDepots {
    pub fn needs_seeding(&self) -> bool {
        self.input != self.output && self.input.is_dir()
    }
}

impl DepotPath {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Roots from `KERNELC_DEPOT_PATH`, if set.
    pub fn from_env() -> Option<Self> {
        let value = env::var_os(DEPOT_PATH_ENV)?;
        let roots: Vec<PathBuf> = env::split_paths(&value)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        (!roots.is_empty()).then(|| Self::new(roots))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// `<root>/compiled/v<major>.<minor>/kernelc/llvm<N>`
    pub fn cache_dir(root: &Path) -> PathBuf {
        root.join("compiled")
            .join(format!(
                "v{}.{}",
                env!("CARGO_PKG_VERSION_MAJOR"),
                env!("CARGO_PKG_VERSION_MINOR")
            ))
            .join("kernelc")
            .join(format!("llvm{}", llvm_version()))
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        self.roots
            .first()
            .map(|root| Self::cache_dir(root))
            .ok_or_else(|| self.no_depot())
    }

    pub fn resolve(&self) -> Result<ResolvedDepots> {
        let existing: Vec<&PathBuf> = self.roots.iter().filter(|root| root.is_dir()).collect();
        let Some(first_existing) = existing.first() else {
            return Err(self.no_depot());
        };
        let input_root = existing
            .iter()
            .find(|root| Self::cache_dir(root).is_dir())
            .unwrap_or(first_existing);
        let resolved = ResolvedDepots {
            input: Self::cache_dir(input_root),
            output: self.output_dir()?,
        };
        debug!(
            "runtime cache input {} output {}",
            resolved.input.display(),
            resolved.output.display()
        );
        Ok(resolved)
    }

    fn no_depot(&self) -> Error {
        let configured = if self.roots.is_empty() {
            "nothing".to_string()
        } else {
            self.roots
                .iter()
                .map(|r| r.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };
        Error::NoDepot { configured }
    }
}

pub fn runtime_file(dir: &Path, slug: &str) -> PathBuf {
    dir.join(format!("runtime_{slug}.bc"))
}

/// Recursively copies `from` into `to`, keeping files already present in `to`.
///
/// Each file lands through a temporary file in its destination directory, so
/// an interrupted seed never leaves a partial cache entry behind.
pub fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to).map_err(|err| Error::io(to, err))?;
    let entries = fs::read_dir(from).map_err(|err| Error::io(from, err))?;
    for entry in entries {
        let entry = entry.map_err(|err| Error::io(from, err))?;
        let source = entry.path();
        let dest = to.join(entry.file_name());
        let file_type = entry.file_type().map_err(|err| Error::io(&source, err))?;
        if file_type.is_dir() {
            copy_tree(&source, &dest)?;
        } else if !dest.exists() {
            copy_file(&source, &dest)?;
        }
    }
    Ok(())
}

fn copy_file(source: &Path, dest: &Path) -> Result<()> {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let mut input = File::open(source).map_err(|err| Error::io(source, err))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|err| Error::io(dir, err))?;
    io::copy(&mut input, &mut tmp).map_err(|err| Error::io(source, err))?;
    match tmp.persist_noclobber(dest) {
        Ok(_) => {
            debug!("seeded {}", dest.display());
            Ok(())
        }
        // Another process seeded it first.
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        Err(err) => Err(Error::io(dest, err.error)),
    }
}
