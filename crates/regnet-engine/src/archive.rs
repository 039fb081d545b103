//! In-memory tar archives.
//!
//! Two shapes are produced here: small file bundles uploaded into running
//! sandboxes, and image build contexts assembled from a source tree.

use crate::error::Result;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

/// Mode applied to every bundled file.
const FILE_MODE: u32 = 0o644;

/// Build a tar archive from `relative path -> contents`.
///
/// Entries are written in path order so identical inputs produce identical
/// archives.
pub fn bundle<P, C>(files: &BTreeMap<P, C>) -> Result<Bytes>
where
    P: AsRef<str>,
    C: AsRef<[u8]>,
{
    let mut builder = tar::Builder::new(Vec::new());
    for (path, contents) in files {
        append_file(&mut builder, path.as_ref(), contents.as_ref())?;
    }
    Ok(Bytes::from(builder.into_inner()?))
}

fn append_file(builder: &mut tar::Builder<Vec<u8>>, path: &str, contents: &[u8]) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(FILE_MODE);
    header.set_cksum();
    builder.append_data(&mut header, path, contents)?;
    Ok(())
}

/// Assembles an image build context from a source tree.
///
/// Skipped while walking the tree:
/// - dotfiles and dot-directories (`.dockerignore` is kept)
/// - build objects (`*.o`, `*.a`)
///
/// Extra in-memory files (a rendered Dockerfile, payloads that live outside
/// the tree) are appended after the walk and take precedence over tree files
/// at the same path.
#[derive(Debug, Default)]
pub struct BuildContext {
    extra: BTreeMap<String, Vec<u8>>,
}

impl BuildContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an in-memory file at `path` relative to the context root.
    pub fn file(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.extra.insert(path.into(), contents.into());
        self
    }

    /// Walk `root` and produce the context archive.
    pub fn archive(&self, root: &Path) -> Result<Bytes> {
        let mut builder = tar::Builder::new(Vec::new());
        builder.follow_symlinks(false);

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_excluded(entry));

        let mut files = 0usize;
        for entry in walker {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() && !entry.file_type().is_symlink() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(root) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if self.extra.contains_key(&relative) {
                continue;
            }
            builder.append_path_with_name(entry.path(), &relative)?;
            files += 1;
        }

        for (path, contents) in &self.extra {
            append_file(&mut builder, path, contents)?;
        }

        let bytes = builder.into_inner()?;
        tracing::debug!(
            root = %root.display(),
            files,
            extra = self.extra.len(),
            size_bytes = bytes.len(),
            "Build context assembled"
        );
        Ok(Bytes::from(bytes))
    }
}

fn is_excluded(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return name != ".dockerignore";
    }
    entry.file_type().is_file() && (name.ends_with(".o") || name.ends_with(".a"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn entries(archive: &[u8]) -> BTreeMap<String, (u32, String)> {
        let mut out = BTreeMap::new();
        let mut reader = tar::Archive::new(archive);
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mode = entry.header().mode().unwrap();
            let mut contents = String::new();
            entry.read_to_string(&mut contents).unwrap();
            out.insert(path, (mode, contents));
        }
        out
    }

    #[test]
    fn test_bundle_paths_and_mode() {
        let mut files = BTreeMap::new();
        files.insert("servicenode.conf", "sn1 1.2.3.4:41476 key tx 0\n");
        files.insert("xbridge.conf", "[Main]\n");

        let archive = bundle(&files).unwrap();
        let entries = entries(&archive);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries["xbridge.conf"], (0o644, "[Main]\n".to_owned()));
        assert_eq!(entries["servicenode.conf"].0, 0o644);
    }

    #[test]
    fn test_bundle_empty() {
        let files: BTreeMap<String, Vec<u8>> = BTreeMap::new();
        let archive = bundle(&files).unwrap();
        assert!(entries(&archive).is_empty());
    }

    #[test]
    fn test_build_context_exclusions() {
        let root = std::env::temp_dir().join(format!("regnet-ctx-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join("src/main.cpp"), "int main() {}").unwrap();
        std::fs::write(root.join("src/main.o"), "obj").unwrap();
        std::fs::write(root.join("src/libx.a"), "lib").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref").unwrap();
        std::fs::write(root.join(".env"), "secret").unwrap();
        std::fs::write(root.join(".dockerignore"), "*.log").unwrap();

        let archive = BuildContext::new()
            .file("Dockerfile", "FROM scratch\n")
            .file("wallet.dat", vec![1u8, 2, 3])
            .archive(&root)
            .unwrap();
        let names: Vec<String> = entries(&archive).into_keys().collect();

        assert!(names.contains(&"src/main.cpp".to_owned()));
        assert!(names.contains(&".dockerignore".to_owned()));
        assert!(names.contains(&"Dockerfile".to_owned()));
        assert!(names.contains(&"wallet.dat".to_owned()));
        assert!(!names.iter().any(|n| n.starts_with(".git")));
        assert!(!names.contains(&".env".to_owned()));
        assert!(!names.iter().any(|n| n.ends_with(".o") || n.ends_with(".a")));

        std::fs::remove_dir_all(&root).unwrap();
    }
}
