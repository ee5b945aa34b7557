//! Where each stage writes its files.

use director_core::{id::Id, subject::Fuzz};
use std::{
    fs::create_dir_all,
    io,
    path::{Path, PathBuf},
};

/// Output layout under one root directory:
///
/// ```text
/// <root>/fuzz/<name>.litmus, <root>/fuzz/<name>.trace
/// <root>/lift/<arch>/<name>/...
/// <root>/compile/<compiler>/<name>/{a.out,compile.log}
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pathset {
    root: PathBuf,
}

impl Pathset {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn fuzz_dir(&self) -> PathBuf {
        self.root.join("fuzz")
    }

    pub fn fuzz_paths(&self, name: &str) -> Fuzz {
        let dir = self.fuzz_dir();
        Fuzz {
            litmus: dir.join(format!("{}.litmus", name)),
            trace: dir.join(format!("{}.trace", name)),
        }
    }

    pub fn harness_dir(&self, arch: &Id, name: &str) -> PathBuf {
        self.root.join("lift").join(arch.to_string()).join(name)
    }

    fn compile_dir(&self, compiler: &Id, name: &str) -> PathBuf {
        self.root.join("compile").join(compiler.to_string()).join(name)
    }

    pub fn bin_path(&self, compiler: &Id, name: &str) -> PathBuf {
        self.compile_dir(compiler, name).join("a.out")
    }

    pub fn log_path(&self, compiler: &Id, name: &str) -> PathBuf {
        self.compile_dir(compiler, name).join("compile.log")
    }
}

/// `mkdir -p` on the parent of `path`.
pub fn ensure_parent(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => create_dir_all(p),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout() {
        let p = Pathset::new("/out/localhost");
        let gcc: Id = "gcc.O3".parse().unwrap();
        let arch: Id = "x86.64".parse().unwrap();
        assert_eq!(
            p.fuzz_paths("sb_1").litmus,
            PathBuf::from("/out/localhost/fuzz/sb_1.litmus")
        );
        assert_eq!(
            p.harness_dir(&arch, "sb"),
            PathBuf::from("/out/localhost/lift/x86.64/sb")
        );
        assert_eq!(
            p.log_path(&gcc, "sb"),
            PathBuf::from("/out/localhost/compile/gcc.O3/sb/compile.log")
        );
    }

    #[test]
    fn ensure_parent_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let p = Pathset::new(dir.path());
        let bin = p.bin_path(&"clang".parse().unwrap(), "mp");
        ensure_parent(&bin).unwrap();
        ensure_parent(&bin).unwrap();
        assert!(bin.parent().unwrap().is_dir());
    }
}
