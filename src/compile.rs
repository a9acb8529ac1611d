use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{LoaderError, Result};
use crate::key::{CLASS_SUFFIX, SOURCE_SUFFIX};

pub const JAVAC_ENV: &str = "CLASS_CACHE_JAVAC";
const CLASSPATH_ENV: &str = "CLASSPATH";

/// Turns a source file into a compiled class file next to it.
pub trait SourceCompiler: Send + Sync {
    /// Returns the path of the produced class file.
    fn compile(&self, source: &Path, extra_libs: &[PathBuf]) -> Result<PathBuf>;
}

/// `<dir>/<Name>.java`, or `dir` itself when it already names a source file.
pub fn source_path(dir: &Path, simple_name: &str) -> PathBuf {
    if dir.to_string_lossy().ends_with(SOURCE_SUFFIX) {
        return dir.to_path_buf();
    }
    dir.join(format!("{simple_name}{SOURCE_SUFFIX}"))
}

pub fn class_path_for(source: &Path) -> PathBuf {
    source.with_extension(CLASS_SUFFIX.trim_start_matches('.'))
}

#[derive(Debug, Clone)]
pub struct Javac {
    javac_bin: PathBuf,
    base_classpath: Vec<PathBuf>,
}

impl Javac {
    /// The base classpath is inherited from `CLASSPATH`, or `.` when unset.
    pub fn new(javac_bin: PathBuf) -> Self {
        let inherited = std::env::var_os(CLASSPATH_ENV)
            .map(|cp| std::env::split_paths(&cp).collect())
            .unwrap_or_default();
        Self {
            javac_bin,
            base_classpath: Vec::new(),
        }
        .with_base_classpath(inherited)
    }

    /// Entries placed ahead of the extra libraries on every compile.
    pub fn with_base_classpath(mut self, base: Vec<PathBuf>) -> Self {
        self.base_classpath = base
            .into_iter()
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
        if self.base_classpath.is_empty() {
            self.base_classpath.push(PathBuf::from("."));
        }
        self
    }

    pub fn from_env() -> Self {
        let bin = std::env::var(JAVAC_ENV).unwrap_or_else(|_| "javac".to_string());
        Self::new(PathBuf::from(bin))
    }

    fn command(&self) -> Command {
        #[cfg(windows)]
        {
            let lower = self.javac_bin.to_string_lossy().to_ascii_lowercase();
            if lower.ends_with(".cmd") || lower.ends_with(".bat") {
                let mut cmd = Command::new("cmd");
                cmd.arg("/C").arg(&self.javac_bin);
                return cmd;
            }
        }
        Command::new(&self.javac_bin)
    }
}

impl SourceCompiler for Javac {
    fn compile(&self, source: &Path, extra_libs: &[PathBuf]) -> Result<PathBuf> {
        if !source.is_file() {
            return Err(LoaderError::Compilation(format!(
                "source file does not exist: {}",
                source.display()
            )));
        }

        let classpath = std::env::join_paths(self.base_classpath.iter().chain(extra_libs))
            .map_err(|e| LoaderError::invalid(format!("invalid library path: {e}")))?;
        let mut cmd = self.command();
        cmd.arg("-classpath").arg(classpath).arg(source);

        let output = cmd.output().map_err(|e| {
            LoaderError::Compilation(format!(
                "failed to execute {} (ensure a JDK is installed): {e}",
                self.javac_bin.display()
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::error!(source = %source.display(), diagnostics = %stderr.trim(), "compilation failed");
            return Err(LoaderError::Compilation(stderr.trim().to_string()));
        }

        let class_file = class_path_for(source);
        if !class_file.is_file() {
            return Err(LoaderError::Compilation(format!(
                "compiler produced no class file at {}",
                class_file.display()
            )));
        }
        Ok(class_file)
    }
}
