/*!
Resolution of the runnable binary for one mode of one benchmark, along with
its argument list and any fixture files that need to be staged around each
run.
*/

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{error::Error, format::definitions::Definition, format::mode::Mode};

/// The prefix of every binary produced from a RISC-V source binary.
const RV32: &'static str = "rv32";

/// The program used to run RISC-V binaries under emulation.
const EMULATOR: &'static str = "qemu-riscv32";

/// One runnable binary and everything needed to invoke it.
///
/// This is immutable once built. A new one is created for every mode of
/// every benchmark measured.
#[derive(Clone, Debug)]
pub struct ProgramVariant {
    /// The directory containing the binaries under test.
    pub dir: PathBuf,
    /// The architecture prefix of the native binary, e.g., `x86`.
    pub arch: String,
    pub mode: Mode,
    pub def: Definition,
    /// Where staged fixtures and per-run output go.
    ///
    /// Files in here are keyed only by binary name and are never cleaned up.
    /// Two concurrent runs of the same benchmark and mode will trample each
    /// other.
    pub scratch: PathBuf,
}

impl ProgramVariant {
    /// The file name of the binary for this variant.
    pub fn binary_name(&self) -> String {
        match self.mode {
            Mode::Native => format!("{}-{}", self.arch, self.def.name),
            Mode::Globals | Mode::Locals => format!(
                "{}-{}-{}-{}",
                RV32, self.arch, self.def.name, self.mode
            ),
            Mode::Emulated => format!("{}-{}", RV32, self.def.name),
        }
    }

    /// The value substituted for `{prefix}` in argument templates. It is
    /// everything in the binary name before the benchmark name.
    pub fn prefix(&self) -> String {
        match self.mode {
            Mode::Native => format!("{}-", self.arch),
            Mode::Globals | Mode::Locals => {
                format!("{}-{}-", RV32, self.arch)
            }
            Mode::Emulated => format!("{}-", RV32),
        }
    }

    /// The value substituted for `{mode}` in argument templates.
    pub fn mode_suffix(&self) -> String {
        if self.mode.is_translated() {
            format!("-{}", self.mode)
        } else {
            String::new()
        }
    }

    /// Returns the path to this variant's binary, or a `BinaryNotFound`
    /// error if it doesn't exist.
    pub fn path(&self) -> anyhow::Result<PathBuf> {
        let path = self.dir.join(self.binary_name());
        if !path.is_file() {
            return Err(anyhow::Error::new(Error::BinaryNotFound(path)));
        }
        Ok(path)
    }

    /// The full argument list given to the binary, with placeholders
    /// substituted and staged files swapped for their scratch copies.
    pub fn argv(&self) -> Vec<String> {
        let staged = self.staged_files();
        self.def
            .args
            .iter()
            .map(|arg| {
                let arg = self.substitute(arg);
                let found = staged
                    .iter()
                    .find(|(orig, _)| orig.as_path() == Path::new(&arg));
                match found {
                    None => arg,
                    Some((_, scratch)) => scratch.display().to_string(),
                }
            })
            .collect()
    }

    /// The program and its arguments as they should be executed. Emulated
    /// binaries are prefixed with the emulator.
    pub fn invocation(&self) -> anyhow::Result<Vec<String>> {
        let path = self.path()?;
        let Some(path) = path.to_str() else {
            anyhow::bail!("binary path {} is not UTF-8", path.display());
        };
        let mut inv = vec![];
        if self.mode == Mode::Emulated {
            inv.push(EMULATOR.to_string());
        }
        inv.push(path.to_string());
        inv.extend(self.argv());
        Ok(inv)
    }

    /// The file that a run's standard output is written to.
    pub fn output_path(&self, i: usize) -> PathBuf {
        self.scratch.join(format!("{}{}.out", self.binary_name(), i))
    }

    /// Any other per-variant scratch file, e.g., profiler data.
    pub fn scratch_file(&self, ext: &str) -> PathBuf {
        self.scratch.join(format!("{}.{}", self.binary_name(), ext))
    }

    /// Copies every staged input into the scratch directory.
    pub fn stage_in(&self) -> anyhow::Result<()> {
        for path in self.def.stage_in.iter() {
            let src = PathBuf::from(self.substitute_path(path));
            let dst = self.scratch_path(&src);
            log::debug!("staging {} -> {}", src.display(), dst.display());
            std::fs::copy(&src, &dst).with_context(|| {
                format!(
                    "failed to stage {} into {}",
                    src.display(),
                    dst.display()
                )
            })?;
        }
        Ok(())
    }

    /// Copies every staged output from the scratch directory back to where
    /// the benchmark expects it.
    pub fn stage_out(&self) -> anyhow::Result<()> {
        for path in self.def.stage_out.iter() {
            let dst = PathBuf::from(self.substitute_path(path));
            let src = self.scratch_path(&dst);
            log::debug!("unstaging {} -> {}", src.display(), dst.display());
            std::fs::copy(&src, &dst).with_context(|| {
                format!(
                    "failed to copy staged output {} to {}",
                    src.display(),
                    dst.display()
                )
            })?;
        }
        Ok(())
    }

    /// Substitutes `{prefix}` and `{mode}` in the given template.
    fn substitute(&self, template: &str) -> String {
        template
            .replace("{prefix}", &self.prefix())
            .replace("{mode}", &self.mode_suffix())
    }

    fn substitute_path(&self, path: &Path) -> String {
        self.substitute(&path.to_string_lossy())
    }

    /// Pairs of (original, scratch copy) for every staged file.
    fn staged_files(&self) -> Vec<(PathBuf, PathBuf)> {
        self.def
            .stage_in
            .iter()
            .chain(self.def.stage_out.iter())
            .map(|p| {
                let orig = PathBuf::from(self.substitute_path(p));
                let scratch = self.scratch_path(&orig);
                (orig, scratch)
            })
            .collect()
    }

    fn scratch_path(&self, file: &Path) -> PathBuf {
        let base = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.scratch.join(format!("{}.{}", self.binary_name(), base))
    }
}

/// Escapes an argument that would otherwise be mistaken for a flag when
/// given to `--args`.
pub fn escape_arg(arg: &str) -> String {
    if arg.starts_with('-') {
        format!(" {}", arg)
    } else {
        arg.to_string()
    }
}

/// The inverse of `escape_arg`.
pub fn unescape_arg(arg: &str) -> String {
    arg.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn variant(mode: Mode) -> ProgramVariant {
        ProgramVariant {
            dir: PathBuf::from("/opt/mibench"),
            arch: "x86".to_string(),
            mode,
            def: Definition {
                name: "rijndael".to_string(),
                args: vec![
                    "input_large.asc".to_string(),
                    "{prefix}output_large{mode}.enc".to_string(),
                    "e".to_string(),
                ],
                ..Definition::default()
            },
            scratch: PathBuf::from("/tmp"),
        }
    }

    #[test]
    fn binary_names() {
        assert_eq!(variant(Mode::Native).binary_name(), "x86-rijndael");
        assert_eq!(
            variant(Mode::Globals).binary_name(),
            "rv32-x86-rijndael-globals"
        );
        assert_eq!(
            variant(Mode::Locals).binary_name(),
            "rv32-x86-rijndael-locals"
        );
        assert_eq!(variant(Mode::Emulated).binary_name(), "rv32-rijndael");
    }

    #[test]
    fn placeholders() {
        assert_eq!(
            variant(Mode::Native).argv()[1],
            "x86-output_large.enc"
        );
        assert_eq!(
            variant(Mode::Locals).argv()[1],
            "rv32-x86-output_large-locals.enc"
        );
        assert_eq!(
            variant(Mode::Emulated).argv()[1],
            "rv32-output_large.enc"
        );
    }

    #[test]
    fn missing_binary() {
        let err = variant(Mode::Native).path().unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::BinaryNotFound(path)) => {
                assert_eq!(
                    path.as_path(),
                    Path::new("/opt/mibench/x86-rijndael")
                );
            }
            _ => panic!("unexpected error: {:#}", err),
        }
    }

    #[test]
    fn staged_args_point_at_scratch() {
        let mut v = variant(Mode::Globals);
        v.def.stage_in = vec![PathBuf::from("input_large.asc")];
        v.def.stage_out =
            vec![PathBuf::from("{prefix}output_large{mode}.enc")];
        let argv = v.argv();
        assert_eq!(
            argv[0],
            "/tmp/rv32-x86-rijndael-globals.input_large.asc"
        );
        assert_eq!(
            argv[1],
            "/tmp/rv32-x86-rijndael-globals.\
             rv32-x86-output_large-globals.enc"
        );
        assert_eq!(argv[2], "e");
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_arg("-s"), " -s");
        assert_eq!(escape_arg("input.pgm"), "input.pgm");
        assert_eq!(unescape_arg(&escape_arg("-s")), "-s");
    }
}
