/*!
Benchmark definitions, either given piecemeal on the command line or loaded
in bulk from TOML files.

A definition file looks like this:

```toml
[[bench]]
name = "rijndael"
id = "rijndael-encode"
args = ["input_large.asc", "{prefix}output_large{mode}.enc", "e", "1234"]
stage-in = ["input_large.asc"]

[[bench]]
name = "patricia"
args = ["large.udp"]
exp-rc = 1
```
*/

use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::{args::Filter, variant::escape_arg};

/// A single benchmark. Every mode measured for it shares this definition.
#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct Definition {
    /// The benchmark name, as it appears in binary names.
    pub name: String,
    /// The name of the row recorded in the store. Defaults to `name`.
    #[serde(default)]
    pub id: Option<String>,
    /// The argument template. `{prefix}` and `{mode}` are substituted per
    /// mode.
    #[serde(default)]
    pub args: Vec<String>,
    /// A file to redirect to standard input.
    #[serde(default)]
    pub stdin: Option<PathBuf>,
    /// The exit code every run must have.
    #[serde(default)]
    pub exp_rc: i32,
    /// Fixed-name input files to copy into scratch space before each run.
    #[serde(default)]
    pub stage_in: Vec<PathBuf>,
    /// Fixed-name output files to copy out of scratch space after each run.
    #[serde(default)]
    pub stage_out: Vec<PathBuf>,
}

impl Definition {
    /// The name recorded in the store for this benchmark.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }

    /// Renders the `measure` command that would run just this benchmark.
    pub fn measure_command(&self, bin_dir: &Path) -> String {
        let mut cmd = format!(
            "sbtbench measure {} {}",
            bin_dir.display(),
            self.name
        );
        if self.id() != self.name {
            cmd.push_str(&format!(" --id {}", self.id()));
        }
        if let Some(ref stdin) = self.stdin {
            cmd.push_str(&format!(" --stdin {}", stdin.display()));
        }
        if self.exp_rc != 0 {
            cmd.push_str(&format!(" --exp-rc {}", self.exp_rc));
        }
        for p in self.stage_in.iter() {
            cmd.push_str(&format!(" --stage-in {}", p.display()));
        }
        for p in self.stage_out.iter() {
            cmd.push_str(&format!(" --stage-out {}", p.display()));
        }
        if !self.args.is_empty() {
            cmd.push_str(" --args");
            for arg in self.args.iter() {
                cmd.push_str(&format!(" '{}'", escape_arg(arg)));
            }
        }
        cmd
    }

    fn validate(&self) -> anyhow::Result<()> {
        let re = regex!(r"^[-A-Za-z0-9_]+$");
        anyhow::ensure!(
            re.is_match(&self.name),
            "benchmark name '{}' must match '{}'",
            self.name,
            re.as_str(),
        );
        anyhow::ensure!(
            re.is_match(self.id()),
            "benchmark id '{}' must match '{}'",
            self.id(),
            re.as_str(),
        );
        Ok(())
    }

    /// Makes every relative file path relative to the given directory
    /// instead.
    ///
    /// An argument spelled exactly like a staged file is moved along with
    /// it, so that it still names that file and gets redirected to scratch
    /// space.
    fn resolve(&mut self, dir: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = dir.join(&*p);
            }
        };
        for arg in self.args.iter_mut() {
            let staged = self
                .stage_in
                .iter()
                .chain(self.stage_out.iter())
                .any(|p| p.is_relative() && p.as_os_str() == arg.as_str());
            if staged {
                *arg = dir.join(&*arg).to_string_lossy().into_owned();
            }
        }
        if let Some(ref mut stdin) = self.stdin {
            fix(stdin);
        }
        self.stage_in.iter_mut().for_each(fix);
        self.stage_out.iter_mut().for_each(fix);
    }
}

/// A collection of definitions loaded from TOML.
#[derive(Clone, Debug, Default)]
pub struct Definitions {
    pub defs: Vec<Definition>,
}

impl Definitions {
    /// Loads every `*.toml` file under the given directory, in file name
    /// order, and keeps the definitions whose id passes the filter.
    pub fn from_dir<P: AsRef<Path>>(
        dir: P,
        filter: &Filter,
    ) -> anyhow::Result<Definitions> {
        let dir = dir.as_ref();
        let mut defs = Definitions::default();
        for result in walkdir::WalkDir::new(dir).sort_by_file_name() {
            let dent = result?;
            if !dent.file_type().is_file() {
                continue;
            }
            if dent.path().extension().map_or(true, |ext| ext != "toml") {
                continue;
            }
            defs.load_file(dent.path())?;
        }
        defs.finish(filter)?;
        Ok(defs)
    }

    /// Parses definitions from TOML data. Relative paths are resolved
    /// against `dir`.
    #[cfg(test)]
    pub fn from_slice(
        dir: &Path,
        data: &[u8],
        filter: &Filter,
    ) -> anyhow::Result<Definitions> {
        let mut defs = Definitions::default();
        defs.load_slice(dir, data)?;
        defs.finish(filter)?;
        Ok(defs)
    }

    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let data = std::fs::read(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let dir = path.parent().unwrap_or(Path::new("."));
        self.load_slice(dir, &data)
            .with_context(|| format!("error loading {}", path.display()))
    }

    fn load_slice(&mut self, dir: &Path, data: &[u8]) -> anyhow::Result<()> {
        #[derive(serde::Deserialize)]
        #[serde(deny_unknown_fields)]
        struct Wire {
            #[serde(rename = "bench", default)]
            definitions: Vec<Definition>,
        }

        let data = std::str::from_utf8(data)?;
        let wire: Wire =
            toml::from_str(data).context("error decoding TOML")?;
        for mut def in wire.definitions {
            def.validate()?;
            def.resolve(dir);
            self.defs.push(def);
        }
        Ok(())
    }

    /// Rejects duplicate ids and then applies the filter.
    fn finish(&mut self, filter: &Filter) -> anyhow::Result<()> {
        let mut seen = std::collections::BTreeSet::new();
        for def in self.defs.iter() {
            anyhow::ensure!(
                seen.insert(def.id().to_string()),
                "found duplicate benchmark id '{}'",
                def.id(),
            );
        }
        self.defs.retain(|d| {
            let keep = filter.include(d.id());
            if !keep {
                log::trace!("filtered out '{}'", d.id());
            }
            keep
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = r#"
[[bench]]
name = "rijndael"
id = "rijndael-encode"
args = ["input_large.asc", "{prefix}output_large{mode}.enc", "e"]
stage-in = ["input_large.asc"]

[[bench]]
name = "patricia"
args = ["/data/large.udp"]
stdin = "small.udp"
exp-rc = 1

[[bench]]
name = "susan"
id = "susan-edges"
args = ["input_large.pgm", "{prefix}out{mode}.pgm", "-e"]
"#;

    fn load(filter: &Filter) -> Definitions {
        Definitions::from_slice(Path::new("/bench"), RAW.as_bytes(), filter)
            .unwrap()
    }

    #[test]
    fn basic() {
        let defs = load(&Filter::default());
        assert_eq!(3, defs.defs.len());
        let expected = Definition {
            name: "patricia".to_string(),
            id: None,
            args: vec!["/data/large.udp".to_string()],
            stdin: Some(PathBuf::from("/bench/small.udp")),
            exp_rc: 1,
            stage_in: vec![],
            stage_out: vec![],
        };
        assert_eq!(expected, defs.defs[1]);
        assert_eq!("rijndael-encode", defs.defs[0].id());
        assert_eq!("patricia", defs.defs[1].id());
        assert_eq!(
            vec![PathBuf::from("/bench/input_large.asc")],
            defs.defs[0].stage_in
        );
    }

    #[test]
    fn staged_args_follow_their_files() {
        let raw = r#"
[[bench]]
name = "rijndael"
args = ["input_large.asc", "{prefix}out{mode}.enc", "e", "/abs.asc"]
stage-in = ["input_large.asc", "/abs.asc"]
stage-out = ["{prefix}out{mode}.enc"]
"#;
        let defs = Definitions::from_slice(
            Path::new("/bench"),
            raw.as_bytes(),
            &Filter::default(),
        )
        .unwrap();
        let def = &defs.defs[0];
        assert_eq!(
            def.args,
            vec![
                "/bench/input_large.asc",
                "/bench/{prefix}out{mode}.enc",
                "e",
                "/abs.asc",
            ]
        );

        let v = crate::variant::ProgramVariant {
            dir: PathBuf::from("/opt/mibench"),
            arch: "x86".to_string(),
            mode: crate::format::mode::Mode::Globals,
            def: def.clone(),
            scratch: PathBuf::from("/tmp"),
        };
        let argv = v.argv();
        assert_eq!(argv[0], "/tmp/rv32-x86-rijndael-globals.input_large.asc");
        assert_eq!(
            argv[1],
            "/tmp/rv32-x86-rijndael-globals.rv32-x86-out-globals.enc"
        );
        assert_eq!(argv[2], "e");
        assert_eq!(argv[3], "/tmp/rv32-x86-rijndael-globals.abs.asc");

        let cmd = def.measure_command(Path::new("build"));
        assert!(cmd.contains("--stage-in /bench/input_large.asc"));
        assert!(cmd.contains("--args '/bench/input_large.asc'"));
    }

    #[test]
    fn filtered() {
        let mut filter = Filter::default();
        filter.whitelist("^(rijndael|susan)").unwrap();
        filter.blacklist("edges$").unwrap();
        let defs = load(&filter);
        let ids: Vec<&str> = defs.defs.iter().map(|d| d.id()).collect();
        assert_eq!(vec!["rijndael-encode"], ids);
    }

    #[test]
    fn duplicate_ids() {
        let raw = r#"
[[bench]]
name = "crc"

[[bench]]
name = "sha"
id = "crc"
"#;
        let res = Definitions::from_slice(
            Path::new("."),
            raw.as_bytes(),
            &Filter::default(),
        );
        assert!(res.is_err());
    }

    #[test]
    fn bad_names_and_fields() {
        let raw = "[[bench]]\nname = \"a b\"\n";
        assert!(Definitions::from_slice(
            Path::new("."),
            raw.as_bytes(),
            &Filter::default()
        )
        .is_err());
        let raw = "[[bench]]\nname = \"ab\"\nregex = \"x\"\n";
        assert!(Definitions::from_slice(
            Path::new("."),
            raw.as_bytes(),
            &Filter::default()
        )
        .is_err());
    }

    #[test]
    fn measure_command_escapes_flags() {
        let defs = load(&Filter::default());
        let cmd = defs.defs[2].measure_command(Path::new("build"));
        assert_eq!(
            cmd,
            "sbtbench measure build susan --id susan-edges --args \
             'input_large.pgm' '{prefix}out{mode}.pgm' ' -e'"
        );
    }
}
