use std::{
    io::Write,
    path::{Path, PathBuf},
};

use {anyhow::Context, lexopt::Arg};

use crate::{
    args::{self, Color, Usage},
    cmd::{print, xform},
    error::Error,
    format::{
        definitions::Definition,
        mode::{Metric, Mode},
        store::{Projection, Store},
    },
    runner::{RunConfig, SampleRunner},
    stats::{ModeResult, ResultSet},
    variant::{unescape_arg, ProgramVariant},
};

/// The store appended to when --csv isn't given.
const DEFAULT_STORE: &'static str = "sbtbench.csv";

/// The architecture prefix used when --arch isn't given.
const DEFAULT_ARCH: &'static str = "x86";

const USAGES: &[Usage] = &[
    Usage::new(
        "--args <arg> ...",
        "The argument template given to every variant.",
        r#"
The arguments given to every variant of the benchmark. Every value up to the
next flag is consumed.

The placeholders '{prefix}' and '{mode}' are replaced per variant: '{prefix}'
by everything in the binary name before the benchmark name, e.g., 'rv32-x86-',
and '{mode}' by '-<mode>' for translated variants and by nothing otherwise.

An argument that itself starts with a '-' must be escaped by prefixing it with
a space, e.g., ' -e'. Every argument is trimmed before it is used.
"#,
    ),
    Usage::ARCH,
    Color::USAGE,
    Usage::COLUMNS,
    Usage::CSV,
    Usage::new(
        "--exp-rc <code>",
        "The exit code every run must have.",
        r#"
The exit code every run must have (default: 0). A run exiting with anything
else aborts the measurement of the whole benchmark, and nothing is stored for
it.
"#,
    ),
    Usage::FREQ,
    Usage::new(
        "--id <name>",
        "The name of the row in the store.",
        r#"
The name of the row in the store. This defaults to the benchmark name, and is
useful when the same binary is measured with different arguments.
"#,
    ),
    Usage::MODES,
    Usage::NO_CSV,
    Usage::NO_DIFF,
    Usage::NO_PERF,
    Usage::NO_PERF_LIBC,
    Usage::new(
        "--perf",
        "Profile each variant once and print the report.",
        r#"
Run each variant once under the profiler and print the profiler's report,
without deriving or storing anything. This is useful for seeing where the time
goes.
"#,
    ),
    Usage::new(
        "--printf <store>",
        "Print a store instead of measuring.",
        r#"
Print the given store instead of measuring anything. This is the same as
'sbtbench print', and --modes and --columns select what is printed.
"#,
    ),
    Usage::RV32,
    Usage::SAMPLES,
    Usage::SCRATCH,
    Usage::new(
        "--stage-in <file>",
        "An input file to copy into scratch space.",
        r#"
An input file with a fixed name, which is copied into scratch space before
every run. Any argument naming this file is changed to name the copy. This may
be given multiple times.
"#,
    ),
    Usage::new(
        "--stage-out <file>",
        "An output file to copy out of scratch space.",
        r#"
An output file with a fixed name. The benchmark writes it into scratch space
instead, and it is copied back after every run. This may be given multiple
times.
"#,
    ),
    Usage::new(
        "--stdin <file>",
        "A file to redirect to standard input.",
        r#"
A file whose contents are given to every run on standard input.
"#,
    ),
    Usage::VERBOSE,
    Usage::new(
        "--xform <store>",
        "Rewrite a store instead of measuring.",
        r#"
Rewrite the given store instead of measuring anything. This is the same as
'sbtbench xform', and --modes and --columns select what is kept.
"#,
    ),
];

fn usage_short() -> String {
    format!(
        "\
Measure the slowdown of translated binaries for one benchmark.

USAGE:
    sbtbench measure [OPTIONS] <dir> <bench>
    sbtbench measure [OPTIONS] --printf <store>
    sbtbench measure [OPTIONS] --xform <store>

TIP:
    use -h for short docs and --help for long docs

OPTIONS:
{options}
",
        options = Usage::short(USAGES),
    )
    .trim()
    .to_string()
}

fn usage_long() -> String {
    format!(
        "\
Measure the slowdown of translated binaries for one benchmark.

The native binary is run first, followed by a binary for each of the modes
measured. Each of them is run under the profiler to sample the fraction of
time spent in the binary itself, and then timed. The time attributable to each
binary is its elapsed time multiplied by that fraction, and its slowdown is
that time relative to the native binary's. The standard output of every
translated run must match that of the native run with the same index. A
summary line is printed per mode, and one row is appended to the store.

USAGE:
    sbtbench measure [OPTIONS] <dir> <bench>
    sbtbench measure [OPTIONS] --printf <store>
    sbtbench measure [OPTIONS] --xform <store>

    The first form measures the benchmark <bench> whose binaries are in <dir>.
    The native binary is '<dir>/<arch>-<bench>'.

TIP:
    use -h for short docs and --help for long docs

OPTIONS:
{options}
",
        options = Usage::long(USAGES),
    )
    .trim()
    .to_string()
}

pub fn run(p: &mut lexopt::Parser) -> anyhow::Result<()> {
    let c = Config::parse(p)?;
    match (c.printf.as_ref(), c.xform.as_ref()) {
        (Some(_), Some(_)) => {
            return Err(Error::config("--printf and --xform conflict"))
        }
        (Some(path), None) => {
            return print::print_store(path, &c.projection()?, c.color)
        }
        (None, Some(path)) => {
            return xform::transform_store(path, &c.projection()?)
        }
        (None, None) => {}
    }
    if !c.columns.is_empty() {
        return Err(Error::config(
            "--columns can only be used with --printf or --xform",
        ));
    }
    let (dir, def) = c.benchmark()?;
    let bench = c.flags.finish()?;
    if c.perf_only {
        return profile(&bench, &dir, &def);
    }
    measure(&bench, &dir, &def)?;
    Ok(())
}

/// The CLI arguments parsed from the 'measure' sub-command.
#[derive(Clone, Debug, Default)]
struct Config {
    /// The directory containing the binaries under test.
    dir: Option<PathBuf>,
    /// Everything given about the benchmark. Its name is the second
    /// positional argument.
    def: Definition,
    /// Whether a benchmark name was given.
    named: bool,
    /// The flags shared with 'suite'.
    flags: BenchFlags,
    /// The metrics kept by --printf or --xform.
    columns: Vec<Metric>,
    printf: Option<PathBuf>,
    xform: Option<PathBuf>,
    /// Whether to just print a profile of each variant.
    perf_only: bool,
    color: Color,
}

impl Config {
    /// Parse 'measure' args from the given CLI parser.
    fn parse(p: &mut lexopt::Parser) -> anyhow::Result<Config> {
        let mut c = Config::default();
        while let Some(arg) = p.next()? {
            match arg {
                Arg::Short('h') => anyhow::bail!("{}", usage_short()),
                Arg::Long("help") => anyhow::bail!("{}", usage_long()),
                Arg::Long("args") => {
                    for v in p.values().context("--args")? {
                        let v = v.into_string().map_err(|v| {
                            anyhow::anyhow!("--args: {:?} is not UTF-8", v)
                        })?;
                        c.def.args.push(unescape_arg(&v));
                    }
                }
                Arg::Long("color") => {
                    c.color = args::parse(p, "--color")?;
                }
                Arg::Long("columns") => {
                    c.columns = args::parse_many(p, "--columns")?;
                }
                Arg::Long("exp-rc") => {
                    c.def.exp_rc = args::parse(p, "--exp-rc")?;
                }
                Arg::Long("id") => {
                    c.def.id = Some(args::parse(p, "--id")?);
                }
                Arg::Long("perf") => {
                    c.perf_only = true;
                }
                Arg::Long("printf") => {
                    c.printf = Some(args::parse(p, "--printf")?);
                }
                Arg::Long("stage-in") => {
                    c.def.stage_in.push(args::parse(p, "--stage-in")?);
                }
                Arg::Long("stage-out") => {
                    c.def.stage_out.push(args::parse(p, "--stage-out")?);
                }
                Arg::Long("stdin") => {
                    c.def.stdin = Some(args::parse(p, "--stdin")?);
                }
                Arg::Long("xform") => {
                    c.xform = Some(args::parse(p, "--xform")?);
                }
                Arg::Value(v) => {
                    let v = v.into_string().map_err(|v| {
                        anyhow::anyhow!("{:?} is not UTF-8", v)
                    })?;
                    if c.dir.is_none() {
                        c.dir = Some(PathBuf::from(v));
                    } else if !c.named {
                        c.def.name = v;
                        c.named = true;
                    } else {
                        anyhow::bail!("unexpected argument '{}'", v);
                    }
                }
                arg => {
                    let flag = flag_name(&arg);
                    let unexpected = arg.unexpected();
                    if !c.flags.parse(p, flag.as_deref())? {
                        return Err(unexpected.into());
                    }
                }
            }
        }
        Ok(c)
    }

    /// The projection given by --modes and --columns.
    fn projection(&self) -> anyhow::Result<Projection> {
        if self.dir.is_some() {
            return Err(Error::config(
                "a benchmark cannot be measured with --printf or --xform",
            ));
        }
        Ok(Projection {
            modes: self.flags.modes.clone(),
            metrics: self.columns.clone(),
        })
    }

    /// The directory and definition of the benchmark to measure.
    fn benchmark(&self) -> anyhow::Result<(PathBuf, Definition)> {
        let Some(ref dir) = self.dir else {
            return Err(Error::config(format!(
                "missing binary directory\n\n{}",
                usage_short(),
            )));
        };
        if !self.named {
            return Err(Error::config("missing benchmark name"));
        }
        Ok((dir.clone(), self.def.clone()))
    }
}

/// Flags shared by 'measure' and 'suite', as given on the command line.
#[derive(Clone, Debug, Default)]
pub(crate) struct BenchFlags {
    samples: Option<usize>,
    modes: Vec<Mode>,
    arch: Option<String>,
    csv: Option<PathBuf>,
    no_csv: bool,
    no_diff: bool,
    no_perf: bool,
    no_perf_libc: bool,
    freq: Option<u32>,
    rv32: bool,
    scratch: Option<PathBuf>,
    verbose: bool,
}

impl BenchFlags {
    /// Parses the value of the given flag, if it is one of the shared ones.
    /// Returns false when it isn't.
    pub(crate) fn parse(
        &mut self,
        p: &mut lexopt::Parser,
        flag: Option<&str>,
    ) -> anyhow::Result<bool> {
        let Some(flag) = flag else { return Ok(false) };
        match flag {
            "-n" | "--samples" => {
                self.samples = Some(args::parse(p, "-n/--samples")?);
            }
            "--modes" => {
                self.modes = args::parse_many(p, "--modes")?;
            }
            "--arch" => {
                self.arch = Some(args::parse(p, "--arch")?);
            }
            "--csv" => {
                self.csv = Some(args::parse(p, "--csv")?);
            }
            "--no-csv" => self.no_csv = true,
            "--no-diff" => self.no_diff = true,
            "--no-perf" => self.no_perf = true,
            "--no-perf-libc" => self.no_perf_libc = true,
            "--freq" => {
                self.freq = Some(args::parse(p, "--freq")?);
            }
            "--rv32" => self.rv32 = true,
            "--scratch" => {
                self.scratch = Some(args::parse(p, "--scratch")?);
            }
            "-v" | "--verbose" => self.verbose = true,
            _ => return Ok(false),
        }
        Ok(true)
    }

    /// Resolves every default and rejects conflicting flags.
    pub(crate) fn finish(&self) -> anyhow::Result<BenchConfig> {
        let modes = if self.rv32 {
            if !self.modes.is_empty() {
                return Err(Error::config("--rv32 and --modes conflict"));
            }
            Mode::EMULATION.to_vec()
        } else if self.modes.is_empty() {
            Mode::DEFAULT.to_vec()
        } else {
            let mut modes = vec![Mode::Native];
            for &mode in self.modes.iter() {
                if mode == Mode::Native {
                    continue;
                }
                if modes.contains(&mode) {
                    return Err(Error::config(format!(
                        "mode '{}' given more than once",
                        mode
                    )));
                }
                modes.push(mode);
            }
            modes
        };
        let perf = !self.no_perf && !self.rv32;
        if !perf && self.freq.is_some() {
            return Err(Error::config(
                "--freq cannot be used when profiling is disabled",
            ));
        }
        let run = RunConfig {
            samples: args::sample_count(self.samples)?,
            perf,
            freq: self.freq,
            perf_libc: !self.no_perf_libc,
            verbose: self.verbose,
        };
        let scratch =
            self.scratch.clone().unwrap_or_else(std::env::temp_dir);
        std::fs::create_dir_all(&scratch).with_context(|| {
            format!("failed to create scratch dir {}", scratch.display())
        })?;
        let store = if self.no_csv {
            None
        } else {
            Some(Store::new(
                self.csv.clone().unwrap_or_else(|| DEFAULT_STORE.into()),
            ))
        };
        let arch = self.arch.clone().unwrap_or_else(|| DEFAULT_ARCH.into());
        Ok(BenchConfig {
            arch,
            modes,
            run,
            scratch,
            store,
            diff: !self.no_diff,
        })
    }
}

/// Everything needed to measure a benchmark. This is immutable once built.
#[derive(Clone, Debug)]
pub(crate) struct BenchConfig {
    pub(crate) arch: String,
    /// The modes measured, native first.
    pub(crate) modes: Vec<Mode>,
    pub(crate) run: RunConfig,
    pub(crate) scratch: PathBuf,
    /// Where results go, unless storing is disabled.
    pub(crate) store: Option<Store>,
    /// Whether translated output is compared with native output.
    pub(crate) diff: bool,
}

impl BenchConfig {
    fn variant(
        &self,
        dir: &Path,
        mode: Mode,
        def: &Definition,
    ) -> ProgramVariant {
        ProgramVariant {
            dir: dir.to_path_buf(),
            arch: self.arch.clone(),
            mode,
            def: def.clone(),
            scratch: self.scratch.clone(),
        }
    }
}

/// Measures every mode of the given benchmark, prints a summary line for
/// each and appends the results to the store.
///
/// Nothing is stored unless every mode was measured successfully, and
/// (unless disabled) every translated run wrote the same standard output as
/// its native counterpart.
pub(crate) fn measure(
    config: &BenchConfig,
    dir: &Path,
    def: &Definition,
) -> anyhow::Result<ResultSet> {
    let variants: Vec<ProgramVariant> =
        config.modes.iter().map(|&m| config.variant(dir, m, def)).collect();
    for v in variants.iter() {
        v.path()?;
    }

    let mut out = std::io::stdout();
    let mut results: Vec<ModeResult> = vec![];
    for v in variants.iter() {
        log::info!("measuring {}", v.binary_name());
        let samples = SampleRunner::new(v, &config.run)
            .collect()
            .with_context(|| format!("failed to measure {}", def.id()))?;
        if config.diff && v.mode != Mode::Native {
            compare_outputs(&variants[0], v, config.run.samples)?;
        }
        let result =
            ModeResult::from_samples(v.mode, &samples, results.first())?;
        writeln!(out, "{:<16} {}", def.id(), result)?;
        out.flush()?;
        results.push(result);
    }
    let set = ResultSet::new(def.id().to_string(), results)?;
    if let Some(ref store) = config.store {
        store.append(&set)?;
        log::info!("appended '{}' to {}", set.name, store.path().display());
    }
    Ok(set)
}

/// Checks that every run of `variant` wrote the same standard output as the
/// native run with the same index.
fn compare_outputs(
    native: &ProgramVariant,
    variant: &ProgramVariant,
    runs: usize,
) -> anyhow::Result<()> {
    let read = |v: &ProgramVariant, i: usize| {
        let path = v.output_path(i);
        std::fs::read(&path)
            .with_context(|| format!("failed to read {}", path.display()))
    };
    for i in 0..runs {
        if read(native, i)? != read(variant, i)? {
            return Err(anyhow::Error::new(Error::OutputMismatch {
                binary: variant.binary_name(),
                run: i,
            }));
        }
    }
    log::debug!("output of {} matches native", variant.binary_name());
    Ok(())
}

/// Runs every variant of the given benchmark once under the profiler and
/// prints the profiler's report for each.
fn profile(
    config: &BenchConfig,
    dir: &Path,
    def: &Definition,
) -> anyhow::Result<()> {
    if !config.run.perf {
        return Err(Error::config(
            "--perf cannot be used when profiling is disabled",
        ));
    }
    let run = RunConfig { samples: 1, verbose: true, ..config.run.clone() };
    let mut out = std::io::stdout();
    for &mode in config.modes.iter() {
        let variant = config.variant(dir, mode, def);
        let report = SampleRunner::new(&variant, &run).report()?;
        writeln!(out, "=== {} ===", variant.binary_name())?;
        writeln!(out, "{}", report.trim_end())?;
    }
    Ok(())
}

/// Returns the flag as it was written, e.g., `-n` or `--samples`.
pub(crate) fn flag_name(arg: &Arg<'_>) -> Option<String> {
    match *arg {
        Arg::Short(c) => Some(format!("-{}", c)),
        Arg::Long(name) => Some(format!("--{}", name)),
        Arg::Value(_) => None,
    }
}
