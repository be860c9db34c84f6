use std::{
    fmt::{Debug, Display, Write},
    str::FromStr,
};

use {
    anyhow::Context,
    lexopt::{Arg, Parser, ValueExt},
    regex_lite::Regex,
};

use crate::error::Error;

/// The environment variable that overrides the default number of samples.
pub const SAMPLES_ENV: &'static str = "SBTBENCH_SAMPLES";

/// The number of samples taken when nothing else says otherwise.
pub const DEFAULT_SAMPLES: usize = 10;

/// Returns the sub-command name, which must be the next argument.
///
/// A missing command, or -h/--help in its place, turns the given usage into
/// the error returned.
pub fn next_as_command(usage: &str, p: &mut Parser) -> anyhow::Result<String> {
    match p.next()? {
        None | Some(Arg::Short('h')) | Some(Arg::Long("help")) => {
            anyhow::bail!("{}", usage.trim())
        }
        Some(Arg::Value(cmd)) => Ok(cmd.string()?),
        Some(arg) => Err(arg.unexpected().into()),
    }
}

/// Converts one flag value with `FromStr`. Errors are tagged with the flag.
///
/// The error bound is spelled out instead of using `std::error::Error`
/// because most `FromStr` impls here return `anyhow::Error`, which doesn't
/// implement it.
fn convert<T>(
    osv: std::ffi::OsString,
    flag_name: &'static str,
) -> anyhow::Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: Display + Debug + Send + Sync + 'static,
{
    let strv = osv.string().context(flag_name)?;
    strv.parse().map_err(|err| anyhow::Error::msg(err).context(flag_name))
}

/// Parses the value of the flag just seen into a `T`.
pub fn parse<T>(p: &mut Parser, flag_name: &'static str) -> anyhow::Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: Display + Debug + Send + Sync + 'static,
{
    convert(p.value().context(flag_name)?, flag_name)
}

/// Like 'parse', but consumes every value up to the next flag. At least one
/// value is required.
pub fn parse_many<T>(
    p: &mut Parser,
    flag_name: &'static str,
) -> anyhow::Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: Display + Debug + Send + Sync + 'static,
{
    p.values()
        .context(flag_name)?
        .map(|osv| convert(osv, flag_name))
        .collect()
}

/// Returns the number of samples to take: the value given on the command
/// line if any, else the environment override if set, else the default.
pub fn sample_count(given: Option<usize>) -> anyhow::Result<usize> {
    let count = match given {
        Some(count) => count,
        None => match std::env::var(SAMPLES_ENV) {
            Ok(v) => v.trim().parse::<usize>().with_context(|| {
                format!("invalid {} value '{}'", SAMPLES_ENV, v)
            })?,
            Err(std::env::VarError::NotPresent) => DEFAULT_SAMPLES,
            Err(err) => {
                return Err(anyhow::Error::from(err).context(SAMPLES_ENV))
            }
        },
    };
    if count == 0 {
        return Err(Error::config("the number of samples must be positive"));
    }
    Ok(count)
}

/// When to color tables written to stdout.
#[derive(Clone, Copy, Debug, Default)]
pub enum Color {
    /// Only when stdout is a terminal.
    #[default]
    Auto,
    Always,
    Never,
}

impl Color {
    pub const USAGE: Usage = Usage::new(
        "--color <when>",
        "One of: auto, always, never.",
        r#"
When to use color (default: auto).

Color is only used to highlight the geometric mean row of a table. With
'auto', it is used only when stdout is a terminal.
"#,
    );

    /// Returns stdout wrapped for aligning tab separated columns, and with
    /// color enabled or not according to this choice.
    pub fn elastic_stdout(&self) -> Box<dyn termcolor::WriteColor> {
        use {
            tabwriter::TabWriter,
            termcolor::{Ansi, NoColor},
        };

        let tabbed = TabWriter::new(std::io::stdout());
        if self.enabled() {
            Box::new(Ansi::new(tabbed))
        } else {
            Box::new(NoColor::new(tabbed))
        }
    }

    fn enabled(&self) -> bool {
        use std::io::IsTerminal;

        match *self {
            Color::Auto => std::io::stdout().is_terminal(),
            Color::Always => true,
            Color::Never => false,
        }
    }
}

impl std::str::FromStr for Color {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Color> {
        Ok(match s {
            "auto" => Color::Auto,
            "always" => Color::Always,
            "never" => Color::Never,
            unknown => anyhow::bail!(
                "unrecognized color choice '{}', must be one of auto, \
                 always or never",
                unknown,
            ),
        })
    }
}

/// An ordered list of regex rules that decides which benchmark ids are
/// selected.
///
/// With no rules, every id is selected. Otherwise the last rule whose regex
/// matches an id decides: a whitelist rule selects it and a blacklist rule
/// drops it. An id that no rule matches is selected only if every rule is a
/// blacklist rule.
#[derive(Clone, Debug, Default)]
pub struct Filter {
    rules: Vec<FilterRule>,
}

impl Filter {
    pub const USAGE_BENCH: Usage = Usage::new(
        "-f, --filter <id> ...",
        "Only include benchmarks whose id matches.",
        r#"
Only include benchmarks whose id matches this regex.

This may be given multiple times, and combines with -F/--filter-not into one
ordered list of rules. When there is at least one -f rule, a benchmark is
only included if some rule matches it. When several rules match, the last one
given wins. So with '-f rijndael -F decode', 'rijndael-encode' is included but
'rijndael-decode' is not, since '-F decode' comes after '-f rijndael'.

The id of a benchmark is the name of its row in the store. Regexes are not
anchored.
"#,
    );

    pub const USAGE_BENCH_NOT: Usage = Usage::new(
        "-F, --filter-not <id> ...",
        "Exclude benchmarks whose id matches.",
        r#"
Exclude benchmarks whose id matches this regex.

This may be given multiple times. See -f/--filter for how the two flags
combine.
"#,
    );

    /// Reads a regex from the parser and adds it as a whitelist rule.
    pub fn arg_whitelist(
        &mut self,
        p: &mut lexopt::Parser,
        flag_name: &'static str,
    ) -> anyhow::Result<()> {
        let pattern = p.value().context(flag_name)?.string()?;
        self.whitelist(&pattern).context(flag_name)
    }

    /// Reads a regex from the parser and adds it as a blacklist rule.
    pub fn arg_blacklist(
        &mut self,
        p: &mut lexopt::Parser,
        flag_name: &'static str,
    ) -> anyhow::Result<()> {
        let pattern = p.value().context(flag_name)?.string()?;
        self.blacklist(&pattern).context(flag_name)
    }

    pub fn whitelist(&mut self, pattern: &str) -> anyhow::Result<()> {
        self.push(pattern, false)
    }

    pub fn blacklist(&mut self, pattern: &str) -> anyhow::Result<()> {
        self.push(pattern, true)
    }

    fn push(&mut self, pattern: &str, blacklist: bool) -> anyhow::Result<()> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid filter regex '{}'", pattern))?;
        self.rules.push(FilterRule { re, blacklist });
        Ok(())
    }

    /// Returns true when the given id is selected.
    pub fn include(&self, subject: &str) -> bool {
        match self.rules.iter().rev().find(|r| r.re.is_match(subject)) {
            Some(rule) => !rule.blacklist,
            None => self.rules.iter().all(|r| r.blacklist),
        }
    }
}

#[derive(Clone, Debug)]
struct FilterRule {
    re: Regex,
    blacklist: bool,
}

/// The documentation of one flag, in a short and a long form.
#[derive(Clone, Debug)]
pub struct Usage {
    /// How the flag is written, e.g., '-n, --samples <number>'.
    pub format: &'static str,
    /// One line, printed next to the format by -h.
    pub short: &'static str,
    /// Paragraphs separated by blank lines, printed below the format by
    /// --help. Each paragraph is re-wrapped.
    pub long: &'static str,
}

impl Usage {
    // Flags shared by 'measure' and 'suite'.

    pub const SAMPLES: Usage = Usage::new(
        "-n, --samples <number>",
        "The number of timing samples per mode.",
        r#"
The number of timed runs of each program variant (default: 10).

When profiling is enabled, the same number of profiled runs is done before the
timed runs. When this flag is absent, the SBTBENCH_SAMPLES environment
variable is consulted before falling back to the default.
"#,
    );

    pub const MODES: Usage = Usage::new(
        "--modes <mode> ...",
        "The modes to measure, or to project onto.",
        r#"
The translated modes to measure: any of globals, locals or emulated.

The native binary is always measured first, since it is the baseline for every
slowdown. The default is 'globals locals', or just 'emulated' when --rv32 is
given. When printing or transforming a store, this is instead the list of
modes to keep, in order.
"#,
    );

    pub const ARCH: Usage = Usage::new(
        "--arch <prefix>",
        "The architecture prefix of the native binaries.",
        r#"
The architecture prefix of the native binaries (default: x86).

The native binary for benchmark 'foo' is '<dir>/<prefix>-foo' and the
translated ones are '<dir>/rv32-<prefix>-foo-<mode>'.
"#,
    );

    pub const CSV: Usage = Usage::new(
        "--csv <path>",
        "The store to append results to.",
        r#"
The CSV store to append one row per benchmark to (default: sbtbench.csv).

The store is created, with headers, when it doesn't exist yet. Otherwise, the
modes measured must match the ones in its header.
"#,
    );

    pub const NO_CSV: Usage = Usage::new(
        "--no-csv",
        "Don't append results to the store.",
        r#"
Print results, but don't append them to the store.
"#,
    );

    pub const NO_DIFF: Usage = Usage::new(
        "--no-diff",
        "Don't compare translated output with native output.",
        r#"
Don't compare the standard output of translated runs with that of native
runs.

By default, once a mode other than native has been timed, the standard output
of each of its runs is compared with that of the native run with the same
index. Any difference aborts the measurement of the benchmark, and nothing is
stored for it. This flag turns that check off, e.g., for benchmarks that print
their own timings.
"#,
    );

    pub const NO_PERF: Usage = Usage::new(
        "--no-perf",
        "Don't use the profiler at all.",
        r#"
Don't use the profiler at all.

Elapsed times are measured around each child process instead of being read
from 'perf stat', and no self-time percentages are sampled. The percentage of
every mode is then taken to be exactly 1.
"#,
    );

    pub const NO_PERF_LIBC: Usage = Usage::new(
        "--no-perf-libc",
        "Don't count C library time as the binary's own.",
        r#"
By default, the share of sampled time spent in the C library is counted as
time spent in the binary itself, since translated binaries carry their C
library with them while native ones load it dynamically. This flag turns that
off.
"#,
    );

    pub const FREQ: Usage = Usage::new(
        "--freq <hz>",
        "The profiler's sampling frequency.",
        r#"
The sampling frequency handed to 'perf record -F'. When absent, the
profiler's own default is used.
"#,
    );

    pub const RV32: Usage = Usage::new(
        "--rv32",
        "Compare against full emulation instead.",
        r#"
Compare the native binary against the RISC-V binary running under full
emulation, rather than against translated binaries. Profiling is disabled in
this configuration, since the profiler can only ever see the emulator.
"#,
    );

    pub const SCRATCH: Usage = Usage::new(
        "--scratch <dir>",
        "Where per-run output and staged files go.",
        r#"
The directory that per-run output and staged fixtures are written to
(default: the system temporary directory).

Files in here are named after the binary being run. Running the same benchmark
and mode twice at the same time is therefore not safe.
"#,
    );

    pub const VERBOSE: Usage = Usage::new(
        "-v, --verbose",
        "Print every run as it happens.",
        r#"
Print the command for each program variant and the time taken by each run.
"#,
    );

    pub const COLUMNS: Usage = Usage::new(
        "--columns <column> ...",
        "The metrics to project onto.",
        r#"
The metrics to keep, per mode, in order. A metric is given either by name or
by its position within a mode's group of eight columns:

0 time, 1 time-sd, 2 pct, 3 pct-sd, 4 final, 5 final-sd, 6 slowdown,
7 slowdown-sd.

A '-mean' suffix is accepted on the names of the means, e.g., 'final-mean'.
"#,
    );

    pub const fn new(
        format: &'static str,
        short: &'static str,
        long: &'static str,
    ) -> Usage {
        Usage { format, short, long }
    }

    /// Renders the given usages as two aligned columns: the format and the
    /// short description.
    pub fn short(usages: &[Usage]) -> String {
        let width = usages.iter().map(|u| u.format.len()).max().unwrap_or(0);
        let mut out = String::new();
        for u in usages.iter() {
            // Writing to a String never fails.
            let _ = writeln!(
                out,
                "    {:width$}  {}",
                u.format,
                u.short,
                width = width
            );
        }
        out
    }

    /// Renders each usage as its format followed by its long description,
    /// indented and wrapped to fit in an OPTIONS section.
    pub fn long(usages: &[Usage]) -> String {
        const INDENT: &str = "        ";
        let opts = textwrap::Options::new(79)
            .initial_indent(INDENT)
            .subsequent_indent(INDENT);
        let mut blocks = vec![];
        for u in usages.iter() {
            let mut block = format!("    {}\n", u.format);
            let paragraphs: Vec<String> = u
                .long
                .trim()
                .split("\n\n")
                .map(|para| {
                    textwrap::wrap(&para.replace('\n', " "), &opts).join("\n")
                })
                .collect();
            block.push_str(&paragraphs.join("\n\n"));
            block.push('\n');
            blocks.push(block);
        }
        blocks.join("\n")
    }
}
