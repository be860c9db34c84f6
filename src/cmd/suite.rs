use std::{io::Write, path::PathBuf};

use lexopt::Arg;

use crate::{
    args::{self, Color, Filter, Usage},
    cmd::measure::{self, flag_name, BenchFlags},
    format::{
        definitions::Definitions,
        store::{Projection, Table},
    },
};

const USAGES: &[Usage] = &[
    Usage::ARCH,
    Color::USAGE,
    Usage::CSV,
    Filter::USAGE_BENCH,
    Filter::USAGE_BENCH_NOT,
    Usage::FREQ,
    Usage::new(
        "--list",
        "List benchmarks, but don't run them.",
        r#"
List the benchmarks to run, but don't run them.

This loads and filters every definition, and then prints, for each benchmark,
the 'sbtbench measure' command that measures just that benchmark. This is
useful for checking the definitions and for running one benchmark by hand.
"#,
    ),
    Usage::MODES,
    Usage::NO_CSV,
    Usage::NO_DIFF,
    Usage::NO_PERF,
    Usage::NO_PERF_LIBC,
    Usage::RV32,
    Usage::SAMPLES,
    Usage::SCRATCH,
    Usage::VERBOSE,
];

fn usage_short() -> String {
    format!(
        "\
Measure every benchmark defined in a directory of TOML files.

USAGE:
    sbtbench suite [OPTIONS] <dir> <bin-dir>

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
Measure every benchmark defined in a directory of TOML files.

Each benchmark is measured exactly as 'sbtbench measure' would, in the order
of the files defining them and then in the order they appear in each file.
One row per benchmark is appended to the store. The first benchmark that fails
stops the whole suite, but every row appended before it is kept. Once every
benchmark has been measured, a table of all of them is printed along with
their geometric mean.

USAGE:
    sbtbench suite [OPTIONS] <dir> <bin-dir>

    <dir> is searched recursively for files ending in '.toml'. Each one
    contains any number of benchmark definitions, for example:

        [[bench]]
        name = \"rijndael\"
        id = \"rijndael-encode\"
        args = [\"input_large.asc\", \"{{prefix}}out{{mode}}.enc\", \"e\"]
        stage-in = [\"input_large.asc\"]

    Relative file paths in a definition are relative to the file's directory.
    <bin-dir> is the directory containing the binaries under test.

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
    let (Some(dir), Some(bin_dir)) = (c.dir.as_ref(), c.bin_dir.as_ref())
    else {
        anyhow::bail!("missing directories\n\n{}", usage_short());
    };
    let defs = Definitions::from_dir(dir, &c.filter)?;
    if c.list {
        let mut out = std::io::stdout();
        for def in defs.defs.iter() {
            writeln!(out, "{}", def.measure_command(bin_dir))?;
        }
        return Ok(());
    }
    anyhow::ensure!(
        !defs.defs.is_empty(),
        "no benchmarks found in {}",
        dir.display(),
    );

    let bench = c.flags.finish()?;
    let mut sets = vec![];
    for def in defs.defs.iter() {
        sets.push(measure::measure(&bench, bin_dir, def)?);
    }
    writeln!(std::io::stdout(), "")?;
    Table::from_result_sets(&sets)?
        .summarize(&Projection::default())?
        .print(c.color.elastic_stdout())
}

/// The CLI arguments parsed from the 'suite' sub-command.
#[derive(Clone, Debug, Default)]
struct Config {
    /// The directory to find benchmark definitions in.
    dir: Option<PathBuf>,
    /// The directory containing the binaries under test.
    bin_dir: Option<PathBuf>,
    filter: Filter,
    list: bool,
    color: Color,
    flags: BenchFlags,
}

impl Config {
    fn parse(p: &mut lexopt::Parser) -> anyhow::Result<Config> {
        let mut c = Config::default();
        while let Some(arg) = p.next()? {
            match arg {
                Arg::Short('h') => anyhow::bail!("{}", usage_short()),
                Arg::Long("help") => anyhow::bail!("{}", usage_long()),
                Arg::Short('f') | Arg::Long("filter") => {
                    c.filter.arg_whitelist(p, "-f/--filter")?;
                }
                Arg::Short('F') | Arg::Long("filter-not") => {
                    c.filter.arg_blacklist(p, "-F/--filter-not")?;
                }
                Arg::Long("color") => {
                    c.color = args::parse(p, "--color")?;
                }
                Arg::Long("list") => {
                    c.list = true;
                }
                Arg::Value(v) if c.dir.is_none() => {
                    c.dir = Some(PathBuf::from(v));
                }
                Arg::Value(v) if c.bin_dir.is_none() => {
                    c.bin_dir = Some(PathBuf::from(v));
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_suite() {
        let args = [
            "defs", "build", "-f", "^sha", "--list", "-n", "2", "--no-csv",
        ];
        let mut p = lexopt::Parser::from_args(args.iter().copied());
        let c = Config::parse(&mut p).unwrap();
        assert_eq!(c.dir, Some(PathBuf::from("defs")));
        assert_eq!(c.bin_dir, Some(PathBuf::from("build")));
        assert!(c.list);
        assert!(c.filter.include("sha"));
        assert!(!c.filter.include("crc"));
        let bench = c.flags.finish().unwrap();
        assert_eq!(bench.run.samples, 2);
        assert!(bench.store.is_none());
    }
}
