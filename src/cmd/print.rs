use std::path::{Path, PathBuf};

use lexopt::Arg;

use crate::{
    args::{self, Color, Usage},
    format::{
        mode::{Metric, Mode},
        store::{Projection, Store},
    },
};

const USAGES: &[Usage] = &[Color::USAGE, Usage::COLUMNS, Usage::MODES];

fn usage_short() -> String {
    format!(
        "\
Print a store as an aligned table, with a geometric mean row.

USAGE:
    sbtbench print [OPTIONS] <store>

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
Print a store as an aligned table, with a geometric mean row.

The geometric mean of every column, across every benchmark, is computed and
printed as the last row. The store itself is never modified. If the store was
already rewritten by 'sbtbench xform', then the geometric mean row it was
written with is printed instead, since it can no longer be recomputed.

USAGE:
    sbtbench print [OPTIONS] <store>

    The store is a CSV file written by 'sbtbench measure' or 'sbtbench xform'.

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
    let Some(ref path) = c.path else {
        anyhow::bail!("missing store path\n\n{}", usage_short());
    };
    print_store(path, &c.projection, c.color)
}

/// Prints the given projection of a store to stdout.
pub(crate) fn print_store(
    path: &Path,
    projection: &Projection,
    color: Color,
) -> anyhow::Result<()> {
    Store::new(path).print(projection, color.elastic_stdout())
}

#[derive(Clone, Debug, Default)]
struct Config {
    path: Option<PathBuf>,
    projection: Projection,
    color: Color,
}

impl Config {
    fn parse(p: &mut lexopt::Parser) -> anyhow::Result<Config> {
        let mut c = Config::default();
        while let Some(arg) = p.next()? {
            match arg {
                Arg::Short('h') => anyhow::bail!("{}", usage_short()),
                Arg::Long("help") => anyhow::bail!("{}", usage_long()),
                Arg::Long("color") => {
                    c.color = args::parse(p, "--color")?;
                }
                Arg::Long("columns") => {
                    c.projection.metrics =
                        args::parse_many::<Metric>(p, "--columns")?;
                }
                Arg::Long("modes") => {
                    c.projection.modes =
                        args::parse_many::<Mode>(p, "--modes")?;
                }
                Arg::Value(v) if c.path.is_none() => {
                    c.path = Some(PathBuf::from(v));
                }
                _ => return Err(arg.unexpected().into()),
            }
        }
        Ok(c)
    }
}
