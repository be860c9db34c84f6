use std::{
    io::Write,
    path::{Path, PathBuf},
};

use lexopt::Arg;

use crate::{
    args::{self, Usage},
    format::store::{Projection, Store},
};

const USAGES: &[Usage] = &[Usage::COLUMNS, Usage::MODES];

fn usage_short() -> String {
    format!(
        "\
Rewrite a store with only the given modes and columns.

USAGE:
    sbtbench xform [OPTIONS] <store>

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
Rewrite a store with only the given modes and columns.

This computes the same table as 'sbtbench print', geometric mean row included,
and then overwrites the store with it. Everything projected away is lost, so
keep a copy of the store if you might need it again.

A rewritten store can still be printed and rewritten again, but only onto
modes and columns it still has. Nothing can be appended to it.

USAGE:
    sbtbench xform [OPTIONS] <store>

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
    let mut path = None;
    let mut projection = Projection::default();
    while let Some(arg) = p.next()? {
        match arg {
            Arg::Short('h') => anyhow::bail!("{}", usage_short()),
            Arg::Long("help") => anyhow::bail!("{}", usage_long()),
            Arg::Long("columns") => {
                projection.metrics = args::parse_many(p, "--columns")?;
            }
            Arg::Long("modes") => {
                projection.modes = args::parse_many(p, "--modes")?;
            }
            Arg::Value(v) if path.is_none() => {
                path = Some(PathBuf::from(v));
            }
            _ => return Err(arg.unexpected().into()),
        }
    }
    let Some(path) = path else {
        anyhow::bail!("missing store path\n\n{}", usage_short());
    };
    transform_store(&path, &projection)
}

/// Overwrites a store with the given projection of itself.
pub(crate) fn transform_store(
    path: &Path,
    projection: &Projection,
) -> anyhow::Result<()> {
    let table = Store::new(path).transform(projection)?;
    writeln!(
        std::io::stdout(),
        "wrote {} rows, {} columns each, to {}",
        table.rows.len() + table.geomean.iter().len(),
        table.width(),
        path.display(),
    )?;
    Ok(())
}
