use std::io::Write;

use lexopt::Arg;

use crate::util;

const USAGE: &'static str = "\
Print the version of sbtbench, and the git revision it was built from when
that is known.

USAGE:
    sbtbench version
";

pub fn run(p: &mut lexopt::Parser) -> anyhow::Result<()> {
    if let Some(arg) = p.next()? {
        match arg {
            Arg::Short('h') | Arg::Long("help") => {
                anyhow::bail!("{}", USAGE.trim())
            }
            _ => return Err(arg.unexpected().into()),
        }
    }
    writeln!(std::io::stdout(), "sbtbench {}", util::version())?;
    Ok(())
}
