use std::io::Write;

// helpers and other things
#[macro_use]
mod macros;

mod args;
mod error;
mod format;
mod runner;
mod stats;
mod util;
mod variant;

// sub-commands
mod cmd;

const USAGE: &'static str = "\
A tool for measuring the slowdown of binaries produced by a binary translator.

USAGE:
    sbtbench <command> ...

COMMANDS:
    measure   Measure one benchmark and append the results to a store.
    print     Print a store as an aligned table.
    suite     Measure every benchmark defined in a directory.
    version   Print the version of sbtbench.
    xform     Rewrite a store with a subset of its modes and columns.

";

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    )
    .init();
    if let Err(err) = run(&mut lexopt::Parser::from_env()) {
        if std::env::var("RUST_BACKTRACE").map_or(false, |v| v == "1") {
            writeln!(&mut std::io::stderr(), "{:?}", err).unwrap();
        } else {
            writeln!(&mut std::io::stderr(), "{:#}", err).unwrap();
        }
        std::process::exit(1);
    }
    Ok(())
}

fn run(p: &mut lexopt::Parser) -> anyhow::Result<()> {
    let cmd = args::next_as_command(USAGE, p)?;
    match &*cmd {
        "measure" => cmd::measure::run(p),
        "print" => cmd::print::run(p),
        "suite" => cmd::suite::run(p),
        "version" => cmd::version::run(p),
        "xform" => cmd::xform::run(p),
        unk => anyhow::bail!("unrecognized command '{}'", unk),
    }
}
