use {
    anyhow::Context,
    bstr::{BString, ByteSlice},
};

/// The package version, as set by Cargo.
pub const SBTBENCH_VERSION: &'static str = env!("CARGO_PKG_VERSION");

/// The git revision of the build, exported by `build.rs` when `git` could be
/// run at build time.
pub const SBTBENCH_REVISION: Option<&'static str> =
    option_env!("SBTBENCH_REVISION");

/// The package version, followed by the git revision when known.
pub fn version() -> String {
    match SBTBENCH_REVISION {
        Some(rev) => format!("{} (rev {})", SBTBENCH_VERSION, rev),
        None => SBTBENCH_VERSION.to_string(),
    }
}

/// Writes a horizontal rule made of `width` copies of `divider`.
pub fn write_divider<W: std::io::Write>(
    mut wtr: W,
    divider: char,
    width: usize,
) -> anyhow::Result<()> {
    let mut buf = [0; 4];
    let piece = divider.encode_utf8(&mut buf);
    wtr.write_all(piece.repeat(width).as_bytes())?;
    Ok(())
}

/// Runs `with` while the writer is set to bold, resetting afterwards.
pub fn colorize_label<W: termcolor::WriteColor>(
    mut wtr: W,
    mut with: impl FnMut(&mut W) -> std::io::Result<()>,
) -> anyhow::Result<()> {
    wtr.set_color(termcolor::ColorSpec::new().set_bold(true))?;
    with(&mut wtr)?;
    wtr.reset()?;
    Ok(())
}

/// Runs a command to completion and returns its stdout.
///
/// On a non-zero exit, the error carries the last line of stderr. The whole
/// of stderr is only logged at debug level.
pub fn output(cmd: &mut std::process::Command) -> anyhow::Result<BString> {
    log::debug!("capturing output of {:?}", cmd);
    let out = cmd
        .output()
        .with_context(|| format!("could not run {:?}", cmd.get_program()))?;
    let stderr = out.stderr.as_bstr();
    if out.status.success() {
        if !stderr.is_empty() {
            log::debug!("stderr of successful command: {}", stderr);
        }
        return Ok(BString::from(out.stdout));
    }
    log::debug!("{:?} exited with {}, stderr: {}", cmd, out.status, stderr);
    match stderr.lines().last() {
        Some(last) => anyhow::bail!(
            "{:?} exited with {}: {}",
            cmd.get_program(),
            out.status,
            last.as_bstr(),
        ),
        None => anyhow::bail!(
            "{:?} exited with {} and wrote nothing to stderr",
            cmd.get_program(),
            out.status,
        ),
    }
}
