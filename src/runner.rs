/*!
Repeated timed and profiled invocations of a single program variant.

A timed run is measured by `perf stat` when profiling is enabled, and by the
wall clock around the child otherwise. A profiled run is recorded by
`perf record` and the resulting report is searched for the share of samples
attributed to the binary's own shared object.
*/

use std::{
    fs::File,
    io::Write,
    path::Path,
    process::{Command, ExitStatus, Stdio},
    time::Instant,
};

use anyhow::Context;

use crate::{
    error::Error,
    stats::Samples,
    util,
    variant::ProgramVariant,
};

/// The profiler binary.
const PERF: &'static str = "perf";

/// How samples are collected. This is fixed for the lifetime of a command.
#[derive(Clone, Debug)]
pub struct RunConfig {
    /// The number of timed runs, and of profiled runs when profiling.
    pub samples: usize,
    /// Whether the profiler is used at all.
    pub perf: bool,
    /// The sampling frequency given to `perf record`, if any.
    pub freq: Option<u32>,
    /// Whether time in the C library counts as time in the binary.
    pub perf_libc: bool,
    /// Print every run as it happens.
    pub verbose: bool,
}

impl Default for RunConfig {
    fn default() -> RunConfig {
        RunConfig {
            samples: crate::args::DEFAULT_SAMPLES,
            perf: true,
            freq: None,
            perf_libc: true,
            verbose: false,
        }
    }
}

/// Runs one program variant repeatedly.
#[derive(Debug)]
pub struct SampleRunner<'a> {
    variant: &'a ProgramVariant,
    config: &'a RunConfig,
}

impl<'a> SampleRunner<'a> {
    pub fn new(
        variant: &'a ProgramVariant,
        config: &'a RunConfig,
    ) -> SampleRunner<'a> {
        SampleRunner { variant, config }
    }

    /// Whether self-time percentages are sampled for this variant.
    fn profiling(&self) -> bool {
        self.config.perf && self.variant.mode.is_profilable()
    }

    /// Collects every sample for this variant. Profiled runs, if any, come
    /// first. The first failing run aborts the whole collection.
    pub fn collect(&self) -> anyhow::Result<Samples> {
        let mut samples = Samples::default();
        if self.profiling() {
            for i in 0..self.config.samples {
                samples.pcts.push(self.profile(i)?);
            }
        } else {
            log::info!(
                "not profiling {}, its self-time fraction is taken to be 1",
                self.variant.binary_name(),
            );
        }
        for i in 0..self.config.samples {
            samples.times.push(self.run(i)?);
        }
        Ok(samples)
    }

    /// Does the `i`th timed run and returns its elapsed time in seconds.
    pub fn run(&self, i: usize) -> anyhow::Result<f64> {
        let stat = self.variant.scratch_file("stat");
        let mut prefix = vec![];
        if self.config.perf {
            prefix.extend([
                PERF.to_string(),
                "stat".to_string(),
                "-o".to_string(),
                path_arg(&stat)?,
                "--".to_string(),
            ]);
        }
        let start = Instant::now();
        self.execute(&prefix, i)?;
        let wall = start.elapsed().as_secs_f64();

        let elapsed = if !self.config.perf {
            wall
        } else {
            let report = std::fs::read_to_string(&stat).with_context(|| {
                format!("failed to read {}", stat.display())
            })?;
            match parse_elapsed(&report) {
                Some(elapsed) => elapsed,
                None => {
                    log::debug!(
                        "no elapsed time in {}, using wall clock",
                        stat.display(),
                    );
                    wall
                }
            }
        };
        log::debug!(
            "{} run {}: {:.4}s",
            self.variant.binary_name(),
            i,
            elapsed
        );
        if self.config.verbose {
            writeln!(
                std::io::stdout(),
                "{} run {}: {:.4}s",
                self.variant.binary_name(),
                i,
                elapsed,
            )?;
        }
        Ok(elapsed)
    }

    /// Does the `i`th profiled run and returns the fraction of samples
    /// attributed to the binary itself.
    pub fn profile(&self, i: usize) -> anyhow::Result<f64> {
        let report = self.record(i)?;
        let binary = self.variant.binary_name();
        let pct = parse_self_time(&report, &binary, self.config.perf_libc)?;
        log::debug!("{} profile {}: {:.3}", binary, i, pct);
        if self.config.verbose {
            writeln!(
                std::io::stdout(),
                "{} profile {}: {:.3}",
                binary,
                i,
                pct
            )?;
        }
        Ok(pct)
    }

    /// Runs this variant once under the profiler and returns the complete
    /// report, without deriving anything from it.
    pub fn report(&self) -> anyhow::Result<String> {
        self.record(0)
    }

    /// Records one run with `perf record` and returns the text of
    /// `perf report` sorted by shared object.
    fn record(&self, i: usize) -> anyhow::Result<String> {
        let data = self.variant.scratch_file("data");
        let mut prefix =
            vec![PERF.to_string(), "record".to_string(), "-q".to_string()];
        if let Some(freq) = self.config.freq {
            prefix.push("-F".to_string());
            prefix.push(freq.to_string());
        }
        prefix.extend([
            "-o".to_string(),
            path_arg(&data)?,
            "--".to_string(),
        ]);
        self.execute(&prefix, i)?;

        let mut cmd = Command::new(PERF);
        cmd.arg("report")
            .arg("-i")
            .arg(&data)
            .arg("--stdio")
            .arg("--sort")
            .arg("dso");
        let out = util::output(&mut cmd)
            .with_context(|| format!("failed to read {}", data.display()))?;
        Ok(out.to_string())
    }

    /// Runs this variant once, behind the given command prefix, with its
    /// fixtures staged around the run. The exit status is checked against
    /// the expected one.
    fn execute(&self, prefix: &[String], i: usize) -> anyhow::Result<()> {
        let mut argv = prefix.to_vec();
        argv.extend(self.variant.invocation()?);
        let rendered = render(&argv);

        self.variant.stage_in()?;
        let out = self.variant.output_path(i);
        let stdout = File::create(&out)
            .with_context(|| format!("failed to create {}", out.display()))?;
        let stdin = match self.variant.def.stdin {
            None => Stdio::null(),
            Some(ref path) => Stdio::from(File::open(path).with_context(
                || format!("failed to open stdin {}", path.display()),
            )?),
        };
        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..]).stdin(stdin).stdout(stdout).stderr(
            if self.config.verbose { Stdio::inherit() } else { Stdio::null() },
        );
        log::debug!("running command: {}", rendered);
        if self.config.verbose {
            writeln!(std::io::stdout(), "{}", rendered)?;
        }
        let status = cmd
            .status()
            .with_context(|| format!("failed to run {}", rendered))?;
        check_status(status, self.variant.def.exp_rc, &rendered)?;
        self.variant.stage_out()?;
        Ok(())
    }
}

/// Serializes tests that write scripts and then run them. A script that is
/// still open for writing, even in a child forked by another thread, can't
/// be executed.
#[cfg(all(test, unix))]
pub(crate) fn script_lock() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    LOCK.lock().unwrap_or_else(|err| err.into_inner())
}

/// Writes an executable shell script with the given body.
#[cfg(all(test, unix))]
pub(crate) fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

/// Returns an `ExitCodeMismatch` error if the given status isn't the
/// expected exit code.
fn check_status(
    status: ExitStatus,
    expected: i32,
    command: &str,
) -> anyhow::Result<()> {
    let actual = status.code();
    if actual == Some(expected) {
        return Ok(());
    }
    Err(anyhow::Error::new(Error::ExitCodeMismatch {
        command: command.to_string(),
        expected,
        actual,
    }))
}

/// Extracts the elapsed seconds from a `perf stat` report.
pub fn parse_elapsed(report: &str) -> Option<f64> {
    let re = regex!(
        r"(?m)^\s*([0-9]+(?:[.,][0-9]+)?)\s+seconds time elapsed",
    );
    let caps = re.captures(report)?;
    caps[1].replace(',', ".").parse().ok()
}

/// Extracts the fraction of samples spent in the given binary from a
/// `perf report --sort dso` report. When `libc` is true, time spent in the
/// C library counts too.
pub fn parse_self_time(
    report: &str,
    binary: &str,
    libc: bool,
) -> anyhow::Result<f64> {
    let re = regex!(r"^\s*([0-9]+(?:\.[0-9]+)?)%\s+(\S+)\s*$");
    let mut found = false;
    let mut total = 0.0;
    for line in report.lines() {
        if line.trim_start().starts_with('#') {
            continue;
        }
        let Some(caps) = re.captures(line) else { continue };
        let dso = &caps[2];
        let is_libc = dso.starts_with("libc.so") || dso.starts_with("libc-");
        if dso == binary {
            found = true;
        } else if !(libc && is_libc) {
            continue;
        }
        let pct: f64 = caps[1]
            .parse()
            .with_context(|| format!("invalid percentage in {:?}", line))?;
        total += pct;
    }
    let reason = if !found {
        "no self-time line"
    } else if total <= 0.0 {
        "self-time is zero"
    } else {
        return Ok(total / 100.0);
    };
    Err(anyhow::Error::new(Error::ProfilerParseFailure {
        binary: binary.to_string(),
        reason: reason.to_string(),
    }))
}

/// Renders a command line the way it could be typed into a shell.
fn render(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            let plain = !arg.is_empty()
                && arg.chars().all(|c| {
                    c.is_ascii_alphanumeric() || "-_./=:{},+".contains(c)
                });
            if plain {
                arg.clone()
            } else {
                format!("'{}'", arg.replace('\'', r"'\''"))
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

fn path_arg(path: &Path) -> anyhow::Result<String> {
    match path.to_str() {
        Some(s) => Ok(s.to_string()),
        None => anyhow::bail!("path {} is not UTF-8", path.display()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
# To display the perf.data header info, please use --header/--header-only.
#
# Total Lost Samples: 0
#
# Samples: 4K of event 'cycles'
# Event count (approx.): 3561239870
#
# Overhead  Shared Object
# ........  ..................
#
    81.52%  rv32-x86-sha-globals
    11.20%  libc.so.6
     6.91%  [kernel.kallsyms]
     0.37%  ld-linux-x86-64.so.2
";

    #[test]
    fn self_time() {
        let with = parse_self_time(REPORT, "rv32-x86-sha-globals", true);
        assert!((with.unwrap() - 0.9272).abs() < 1e-9);
        let without = parse_self_time(REPORT, "rv32-x86-sha-globals", false);
        assert!((without.unwrap() - 0.8152).abs() < 1e-9);
    }

    #[test]
    fn self_time_missing_binary() {
        let err = parse_self_time(REPORT, "x86-sha", true).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::ProfilerParseFailure { binary, .. }) => {
                assert_eq!(binary, "x86-sha");
            }
            _ => panic!("unexpected error: {:#}", err),
        }
    }

    #[test]
    fn self_time_zero() {
        let report = "     0.00%  x86-sha\n   100.00%  [kernel.kallsyms]\n";
        let err = parse_self_time(report, "x86-sha", false).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::ProfilerParseFailure { reason, .. }) => {
                assert_eq!(reason, "self-time is zero");
            }
            _ => panic!("unexpected error: {:#}", err),
        }
    }

    #[test]
    fn elapsed() {
        let report = "
 Performance counter stats for './x86-sha input_large.asc':

          1,372.60 msec task-clock                #    0.999 CPUs utilized
                 4      context-switches          #    2.914 /sec

       1.373941170 seconds time elapsed

       1.361884000 seconds user
       0.011998000 seconds sys
";
        assert_eq!(parse_elapsed(report), Some(1.373941170));
        assert_eq!(parse_elapsed("1.5 seconds user"), None);
    }

    #[test]
    fn rendering() {
        let argv = vec![
            "qemu-riscv32".to_string(),
            "/bin/rv32-susan".to_string(),
            "-e".to_string(),
            "it's here".to_string(),
        ];
        assert_eq!(
            render(&argv),
            r"qemu-riscv32 /bin/rv32-susan -e 'it'\''s here'"
        );
    }

    #[cfg(unix)]
    #[test]
    fn runs_scripts() {
        use crate::{
            format::{definitions::Definition, mode::Mode},
            stats::ModeResult,
        };

        let _lock = script_lock();
        let dir = std::env::temp_dir()
            .join(format!("sbtbench-runner-test-{}", std::process::id()));
        let scratch = dir.join("scratch");
        std::fs::create_dir_all(&scratch).unwrap();
        let script = |name: &str, body: &str| {
            write_script(&dir.join(name), body);
        };
        script("x86-fails", "echo failing\nexit 3");
        script("x86-copy", "cat \"$1\" > \"$2\"\necho copied");
        std::fs::write(dir.join("in.txt"), "fixture\n").unwrap();

        let config = RunConfig {
            samples: 3,
            perf: false,
            ..RunConfig::default()
        };
        let variant = |name: &str, def: Definition| ProgramVariant {
            dir: dir.clone(),
            arch: "x86".to_string(),
            mode: Mode::Native,
            def: Definition { name: name.to_string(), ..def },
            scratch: scratch.clone(),
        };

        // A mismatched exit code carries the command.
        let fails = variant("fails", Definition::default());
        let err = SampleRunner::new(&fails, &config).run(0).unwrap_err();
        match err.downcast_ref::<Error>() {
            Some(Error::ExitCodeMismatch { command, expected, actual }) => {
                assert!(command.ends_with("x86-fails"), "{}", command);
                assert_eq!(*expected, 0);
                assert_eq!(*actual, Some(3));
            }
            _ => panic!("unexpected error: {:#}", err),
        }

        // An expected non-zero exit code is fine.
        let fails = variant(
            "fails",
            Definition { exp_rc: 3, ..Definition::default() },
        );
        let samples = SampleRunner::new(&fails, &config).collect().unwrap();
        assert_eq!(samples.times.len(), 3);
        assert!(samples.pcts.is_empty());
        let result =
            ModeResult::from_samples(Mode::Native, &samples, None).unwrap();
        assert_eq!(result.pct.mean, 1.0);
        assert_eq!(result.slowdown.mean, 1.0);
        let out = std::fs::read_to_string(scratch.join("x86-fails2.out"));
        assert_eq!(out.unwrap(), "failing\n");

        // Staged files go through scratch space and come back out.
        let input = dir.join("in.txt");
        let output = dir.join("{prefix}out{mode}.txt");
        let copy = variant(
            "copy",
            Definition {
                args: vec![
                    input.display().to_string(),
                    output.display().to_string(),
                ],
                stage_in: vec![input.clone()],
                stage_out: vec![output.clone()],
                ..Definition::default()
            },
        );
        SampleRunner::new(&copy, &config).run(0).unwrap();
        let copied = std::fs::read_to_string(dir.join("x86-out.txt"));
        assert_eq!(copied.unwrap(), "fixture\n");
        assert!(scratch.join("x86-copy.in.txt").is_file());
        assert!(scratch.join("x86-copy.x86-out.txt").is_file());

        // A missing binary is reported before anything runs.
        let missing = variant("missing", Definition::default());
        let err = SampleRunner::new(&missing, &config).run(0).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::BinaryNotFound(_))
        ));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
