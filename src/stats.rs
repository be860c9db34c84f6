/*!
Derived statistics for a single benchmark run and their aggregation across
many benchmarks.

A `Field` is a mean with a standard deviation. A `ModeResult` holds the four
fields derived for one mode of one benchmark (time, self-time percentage,
final time and slowdown), and a `ResultSet` holds one `ModeResult` per mode
of a single benchmark. Aggregating many result sets yields a synthetic
"geomean" result set.

Whenever two independent derived quantities are multiplied or divided, the
relative standard deviations are combined in quadrature. That rule lives in
exactly one place: `Field::propagate`.
*/

use crate::format::mode::Mode;

/// The name given to the synthetic row produced by `geomean`.
pub const GEOMEAN: &'static str = "geomean";

/// A mean and a standard deviation.
///
/// This is purely numeric. How many decimal places are shown is up to
/// whoever renders it.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Field {
    pub mean: f64,
    pub sd: f64,
}

impl Field {
    pub fn new(mean: f64, sd: f64) -> Field {
        Field { mean, sd }
    }

    /// A field with the given mean and no spread.
    pub fn constant(mean: f64) -> Field {
        Field { mean, sd: 0.0 }
    }

    /// The starting value for multiplicative accumulation.
    ///
    /// Note that the standard deviation starts at 1 too. Results already
    /// recorded depend on this, so it is kept as is.
    pub fn neutral() -> Field {
        Field { mean: 1.0, sd: 1.0 }
    }

    /// Computes the arithmetic mean and the Bessel corrected sample standard
    /// deviation of the given samples. The standard deviation of a single
    /// sample is zero.
    ///
    /// Returns `None` when there are no samples.
    pub fn from_samples(xs: &[f64]) -> Option<Field> {
        let mean = mean(xs)?;
        let sd = if xs.len() == 1 {
            0.0
        } else {
            let squares: f64 = xs.iter().map(|&x| (x - mean).powi(2)).sum();
            (squares / ((xs.len() - 1) as f64)).sqrt()
        };
        Some(Field { mean, sd })
    }

    /// The product of two independent quantities.
    pub fn product(self, other: Field) -> Field {
        Field::propagate(self.mean * other.mean, self, other)
    }

    /// The ratio of two independent quantities.
    pub fn ratio(self, other: Field) -> Field {
        Field::propagate(self.mean / other.mean, self, other)
    }

    /// Accumulates another field by multiplying means and standard
    /// deviations independently. This is only meant for computing geometric
    /// means and is not an error propagation rule.
    pub fn accumulate(&mut self, other: Field) {
        self.mean *= other.mean;
        self.sd *= other.sd;
    }

    /// Takes the `n`-th root of both the mean and the standard deviation.
    pub fn root(self, n: usize) -> Field {
        let exp = 1.0 / (n as f64);
        Field { mean: self.mean.powf(exp), sd: self.sd.powf(exp) }
    }

    /// The standard deviation relative to the mean. A field with no spread
    /// has a relative deviation of zero, even when its mean is zero. Results
    /// with a non-positive mean are rejected before they get here.
    fn relative_sd(&self) -> f64 {
        if self.sd == 0.0 {
            0.0
        } else {
            self.sd / self.mean
        }
    }

    /// First order propagation of error for a product or quotient of two
    /// independent quantities whose combined mean is `mean`.
    fn propagate(mean: f64, a: Field, b: Field) -> Field {
        let (ra, rb) = (a.relative_sd(), b.relative_sd());
        Field { mean, sd: mean * (ra * ra + rb * rb).sqrt() }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let prec = f.precision().unwrap_or(4);
        write!(f, "{:.*} ± {:.*}", prec, self.mean, prec, self.sd)
    }
}

/// Samples collected for a single program variant.
#[derive(Clone, Debug, Default)]
pub struct Samples {
    /// Elapsed times, in seconds.
    pub times: Vec<f64>,
    /// Self-time fractions in `[0, 1]`. Empty when profiling was skipped.
    pub pcts: Vec<f64>,
}

/// The statistics derived for one mode of one benchmark.
#[derive(Clone, Debug, PartialEq)]
pub struct ModeResult {
    pub mode: Mode,
    pub time: Field,
    pub pct: Field,
    /// `time * pct`, i.e., the time attributable to the binary itself.
    pub final_time: Field,
    /// `final_time` relative to the baseline's `final_time`.
    pub slowdown: Field,
}

impl ModeResult {
    /// Derives a result from raw samples.
    ///
    /// When `baseline` is `None`, this result is the baseline and its
    /// slowdown is exactly `(1, 0)`. An empty percentage series stands for
    /// an unprofiled run and is treated as the constant 1.
    pub fn from_samples(
        mode: Mode,
        samples: &Samples,
        baseline: Option<&ModeResult>,
    ) -> anyhow::Result<ModeResult> {
        let time = match Field::from_samples(&samples.times) {
            Some(time) => time,
            None => anyhow::bail!("no timing samples for mode '{}'", mode),
        };
        anyhow::ensure!(
            time.mean > 0.0,
            "elapsed time for mode '{}' is not positive",
            mode,
        );
        let pct = Field::from_samples(&samples.pcts)
            .unwrap_or_else(|| Field::constant(1.0));
        anyhow::ensure!(
            pct.mean > 0.0,
            "self-time fraction for mode '{}' is not positive",
            mode,
        );
        let final_time = time.product(pct);
        let slowdown = match baseline {
            None => Field::constant(1.0),
            Some(base) => final_time.ratio(base.final_time),
        };
        Ok(ModeResult { mode, time, pct, final_time, slowdown })
    }

    /// Rebuilds a result from the eight values persisted for it, in the
    /// order given by `Metric::ALL`.
    pub fn from_parsed_row(mode: Mode, cells: [f64; 8]) -> ModeResult {
        ModeResult {
            mode,
            time: Field::new(cells[0], cells[1]),
            pct: Field::new(cells[2], cells[3]),
            final_time: Field::new(cells[4], cells[5]),
            slowdown: Field::new(cells[6], cells[7]),
        }
    }

    /// A result whose every field is `Field::neutral()`.
    fn neutral(mode: Mode) -> ModeResult {
        ModeResult {
            mode,
            time: Field::neutral(),
            pct: Field::neutral(),
            final_time: Field::neutral(),
            slowdown: Field::neutral(),
        }
    }

    /// The eight persisted values, in the order given by `Metric::ALL`.
    pub fn cells(&self) -> [f64; 8] {
        [
            self.time.mean,
            self.time.sd,
            self.pct.mean,
            self.pct.sd,
            self.final_time.mean,
            self.final_time.sd,
            self.slowdown.mean,
            self.slowdown.sd,
        ]
    }

    fn fields_mut(&mut self) -> [&mut Field; 4] {
        [
            &mut self.time,
            &mut self.pct,
            &mut self.final_time,
            &mut self.slowdown,
        ]
    }

    fn fields(&self) -> [Field; 4] {
        [self.time, self.pct, self.final_time, self.slowdown]
    }
}

impl std::fmt::Display for ModeResult {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "{:<8} time={:.4} pct={:.3} final={:.4} slowdown={:.3}",
            self.mode.name(),
            self.time,
            self.pct,
            self.final_time,
            self.slowdown,
        )
    }
}

/// All of the results for a single benchmark, one per mode. The first result
/// is always for the native mode.
#[derive(Clone, Debug, PartialEq)]
pub struct ResultSet {
    pub name: String,
    pub results: Vec<ModeResult>,
}

impl ResultSet {
    pub fn new(
        name: String,
        results: Vec<ModeResult>,
    ) -> anyhow::Result<ResultSet> {
        anyhow::ensure!(
            results.first().map_or(false, |r| r.mode == Mode::Native),
            "results for '{}' must start with the native mode",
            name,
        );
        for (i, r) in results.iter().enumerate() {
            anyhow::ensure!(
                !results[..i].iter().any(|prev| prev.mode == r.mode),
                "duplicate results for mode '{}' in '{}'",
                r.mode,
                name,
            );
        }
        Ok(ResultSet { name, results })
    }

    pub fn modes(&self) -> Vec<Mode> {
        self.results.iter().map(|r| r.mode).collect()
    }
}

/// Computes the geometric mean of every field, per mode, across all of the
/// given result sets.
///
/// Every result set must have the same modes in the same order.
pub fn geomean(sets: &[ResultSet]) -> anyhow::Result<ResultSet> {
    let first = match sets.first() {
        Some(first) => first,
        None => anyhow::bail!("cannot compute geometric mean of zero rows"),
    };
    let modes = first.modes();
    let mut acc: Vec<ModeResult> =
        modes.iter().map(|&m| ModeResult::neutral(m)).collect();
    for set in sets.iter() {
        anyhow::ensure!(
            set.modes() == modes,
            "row '{}' has modes {:?} but expected {:?}",
            set.name,
            set.modes(),
            modes,
        );
        for (total, r) in acc.iter_mut().zip(set.results.iter()) {
            for (t, x) in total.fields_mut().into_iter().zip(r.fields()) {
                t.accumulate(x);
            }
        }
    }
    for total in acc.iter_mut() {
        for t in total.fields_mut() {
            *t = t.root(sets.len());
        }
    }
    ResultSet::new(GEOMEAN.to_string(), acc)
}

fn mean(xs: &[f64]) -> Option<f64> {
    if xs.is_empty() {
        None
    } else {
        let sum: f64 = xs.iter().sum();
        Some(sum / (xs.len() as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(time: f64, pct: f64, n: usize) -> Samples {
        Samples { times: vec![time; n], pcts: vec![pct; n] }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-12
    }

    #[test]
    fn single_sample_has_no_spread() {
        let f = Field::from_samples(&[3.25]).unwrap();
        assert_eq!(f, Field::new(3.25, 0.0));
        assert!(Field::from_samples(&[]).is_none());
    }

    #[test]
    fn bessel_corrected() {
        let f = Field::from_samples(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0])
            .unwrap();
        assert!(close(f.mean, 5.0));
        // Population sd would be 2.0; the sample sd is sqrt(32/7).
        assert!(close(f.sd, (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn final_without_spread() {
        let r = ModeResult::from_samples(
            Mode::Native,
            &samples(0.5, 0.25, 4),
            None,
        )
        .unwrap();
        assert_eq!(r.final_time.mean, 0.5 * 0.25);
        assert_eq!(r.final_time.sd, 0.0);
    }

    #[test]
    fn final_propagates_in_quadrature() {
        let s = Samples { times: vec![1.0, 3.0], pcts: vec![0.5, 0.5] };
        let r = ModeResult::from_samples(Mode::Native, &s, None).unwrap();
        let tsd = 2.0f64.sqrt();
        assert!(close(r.time.sd, tsd));
        assert!(close(r.final_time.mean, 1.0));
        assert!(close(r.final_time.sd, 1.0 * (tsd / 2.0)));
    }

    #[test]
    fn baseline_slowdown_is_one() {
        let s = Samples { times: vec![1.0, 1.2, 0.9], pcts: vec![] };
        let r = ModeResult::from_samples(Mode::Native, &s, None).unwrap();
        assert_eq!(r.slowdown, Field::new(1.0, 0.0));
        assert_eq!(r.pct, Field::new(1.0, 0.0));
    }

    #[test]
    fn dijkstra_scenario() {
        let native = ModeResult::from_samples(
            Mode::Native,
            &samples(1.0, 1.0, 10),
            None,
        )
        .unwrap();
        assert_eq!(native.time, Field::new(1.0, 0.0));
        assert_eq!(native.pct, Field::new(1.0, 0.0));
        assert_eq!(native.final_time, Field::new(1.0, 0.0));
        assert_eq!(native.slowdown, Field::new(1.0, 0.0));

        let globals = ModeResult::from_samples(
            Mode::Globals,
            &samples(1.5, 0.9, 10),
            Some(&native),
        )
        .unwrap();
        assert!(close(globals.time.mean, 1.5));
        assert_eq!(globals.time.sd, 0.0);
        // Summing 0.9 ten times is not exact, so allow for rounding.
        assert!(close(globals.pct.mean, 0.9));
        assert!(close(globals.pct.sd, 0.0));
        assert!(close(globals.final_time.mean, 1.35));
        assert!(close(globals.final_time.sd, 0.0));
        assert!(close(globals.slowdown.mean, 1.35));
        assert!(close(globals.slowdown.sd, 0.0));
    }

    #[test]
    fn slowdown_propagates_both_errors() {
        let base = ModeResult::from_parsed_row(
            Mode::Native,
            [1.0, 0.0, 1.0, 0.0, 2.0, 0.2, 1.0, 0.0],
        );
        let s = Samples { times: vec![3.0, 5.0], pcts: vec![] };
        let r =
            ModeResult::from_samples(Mode::Locals, &s, Some(&base)).unwrap();
        assert!(close(r.slowdown.mean, 2.0));
        let rel = ((2.0f64.sqrt() / 4.0).powi(2) + 0.1f64.powi(2)).sqrt();
        assert!(close(r.slowdown.sd, 2.0 * rel));
    }

    #[test]
    fn non_positive_means_are_rejected() {
        let s = Samples { times: vec![0.0, 0.0], pcts: vec![] };
        assert!(ModeResult::from_samples(Mode::Native, &s, None).is_err());
        let s = Samples { times: vec![1.0], pcts: vec![0.0] };
        assert!(ModeResult::from_samples(Mode::Native, &s, None).is_err());
    }

    #[test]
    fn result_set_requires_native_first() {
        let r = ModeResult::from_parsed_row(Mode::Globals, [1.0; 8]);
        assert!(ResultSet::new("x".to_string(), vec![r.clone()]).is_err());
        let n = ModeResult::from_parsed_row(Mode::Native, [1.0; 8]);
        assert!(ResultSet::new("x".to_string(), vec![n.clone(), r]).is_ok());
        assert!(ResultSet::new("x".to_string(), vec![n.clone(), n]).is_err());
    }

    #[test]
    fn geomean_of_one_is_identity() {
        let set = ResultSet::new(
            "crc".to_string(),
            vec![
                ModeResult::from_parsed_row(
                    Mode::Native,
                    [0.37, 0.01, 0.93, 0.02, 0.3441, 0.0113, 1.0, 0.0],
                ),
                ModeResult::from_parsed_row(
                    Mode::Globals,
                    [0.71, 0.03, 0.88, 0.01, 0.6248, 0.0281, 1.816, 0.09],
                ),
            ],
        )
        .unwrap();
        let gm = geomean(&[set.clone()]).unwrap();
        assert_eq!(gm.name, GEOMEAN);
        for (got, want) in gm.results.iter().zip(set.results.iter()) {
            for (g, w) in got.fields().iter().zip(want.fields().iter()) {
                assert_eq!(g.mean, w.mean);
            }
        }
    }

    #[test]
    fn geomean_of_two() {
        let row = |name: &str, fin: f64| {
            ResultSet::new(
                name.to_string(),
                vec![
                    ModeResult::from_parsed_row(Mode::Native, [1.0; 8]),
                    ModeResult::from_parsed_row(
                        Mode::Locals,
                        [1.0, 0.0, 1.0, 0.0, fin, 0.0, fin, 0.0],
                    ),
                ],
            )
            .unwrap()
        };
        let gm = geomean(&[row("a", 2.0), row("b", 8.0)]).unwrap();
        let locals = &gm.results[1];
        assert_eq!(locals.mode, Mode::Locals);
        assert!(close(locals.final_time.mean, 4.0));
        assert!(close(locals.slowdown.mean, 4.0));
        assert_eq!(locals.final_time.sd, 0.0);
        // sd accumulates multiplicatively from 1, not in quadrature.
        let native = &gm.results[0];
        assert!(close(native.time.sd, 1.0));
    }

    #[test]
    fn geomean_rejects_mismatched_modes() {
        let a = ResultSet::new(
            "a".to_string(),
            vec![ModeResult::from_parsed_row(Mode::Native, [1.0; 8])],
        )
        .unwrap();
        let b = ResultSet::new(
            "b".to_string(),
            vec![
                ModeResult::from_parsed_row(Mode::Native, [1.0; 8]),
                ModeResult::from_parsed_row(Mode::Globals, [1.0; 8]),
            ],
        )
        .unwrap();
        assert!(geomean(&[a, b]).is_err());
        assert!(geomean(&[]).is_err());
    }
}
