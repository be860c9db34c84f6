/// A named execution variant of a benchmark.
///
/// `Native` is the baseline that every other mode is compared against.
/// `Globals` and `Locals` are binaries produced by the translator with its
/// two register allocation strategies, and `Emulated` runs the untranslated
/// RISC-V binary under a full emulator.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Mode {
    Native,
    Globals,
    Locals,
    Emulated,
}

impl Mode {
    /// The modes measured by default.
    pub const DEFAULT: &'static [Mode] =
        &[Mode::Native, Mode::Globals, Mode::Locals];

    /// The modes measured when comparing against emulation.
    pub const EMULATION: &'static [Mode] = &[Mode::Native, Mode::Emulated];

    pub fn name(&self) -> &'static str {
        match *self {
            Mode::Native => "native",
            Mode::Globals => "globals",
            Mode::Locals => "locals",
            Mode::Emulated => "emulated",
        }
    }

    /// Whether binaries for this mode come out of the translator.
    pub fn is_translated(&self) -> bool {
        matches!(*self, Mode::Globals | Mode::Locals)
    }

    /// Whether a self-time percentage can be meaningfully sampled for this
    /// mode. Under emulation, the profiler only ever sees the emulator.
    pub fn is_profilable(&self) -> bool {
        !matches!(*self, Mode::Emulated)
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Mode> {
        let mode = match s {
            "native" => Mode::Native,
            "globals" => Mode::Globals,
            "locals" => Mode::Locals,
            "emulated" => Mode::Emulated,
            unknown => anyhow::bail!(
                "unrecognized mode '{}', must be one of \
                 native, globals, locals or emulated",
                unknown,
            ),
        };
        Ok(mode)
    }
}

/// One of the eight values persisted per mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Metric {
    TimeMean,
    TimeSd,
    PctMean,
    PctSd,
    FinalMean,
    FinalSd,
    SlowdownMean,
    SlowdownSd,
}

impl Metric {
    /// Every metric, in the order they are stored within a mode's group of
    /// columns.
    pub const ALL: [Metric; 8] = [
        Metric::TimeMean,
        Metric::TimeSd,
        Metric::PctMean,
        Metric::PctSd,
        Metric::FinalMean,
        Metric::FinalSd,
        Metric::SlowdownMean,
        Metric::SlowdownSd,
    ];

    pub fn label(&self) -> &'static str {
        match *self {
            Metric::TimeMean => "time",
            Metric::TimeSd => "time-sd",
            Metric::PctMean => "pct",
            Metric::PctSd => "pct-sd",
            Metric::FinalMean => "final",
            Metric::FinalSd => "final-sd",
            Metric::SlowdownMean => "slowdown",
            Metric::SlowdownSd => "slowdown-sd",
        }
    }

    /// The number of decimal places used to write this metric, both in the
    /// store and on screen.
    pub fn precision(&self) -> usize {
        match *self {
            Metric::TimeMean
            | Metric::TimeSd
            | Metric::FinalMean
            | Metric::FinalSd => 4,
            Metric::PctMean
            | Metric::PctSd
            | Metric::SlowdownMean
            | Metric::SlowdownSd => 3,
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl std::str::FromStr for Metric {
    type Err = anyhow::Error;

    /// Accepts a label (with or without a `-mean` suffix) or an index into
    /// `Metric::ALL`.
    fn from_str(s: &str) -> anyhow::Result<Metric> {
        if let Ok(i) = s.parse::<usize>() {
            return match Metric::ALL.get(i) {
                Some(&m) => Ok(m),
                None => anyhow::bail!(
                    "column index {} out of range, must be less than 8",
                    i,
                ),
            };
        }
        let label = s.strip_suffix("-mean").unwrap_or(s);
        match Metric::ALL.iter().find(|m| m.label() == label) {
            Some(&m) => Ok(m),
            None => anyhow::bail!(
                "unrecognized column '{}', must be an index 0-7 or one of \
                 time, time-sd, pct, pct-sd, final, final-sd, slowdown or \
                 slowdown-sd",
                s,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_and_indices() {
        assert_eq!(Metric::FinalMean, "final-mean".parse().unwrap());
        assert_eq!(Metric::FinalMean, "final".parse().unwrap());
        assert_eq!(Metric::SlowdownMean, "6".parse().unwrap());
        assert_eq!(Metric::SlowdownSd, "7".parse().unwrap());
        assert!("8".parse::<Metric>().is_err());
        assert!("speed".parse::<Metric>().is_err());
        for (i, m) in Metric::ALL.iter().enumerate() {
            assert_eq!(*m, i.to_string().parse().unwrap());
            assert_eq!(*m, m.label().parse().unwrap());
        }
    }

    #[test]
    fn mode_round_trip() {
        for &m in &[Mode::Native, Mode::Globals, Mode::Locals, Mode::Emulated]
        {
            assert_eq!(m, m.name().parse().unwrap());
        }
        assert!("abi".parse::<Mode>().is_err());
    }
}
