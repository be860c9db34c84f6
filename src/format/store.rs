/*!
The CSV store that results are appended to, and the table it is read into
for printing and transforming.

The schema is positional. The first header row names each mode once, at the
start of its group of columns. The second header row names the metric of each
column. Every data row is a benchmark name followed by one value per column.
A store written by `measure` always has all eight metrics per mode. A store
rewritten by `xform` may have fewer, and carries a trailing geomean row.
*/

use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
};

use {anyhow::Context, unicode_width::UnicodeWidthStr};

use crate::{
    error::Error,
    format::mode::{Metric, Mode},
    stats::{self, ModeResult, ResultSet},
    util::{colorize_label, write_divider},
};

/// Benchmark names are abbreviated when a store is read. They are never
/// expanded back when written.
const ABBREVIATIONS: &[(&str, &str)] = &[("encode", "enc"), ("decode", "dec")];

/// A projection onto a subset of modes and metrics. An empty list means
/// "keep everything" for that axis.
#[derive(Clone, Debug, Default)]
pub struct Projection {
    pub modes: Vec<Mode>,
    pub metrics: Vec<Metric>,
}

/// A single data row.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    pub name: String,
    pub cells: Vec<f64>,
}

impl Row {
    fn from_result_set(set: &ResultSet) -> Row {
        let cells = set.results.iter().flat_map(|r| r.cells()).collect();
        Row { name: set.name.clone(), cells }
    }
}

/// An in-memory rendition of a store.
#[derive(Clone, Debug)]
pub struct Table {
    pub modes: Vec<Mode>,
    /// The metrics present for every mode, in column order.
    pub metrics: Vec<Metric>,
    pub rows: Vec<Row>,
    /// The synthetic geometric mean row, if there is one.
    pub geomean: Option<Row>,
}

impl Table {
    /// Create an empty table with every metric for each of the given modes.
    pub fn new(modes: Vec<Mode>) -> Table {
        Table {
            modes,
            metrics: Metric::ALL.to_vec(),
            rows: vec![],
            geomean: None,
        }
    }

    /// Builds a table from the given result sets. All of them must share
    /// the same modes. There must be at least one.
    pub fn from_result_sets(sets: &[ResultSet]) -> anyhow::Result<Table> {
        let first = match sets.first() {
            Some(first) => first,
            None => anyhow::bail!("cannot build a table without any rows"),
        };
        let mut table = Table::new(first.modes());
        for set in sets.iter() {
            table.push(set)?;
        }
        Ok(table)
    }

    /// Returns true when every metric is present for every mode.
    pub fn is_full(&self) -> bool {
        self.metrics == Metric::ALL
    }

    /// Returns true when each row can be turned back into a `ResultSet`.
    /// That needs every metric, and native as the first mode.
    pub fn is_rebuildable(&self) -> bool {
        self.is_full() && self.modes.first() == Some(&Mode::Native)
    }

    /// The number of cells in every row, including the name.
    pub fn width(&self) -> usize {
        1 + self.modes.len() * self.metrics.len()
    }

    /// Adds the given result set as a new row.
    pub fn push(&mut self, set: &ResultSet) -> anyhow::Result<()> {
        if !self.is_full() || set.modes() != self.modes {
            return Err(Error::config(format!(
                "cannot add '{}' with modes {} to a table with modes {} \
                 and {} metrics per mode",
                set.name,
                mode_list(&set.modes()),
                mode_list(&self.modes),
                self.metrics.len(),
            )));
        }
        self.rows.push(Row::from_result_set(set));
        Ok(())
    }

    /// Rebuilds a result set from every row. This fails when the table has
    /// been projected onto a subset of its metrics or away from native.
    pub fn result_sets(&self) -> anyhow::Result<Vec<ResultSet>> {
        if !self.is_rebuildable() {
            return Err(Error::config(
                "results cannot be rebuilt from a projected store",
            ));
        }
        let mut sets = vec![];
        for row in self.rows.iter() {
            let mut results = vec![];
            for (i, &mode) in self.modes.iter().enumerate() {
                let start = i * Metric::ALL.len();
                let cells: [f64; 8] = row.cells
                    [start..start + Metric::ALL.len()]
                    .try_into()
                    .expect("row width is checked on read");
                results.push(ModeResult::from_parsed_row(mode, cells));
            }
            sets.push(ResultSet::new(row.name.clone(), results)?);
        }
        Ok(sets)
    }

    /// Computes a fresh geomean row (when the table is rebuildable and
    /// non-empty) and then applies the given projection.
    ///
    /// A table that has already been projected keeps whatever geomean row
    /// it was stored with.
    pub fn summarize(
        &self,
        projection: &Projection,
    ) -> anyhow::Result<Table> {
        let mut table = self.clone();
        if self.is_rebuildable() && !self.rows.is_empty() {
            if self.geomean.is_some() {
                log::warn!("dropping stored geomean row, recomputing it");
            }
            let gm = stats::geomean(&self.result_sets()?)?;
            table.geomean = Some(Row::from_result_set(&gm));
        }
        table.project(projection)
    }

    /// Projects this table onto the modes and metrics given, in the order
    /// given. Asking for a mode or metric that isn't in this table, or for
    /// the same one twice, is a configuration error.
    pub fn project(&self, projection: &Projection) -> anyhow::Result<Table> {
        if let Some(mode) = first_duplicate(&projection.modes) {
            return Err(Error::config(format!(
                "mode '{}' is given more than once",
                mode
            )));
        }
        if let Some(metric) = first_duplicate(&projection.metrics) {
            return Err(Error::config(format!(
                "column '{}' is given more than once",
                metric
            )));
        }
        let modes = if projection.modes.is_empty() {
            self.modes.clone()
        } else {
            projection.modes.clone()
        };
        let metrics = if projection.metrics.is_empty() {
            self.metrics.clone()
        } else {
            projection.metrics.clone()
        };
        let mut indices = vec![];
        for &mode in modes.iter() {
            let Some(mi) = self.modes.iter().position(|&m| m == mode) else {
                return Err(Error::config(format!(
                    "mode '{}' is not in the store, which has {}",
                    mode,
                    mode_list(&self.modes),
                )));
            };
            for &metric in metrics.iter() {
                let Some(ci) = self.metrics.iter().position(|&c| c == metric)
                else {
                    return Err(Error::config(format!(
                        "column '{}' is not in the store",
                        metric,
                    )));
                };
                indices.push(mi * self.metrics.len() + ci);
            }
        }
        let pick = |row: &Row| Row {
            name: row.name.clone(),
            cells: indices.iter().map(|&i| row.cells[i]).collect(),
        };
        Ok(Table {
            modes,
            metrics,
            rows: self.rows.iter().map(&pick).collect(),
            geomean: self.geomean.as_ref().map(&pick),
        })
    }

    /// Reads a table from CSV data.
    ///
    /// Any row (including the headers) that doesn't fit the schema results
    /// in a `MalformedStoreRow` error for the whole read.
    pub fn read<R: std::io::Read>(rdr: R) -> anyhow::Result<Table> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(rdr);
        let mut records = rdr.records();
        let mut table = Table::read_schema(&mut records)?;
        let width = table.width();
        for result in records {
            let record = result.context("failed to read store row")?;
            let line = record.position().map_or(0, |p| p.line());
            if record.len() != width {
                return Err(Error::malformed(
                    line,
                    format!(
                        "expected {} cells but found {}",
                        width,
                        record.len()
                    ),
                ));
            }
            let mut cells = vec![];
            for (i, field) in record.iter().enumerate().skip(1) {
                let v = field.trim().parse::<f64>().map_err(|_| {
                    Error::malformed(
                        line,
                        format!("cell {} is not a number: {:?}", i, field),
                    )
                })?;
                cells.push(v);
            }
            let row = Row { name: normalize_name(&record[0]), cells };
            if row.name == stats::GEOMEAN {
                table.geomean = Some(row);
            } else {
                table.rows.push(row);
            }
        }
        Ok(table)
    }

    /// Reads only the two header rows from the given records and returns an
    /// empty table with that schema.
    fn read_schema<R: std::io::Read>(
        records: &mut csv::StringRecordsIter<'_, R>,
    ) -> anyhow::Result<Table> {
        let mut next = |which: &str| -> anyhow::Result<csv::StringRecord> {
            match records.next() {
                Some(result) => result.context("failed to read store header"),
                None => Err(Error::malformed(
                    0,
                    format!("missing {} header row", which),
                )),
            }
        };
        let groups = next("first")?;
        let labels = next("second")?;
        let line = labels.position().map_or(0, |p| p.line());
        anyhow::ensure!(
            groups.len() == labels.len(),
            Error::MalformedStoreRow {
                line,
                reason: format!(
                    "header rows have {} and {} cells",
                    groups.len(),
                    labels.len(),
                ),
            },
        );

        let mut modes = vec![];
        let mut starts = vec![];
        for (i, cell) in groups.iter().enumerate().skip(1) {
            if cell.trim().is_empty() {
                continue;
            }
            let mode = cell.trim().parse::<Mode>().map_err(|err| {
                Error::malformed(line.saturating_sub(1), format!("{:#}", err))
            })?;
            if modes.contains(&mode) {
                return Err(Error::malformed(
                    line.saturating_sub(1),
                    format!("duplicate mode '{}'", mode),
                ));
            }
            modes.push(mode);
            starts.push(i);
        }
        if modes.is_empty() {
            return Err(Error::malformed(
                line.saturating_sub(1),
                "no modes in header",
            ));
        }
        let per_mode = starts.get(1).map_or(groups.len(), |&s| s) - starts[0];
        if starts[0] != 1
            || per_mode == 0
            || groups.len() != 1 + per_mode * modes.len()
            || starts.iter().enumerate().any(|(i, &s)| s != 1 + i * per_mode)
        {
            return Err(Error::malformed(
                line.saturating_sub(1),
                "mode groups in header are not evenly sized",
            ));
        }

        let mut metrics = vec![];
        for cell in labels.iter().skip(1).take(per_mode) {
            let metric = cell
                .trim()
                .parse::<Metric>()
                .map_err(|err| Error::malformed(line, format!("{:#}", err)))?;
            if metrics.contains(&metric) {
                return Err(Error::malformed(
                    line,
                    format!("duplicate column '{}'", metric),
                ));
            }
            metrics.push(metric);
        }
        for (i, cell) in labels.iter().enumerate().skip(1) {
            let want = metrics[(i - 1) % per_mode].label();
            if cell.trim() != want {
                return Err(Error::malformed(
                    line,
                    format!("expected column '{}' but found '{}'", want, cell),
                ));
            }
        }
        Ok(Table { modes, metrics, rows: vec![], geomean: None })
    }

    /// Writes this table, headers included, as CSV.
    pub fn write<W: std::io::Write>(&self, wtr: W) -> anyhow::Result<()> {
        let mut wtr = csv::WriterBuilder::new().from_writer(wtr);
        for record in self.header() {
            wtr.write_record(&record)?;
        }
        for row in self.rows.iter().chain(self.geomean.iter()) {
            wtr.write_record(&self.record(row))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Prints this table with aligned columns. The geomean row, if present,
    /// is printed last and highlighted.
    pub fn print<W: termcolor::WriteColor>(
        &self,
        mut wtr: W,
    ) -> anyhow::Result<()> {
        let [groups, labels] = self.header();
        writeln!(wtr, "{}", groups.join("\t"))?;
        writeln!(wtr, "{}", labels.join("\t"))?;
        for (i, label) in labels.iter().enumerate() {
            if i > 0 {
                write!(wtr, "\t")?;
            }
            let width = std::cmp::max(label.width(), groups[i].width());
            write_divider(&mut wtr, '-', std::cmp::max(1, width))?;
        }
        writeln!(wtr, "")?;
        for row in self.rows.iter() {
            writeln!(wtr, "{}", self.record(row).join("\t"))?;
        }
        if let Some(ref gm) = self.geomean {
            let record = self.record(gm);
            colorize_label(&mut wtr, |w| write!(w, "{}", record[0]))?;
            writeln!(wtr, "\t{}", record[1..].join("\t"))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// The two header rows.
    fn header(&self) -> [Vec<String>; 2] {
        let mut groups = vec!["benchmark".to_string()];
        let mut labels = vec![String::new()];
        for mode in self.modes.iter() {
            for (i, metric) in self.metrics.iter().enumerate() {
                groups.push(if i == 0 {
                    mode.name().to_string()
                } else {
                    String::new()
                });
                labels.push(metric.label().to_string());
            }
        }
        [groups, labels]
    }

    /// Formats the given row, with each value written at its metric's
    /// precision.
    fn record(&self, row: &Row) -> Vec<String> {
        let mut record = vec![row.name.clone()];
        for (i, &v) in row.cells.iter().enumerate() {
            let metric = self.metrics[i % self.metrics.len()];
            record.push(format!("{:.*}", metric.precision(), v));
        }
        record
    }
}

/// A store file on disk.
#[derive(Clone, Debug)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    pub fn new<P: AsRef<Path>>(path: P) -> Store {
        Store { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the entire store.
    pub fn read(&self) -> anyhow::Result<Table> {
        let file = File::open(&self.path).with_context(|| {
            format!("failed to open store {}", self.path.display())
        })?;
        Table::read(std::io::BufReader::new(file))
            .with_context(|| format!("failed to read {}", self.path.display()))
    }

    /// Appends one row to the store without rewriting any existing rows.
    ///
    /// If the store doesn't exist yet (or is empty), it is created with
    /// headers matching the modes in the given result set. Otherwise, the
    /// result set's modes must match those in the store's header.
    pub fn append(&self, set: &ResultSet) -> anyhow::Result<()> {
        let is_new = match std::fs::metadata(&self.path) {
            Ok(md) => md.len() == 0,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => true,
            Err(err) => {
                return Err(anyhow::Error::from(err).context(format!(
                    "failed to stat store {}",
                    self.path.display()
                )))
            }
        };
        let mut table = if is_new {
            Table::new(set.modes())
        } else {
            let file = File::open(&self.path).with_context(|| {
                format!("failed to open store {}", self.path.display())
            })?;
            let mut rdr = csv::ReaderBuilder::new()
                .has_headers(false)
                .flexible(true)
                .from_reader(std::io::BufReader::new(file));
            Table::read_schema(&mut rdr.records()).with_context(|| {
                format!("failed to read header of {}", self.path.display())
            })?
        };
        table.push(set)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| {
                format!("failed to open {} for append", self.path.display())
            })?;
        let mut wtr = csv::WriterBuilder::new().from_writer(file);
        if is_new {
            for record in table.header() {
                wtr.write_record(&record)?;
            }
        }
        wtr.write_record(&table.record(&table.rows[0]))?;
        wtr.flush()?;
        Ok(())
    }

    /// Reads the store, computes a geomean row and prints the given
    /// projection of it. The store itself is left untouched.
    pub fn print<W: termcolor::WriteColor>(
        &self,
        projection: &Projection,
        wtr: W,
    ) -> anyhow::Result<()> {
        self.read()?.summarize(projection)?.print(wtr)
    }

    /// Like `print`, but instead of printing the projection, the store is
    /// overwritten with it. The data that was projected away is lost.
    pub fn transform(&self, projection: &Projection) -> anyhow::Result<Table> {
        let table = self.read()?.summarize(projection)?;
        let file = File::create(&self.path).with_context(|| {
            format!("failed to rewrite store {}", self.path.display())
        })?;
        table.write(std::io::BufWriter::new(file))?;
        log::info!(
            "rewrote {} with {} rows",
            self.path.display(),
            table.rows.len()
        );
        Ok(table)
    }
}

/// Abbreviates long phase names at the end of a benchmark name.
fn normalize_name(name: &str) -> String {
    let name = name.trim();
    for &(long, short) in ABBREVIATIONS.iter() {
        if let Some(stem) = name.strip_suffix(long) {
            return format!("{}{}", stem, short);
        }
    }
    name.to_string()
}

fn first_duplicate<T: Copy + PartialEq>(xs: &[T]) -> Option<T> {
    xs.iter()
        .enumerate()
        .find(|&(i, x)| xs[..i].contains(x))
        .map(|(_, &x)| x)
}

fn mode_list(modes: &[Mode]) -> String {
    modes.iter().map(|m| m.name()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(mode: Mode, cells: [f64; 8]) -> ModeResult {
        ModeResult::from_parsed_row(mode, cells)
    }

    fn three_modes(name: &str, fin: f64) -> ResultSet {
        ResultSet::new(
            name.to_string(),
            vec![
                result(
                    Mode::Native,
                    [1.0, 0.01, 0.9, 0.0, 0.9, 0.009, 1.0, 0.0],
                ),
                result(
                    Mode::Globals,
                    [1.5, 0.02, 0.9, 0.0, 1.35, 0.018, 1.5, 0.025],
                ),
                result(
                    Mode::Locals,
                    [2.0, 0.03, 0.9, 0.0, fin, 0.027, fin / 0.9, 0.03],
                ),
            ],
        )
        .unwrap()
    }

    fn to_csv(table: &Table) -> String {
        let mut buf = vec![];
        table.write(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn malformed(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MalformedStoreRow { .. })
        )
    }

    #[test]
    fn header_layout() {
        let table = Table::new(vec![Mode::Native, Mode::Globals]);
        let csv = to_csv(&table);
        let mut lines = csv.lines();
        assert_eq!(
            lines.next().unwrap(),
            "benchmark,native,,,,,,,,globals,,,,,,,"
        );
        assert_eq!(
            lines.next().unwrap(),
            ",time,time-sd,pct,pct-sd,final,final-sd,slowdown,slowdown-sd,\
             time,time-sd,pct,pct-sd,final,final-sd,slowdown,slowdown-sd"
        );
        assert!(lines.next().is_none());
    }

    #[test]
    fn round_trip_within_precision() {
        let set = ResultSet::new(
            "sha".to_string(),
            vec![
                result(
                    Mode::Native,
                    [0.123456, 0.0012345, 0.87654, 0.01234, 0.10821, 0.00151,
                     1.0, 0.0],
                ),
                result(
                    Mode::Locals,
                    [0.31415, 0.00271, 0.9133, 0.0071, 0.28691, 0.00333,
                     2.65138, 0.04457],
                ),
            ],
        )
        .unwrap();
        let table = Table::from_result_sets(&[set.clone()]).unwrap();
        let got = Table::read(to_csv(&table).as_bytes()).unwrap();
        assert_eq!(got.modes, vec![Mode::Native, Mode::Locals]);
        assert!(got.is_full());
        let sets = got.result_sets().unwrap();
        assert_eq!(sets.len(), 1);
        for (r1, r2) in set.results.iter().zip(sets[0].results.iter()) {
            assert_eq!(r1.mode, r2.mode);
            let pairs = r1.cells().into_iter().zip(r2.cells());
            for (metric, (a, b)) in Metric::ALL.iter().zip(pairs) {
                let tolerance = 0.5 * 10f64.powi(-(metric.precision() as i32));
                assert!(
                    (a - b).abs() <= tolerance + 1e-12,
                    "{}: {} vs {}",
                    metric,
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn names_are_abbreviated_on_read_only() {
        let set = three_modes("rijndael-encode", 2.0);
        let table = Table::from_result_sets(&[set]).unwrap();
        let csv = to_csv(&table);
        assert!(csv.contains("rijndael-encode,"));
        let got = Table::read(csv.as_bytes()).unwrap();
        assert_eq!(got.rows[0].name, "rijndael-enc");
        assert_eq!(normalize_name("blowfish-decode"), "blowfish-dec");
        assert_eq!(normalize_name("dijkstra"), "dijkstra");
    }

    #[test]
    fn project_modes_and_columns() {
        let table = Table::from_result_sets(&[
            three_modes("a", 2.0),
            three_modes("b", 8.0),
        ])
        .unwrap();
        let projection = Projection {
            modes: vec![Mode::Native, Mode::Locals],
            metrics: vec![Metric::FinalMean, Metric::SlowdownMean],
        };
        let got = Table::read(to_csv(&table).as_bytes())
            .unwrap()
            .project(&projection)
            .unwrap();
        assert_eq!(got.width(), 5);
        let csv = to_csv(&got);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "benchmark,native,,locals,");
        assert_eq!(lines[1], ",final,slowdown,final,slowdown");
        assert_eq!(lines[2], "a,0.9000,1.000,2.0000,2.222");
        assert_eq!(lines[2].split(',').count(), 5);
        assert_eq!(lines[3].split(',').count(), 5);
    }

    #[test]
    fn summarize_appends_geomean() {
        let table = Table::from_result_sets(&[
            three_modes("a", 2.0),
            three_modes("b", 8.0),
        ])
        .unwrap();
        let projection = Projection {
            modes: vec![Mode::Locals],
            metrics: vec![Metric::FinalMean],
        };
        let got = table.summarize(&projection).unwrap();
        let gm = got.geomean.unwrap();
        assert_eq!(gm.name, stats::GEOMEAN);
        assert!((gm.cells[0] - 4.0).abs() < 1e-12);
        assert_eq!(got.rows.len(), 2);
    }

    #[test]
    fn projected_store_can_be_reread() {
        let table = Table::from_result_sets(&[
            three_modes("a", 2.0),
            three_modes("b", 8.0),
        ])
        .unwrap();
        let projection = Projection {
            modes: vec![Mode::Globals, Mode::Locals],
            metrics: vec![Metric::SlowdownMean, Metric::SlowdownSd],
        };
        let projected = table.summarize(&projection).unwrap();
        let got = Table::read(to_csv(&projected).as_bytes()).unwrap();
        assert!(!got.is_full());
        assert_eq!(got.rows.len(), 2);
        assert!(got.geomean.is_some());
        assert!(got.result_sets().is_err());
        // Still projectable onto a subset.
        let narrower = got
            .summarize(&Projection {
                modes: vec![Mode::Locals],
                metrics: vec![Metric::SlowdownMean],
            })
            .unwrap();
        assert_eq!(narrower.width(), 2);
        assert!(narrower.geomean.is_some());
        // But not onto something it no longer has.
        let err = got
            .project(&Projection {
                modes: vec![Mode::Native],
                metrics: vec![],
            })
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));
    }

    #[test]
    fn store_without_native_can_be_reread() {
        let table = Table::from_result_sets(&[
            three_modes("a", 2.0),
            three_modes("b", 8.0),
        ])
        .unwrap();
        let projected = table
            .summarize(&Projection {
                modes: vec![Mode::Globals, Mode::Locals],
                metrics: vec![],
            })
            .unwrap();
        assert!(projected.is_full());
        assert!(!projected.is_rebuildable());
        let got = Table::read(to_csv(&projected).as_bytes()).unwrap();
        let again = got.summarize(&Projection::default()).unwrap();
        assert_eq!(again.rows.len(), 2);
        assert_eq!(again.geomean, projected.geomean);
        let err = got.result_sets().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));
    }

    #[test]
    fn duplicate_projection_is_rejected() {
        let table = Table::from_result_sets(&[three_modes("a", 2.0)]).unwrap();
        let dup_modes = Projection {
            modes: vec![Mode::Native, Mode::Native],
            metrics: vec![],
        };
        let dup_metrics = Projection {
            modes: vec![],
            metrics: vec![Metric::FinalMean, Metric::FinalMean],
        };
        for projection in [dup_modes, dup_metrics] {
            let err = table.summarize(&projection).unwrap_err();
            assert!(matches!(
                err.downcast_ref::<Error>(),
                Some(Error::Configuration(_))
            ));
        }

        let csv = to_csv(&table).replace("globals", "native");
        assert!(malformed(&Table::read(csv.as_bytes()).unwrap_err()));
    }

    #[test]
    fn wrong_cell_count_is_malformed() {
        let table = Table::from_result_sets(&[three_modes("a", 2.0)]).unwrap();
        let mut csv = to_csv(&table);
        csv.push_str("b,1.0,2.0,3.0\n");
        let err = Table::read(csv.as_bytes()).unwrap_err();
        assert!(malformed(&err), "{:#}", err);

        let mut csv = to_csv(&table);
        let mut long = table.record(&table.rows[0]);
        long.push("1.0".to_string());
        csv.push_str(&long.join(","));
        csv.push('\n');
        let err = Table::read(csv.as_bytes()).unwrap_err();
        assert!(malformed(&err), "{:#}", err);
    }

    #[test]
    fn bad_cells_and_headers_are_malformed() {
        let table = Table::from_result_sets(&[three_modes("a", 2.0)]).unwrap();
        let csv = to_csv(&table).replace("2.0000", "two");
        assert!(malformed(&Table::read(csv.as_bytes()).unwrap_err()));

        let csv = to_csv(&table).replace("globals", "abi");
        assert!(malformed(&Table::read(csv.as_bytes()).unwrap_err()));

        let err = Table::read("benchmark,native\n".as_bytes()).unwrap_err();
        assert!(malformed(&err));
    }

    #[test]
    fn push_rejects_other_modes() {
        let mut table = Table::new(vec![Mode::Native, Mode::Globals]);
        let err = table.push(&three_modes("a", 2.0)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Configuration(_))
        ));
    }

    #[test]
    fn print_aligns_and_ends_with_geomean() {
        let table = Table::from_result_sets(&[
            three_modes("a", 2.0),
            three_modes("bitcount", 8.0),
        ])
        .unwrap()
        .summarize(&Projection::default())
        .unwrap();
        let mut wtr =
            termcolor::NoColor::new(tabwriter::TabWriter::new(vec![]));
        table.print(&mut wtr).unwrap();
        let out = wtr.into_inner().into_inner().ok().unwrap();
        let out = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 6);
        assert!(lines[0].starts_with("benchmark"));
        assert!(lines[5].starts_with("geomean"));
        // Aligned: the first value column starts at the same offset.
        let col = |line: &str| line.find("1.0000").unwrap();
        assert_eq!(col(lines[3]), col(lines[4]));
    }

    #[test]
    fn store_append_then_transform() {
        let dir = std::env::temp_dir().join(format!(
            "sbtbench-store-test-{}",
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.csv");
        let _ = std::fs::remove_file(&path);

        let store = Store::new(&path);
        store.append(&three_modes("a", 2.0)).unwrap();
        store.append(&three_modes("b", 8.0)).unwrap();
        let before = std::fs::read_to_string(&path).unwrap();
        assert_eq!(before.lines().count(), 4);

        let two = ResultSet::new(
            "c".to_string(),
            vec![
                result(Mode::Native, [1.0; 8]),
                result(Mode::Globals, [1.0; 8]),
            ],
        )
        .unwrap();
        assert!(store.append(&two).is_err());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

        let projection = Projection {
            modes: vec![Mode::Native, Mode::Locals],
            metrics: vec![Metric::FinalMean, Metric::SlowdownMean],
        };
        store.transform(&projection).unwrap();
        let after = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = after.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[4].starts_with("geomean,"));
        assert!(lines.iter().all(|l| l.split(',').count() == 5));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
