//! Per-file evaluation statistics and the CSV report.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;
use typehint_core::{SearchOutcome, Slot};

pub const HEADERS: &[&str] = &[
    "file",
    "# groundtruth annotations",
    "# annotations after Pyright",
    "# annotations after search",
    "# available type slots",
    "# total type slots",
    "# extra Pyright annotations",
    "# extra search annotations",
    "% extra annotations",
    "# evaluated type slots",
    "Average time per slot (s)",
    "Search time (s)",
    "Total time (s)",
    "outcome",
    "# oracle calls",
];

const MISSING: &str = "-";

/// Annotation counts of a file before and after pyright's inferred return
/// types and the search.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnnotationCounts {
    /// Slots annotated in the original file.
    pub groundtruth: usize,
    /// Slots annotated once pyright's return types were written. Zero when
    /// there was no pyright stub.
    pub after_pyright: usize,
    /// Slots annotated in the final file.
    pub after_search: usize,
    /// Slots unannotated in the original file.
    pub available: usize,
    pub total: usize,
    /// Slots pyright annotated that were unannotated originally.
    pub extra_pyright: usize,
    /// Slots the search annotated that were still unannotated before it.
    pub extra: usize,
}

impl AnnotationCounts {
    /// Compares slot annotations of the original file, the file with
    /// pyright's return types (if a stub was found) and the final file.
    pub fn compare(
        before: &[(Slot, Option<String>)],
        after_pyright: Option<&[(Slot, Option<String>)]>,
        after: &[(Slot, Option<String>)],
    ) -> Self {
        let original = annotated_by_slot(before);
        let groundtruth = original.values().filter(|annotated| **annotated).count();
        let (after_pyright_count, extra_pyright, baseline) = match after_pyright {
            Some(slots) => (
                count_annotated(slots),
                count_added(&original, slots),
                annotated_by_slot(slots),
            ),
            None => (0, 0, original.clone()),
        };
        Self {
            groundtruth,
            after_pyright: after_pyright_count,
            after_search: count_annotated(after),
            available: original.len() - groundtruth,
            total: original.len(),
            extra_pyright,
            extra: count_added(&baseline, after),
        }
    }

    /// New annotations as a percentage of the available slots. `None` when
    /// there were no available slots.
    pub fn extra_percentage(&self) -> Option<f64> {
        if self.available == 0 {
            return None;
        }
        if self.extra == 0 && self.extra_pyright == 0 {
            return Some(0.0);
        }
        let added = self.after_search.saturating_sub(self.groundtruth);
        Some(added as f64 / self.available as f64 * 100.0)
    }
}

fn annotated_by_slot(slots: &[(Slot, Option<String>)]) -> HashMap<&Slot, bool> {
    slots
        .iter()
        .map(|(slot, annotation)| (slot, annotation.is_some()))
        .collect()
}

fn count_annotated(slots: &[(Slot, Option<String>)]) -> usize {
    slots.iter().filter(|(_, a)| a.is_some()).count()
}

/// Slots annotated in `after` that `baseline` had open.
fn count_added(baseline: &HashMap<&Slot, bool>, after: &[(Slot, Option<String>)]) -> usize {
    after
        .iter()
        .filter(|(slot, annotation)| annotation.is_some() && baseline.get(slot) == Some(&false))
        .count()
}

/// One row of the evaluation report.
#[derive(Debug, Clone, PartialEq)]
pub struct FileStatistics {
    /// Path relative to the project root.
    pub file: String,
    pub counts: AnnotationCounts,
    /// Slots that got a search layer.
    pub evaluated_slots: usize,
    pub search_time: Duration,
    pub total_time: Duration,
    pub outcome: SearchOutcome,
    pub oracle_calls: usize,
}

impl FileStatistics {
    pub fn average_time_per_slot(&self) -> Option<f64> {
        (self.evaluated_slots > 0)
            .then(|| self.search_time.as_secs_f64() / self.evaluated_slots as f64)
    }

    /// Fields in [`HEADERS`] order.
    pub fn fields(&self) -> Vec<String> {
        let counts = &self.counts;
        let or_missing = |count: usize, present: bool| {
            if present {
                count.to_string()
            } else {
                MISSING.to_string()
            }
        };
        vec![
            self.file.clone(),
            counts.groundtruth.to_string(),
            or_missing(counts.after_pyright, counts.after_pyright > 0),
            or_missing(counts.after_search, counts.after_search > 0),
            counts.available.to_string(),
            counts.total.to_string(),
            or_missing(counts.extra_pyright, counts.available > 0),
            or_missing(counts.extra, counts.available > 0),
            counts
                .extra_percentage()
                .map(|p| format!("{:.2}", p))
                .unwrap_or_else(|| MISSING.to_string()),
            self.evaluated_slots.to_string(),
            self.average_time_per_slot()
                .map(|t| format!("{:.2}", t))
                .unwrap_or_else(|| MISSING.to_string()),
            format!("{:.2}", self.search_time.as_secs_f64()),
            format!("{:.2}", self.total_time.as_secs_f64()),
            self.outcome.as_str().to_string(),
            self.oracle_calls.to_string(),
        ]
    }
}

/// CSV sink for [`FileStatistics`] rows.
pub struct EvaluationReport<W: Write> {
    writer: W,
    rows: usize,
}

impl EvaluationReport<BufWriter<File>> {
    /// Creates (or truncates) the report file and writes the header.
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::new(BufWriter::new(File::create(path)?))
    }
}

impl<W: Write> EvaluationReport<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        write_row(&mut writer, HEADERS.iter().copied())?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    /// Appends one row and flushes, so the report survives an aborted run.
    pub fn append(&mut self, statistics: &FileStatistics) -> io::Result<()> {
        let fields = statistics.fields();
        write_row(&mut self.writer, fields.iter().map(String::as_str))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

fn write_row<'a>(writer: &mut impl Write, fields: impl Iterator<Item = &'a str>) -> io::Result<()> {
    let line: Vec<String> = fields.map(escape).collect();
    writeln!(writer, "{}", line.join(","))
}

/// Quotes a field containing separators, quotes or line breaks.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(entries: &[(&str, Option<&str>)]) -> Vec<(Slot, Option<String>)> {
        entries
            .iter()
            .map(|(path, annotation)| {
                (
                    Slot::from_dotted(path).unwrap(),
                    annotation.map(str::to_string),
                )
            })
            .collect()
    }

    #[test]
    fn test_counts() {
        let before = slots(&[("f.a", Some("int")), ("f.b", None), ("f.return", None)]);
        let after = slots(&[("f.a", Some("int")), ("f.b", Some("str")), ("f.return", None)]);
        let counts = AnnotationCounts::compare(&before, None, &after);
        assert_eq!(
            counts,
            AnnotationCounts {
                groundtruth: 1,
                after_pyright: 0,
                after_search: 2,
                available: 2,
                total: 3,
                extra_pyright: 0,
                extra: 1,
            }
        );
        assert_eq!(counts.extra_percentage(), Some(50.0));

        let unchanged = AnnotationCounts::compare(&before, None, &before);
        assert_eq!(unchanged.extra_percentage(), Some(0.0));

        let full = slots(&[("f.a", Some("int"))]);
        assert_eq!(AnnotationCounts::compare(&full, None, &full).extra_percentage(), None);
    }

    #[test]
    fn test_counts_split_pyright_and_search() {
        let before = slots(&[("f.a", None), ("f.b", None), ("f.return", None)]);
        let pyright = slots(&[("f.a", None), ("f.b", None), ("f.return", Some("int"))]);
        let after = slots(&[("f.a", Some("int")), ("f.b", None), ("f.return", Some("int"))]);
        let counts = AnnotationCounts::compare(&before, Some(&pyright), &after);
        assert_eq!(counts.after_pyright, 1);
        assert_eq!(counts.extra_pyright, 1);
        assert_eq!(counts.after_search, 2);
        assert_eq!(counts.extra, 1);
        let percentage = counts.extra_percentage().unwrap();
        assert!((percentage - 200.0 / 3.0).abs() < 1e-9);

        let pyright_only = AnnotationCounts::compare(&before, Some(&pyright), &pyright);
        assert_eq!(pyright_only.extra, 0);
        assert!(pyright_only.extra_percentage().unwrap() > 33.0);
    }

    #[test]
    fn test_csv_rows() {
        let mut report = EvaluationReport::new(Vec::new()).unwrap();
        let before = slots(&[("f.a", None), ("f.return", None)]);
        let after = slots(&[("f.a", Some("int")), ("f.return", Some("None"))]);
        report
            .append(&FileStatistics {
                file: "pkg/a, b.py".to_string(),
                counts: AnnotationCounts::compare(&before, None, &after),
                evaluated_slots: 2,
                search_time: Duration::from_millis(3000),
                total_time: Duration::from_millis(3500),
                outcome: SearchOutcome::Success,
                oracle_calls: 4,
            })
            .unwrap();
        assert_eq!(report.rows(), 1);

        let text = String::from_utf8(report.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0].split(',').count(), HEADERS.len());
        assert_eq!(
            lines[1],
            "\"pkg/a, b.py\",0,-,2,2,2,0,2,100.00,2,1.50,3.00,3.50,success,4"
        );
    }

    #[test]
    fn test_missing_values() {
        let before = slots(&[("f.a", Some("int"))]);
        let stats = FileStatistics {
            file: "x.py".to_string(),
            counts: AnnotationCounts::compare(&before, None, &before),
            evaluated_slots: 0,
            search_time: Duration::ZERO,
            total_time: Duration::ZERO,
            outcome: SearchOutcome::Exhausted,
            oracle_calls: 0,
        };
        let fields = stats.fields();
        assert_eq!(fields[2], "-");
        assert_eq!(fields[6], "-");
        assert_eq!(fields[7], "-");
        assert_eq!(fields[8], "-");
        assert_eq!(fields[10], "-");
    }

    #[test]
    fn test_create_writes_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("report.csv");
        let report = EvaluationReport::create(&path).unwrap();
        drop(report);
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("file,# groundtruth annotations,"));
    }
}
