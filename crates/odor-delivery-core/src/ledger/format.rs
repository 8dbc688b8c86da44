//! Session output files
//!
//! Writes the planned trial order and the per-trial timings as CSV.

use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{PersistError, TrialRecord};
use crate::session::{Panel, SessionMetadata, TrialSpec};

/// Timestamp layout inside the timings file
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d|%H:%M:%S%.3f";

/// Session-start stamp embedded in file names
pub const SESSION_STAMP_FORMAT: &str = "%y%m%d-%H%M%S";

/// Paths of one session's output files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFiles {
    panel: Panel,
    order: PathBuf,
    timings: PathBuf,
}

impl SessionFiles {
    /// Derive file names from the metadata and the session start time
    pub fn new(
        dir: &Path,
        panel: Panel,
        metadata: &SessionMetadata,
        session_start: &DateTime<Local>,
    ) -> Self {
        let stem = metadata.file_stem();
        let stamp = session_start.format(SESSION_STAMP_FORMAT);
        Self {
            panel,
            order: dir.join(format!("{stem}_solenoid_order_{stamp}.csv")),
            timings: dir.join(format!("{stem}_solenoid_timings_{stamp}.csv")),
        }
    }

    /// Path of the trial-order file
    pub fn order_path(&self) -> &Path {
        &self.order
    }

    /// Path of the timings file
    pub fn timings_path(&self) -> &Path {
        &self.timings
    }

    /// Write the planned sequence, sorted by odor for readability
    pub fn write_order(&self, trials: &TrialSpec) -> Result<(), PersistError> {
        let mut rows: Vec<(u8, usize)> = trials
            .iter()
            .enumerate()
            .map(|(i, odor)| (odor, i + 1))
            .collect();
        rows.sort();

        write_replacing(&self.order, |w| {
            writeln!(w, "{},Trial", self.odor_column())?;
            for (odor, trial) in &rows {
                writeln!(w, "{},{}", odor, trial)?;
            }
            Ok(())
        })?;
        debug!(path = %self.order.display(), rows = rows.len(), "trial order written");
        Ok(())
    }

    /// Overwrite the timings file with every record completed so far
    pub fn write_timings(&self, records: &[TrialRecord]) -> Result<(), PersistError> {
        write_replacing(&self.timings, |w| {
            writeln!(
                w,
                "Trial,{},Microscope Triggered,Solenoid opened,Solenoid closed",
                self.odor_column()
            )?;
            for record in records {
                writeln!(
                    w,
                    "{},{},{},{},{}",
                    record.trial,
                    record.odor,
                    record.triggered_at.format(TIMESTAMP_FORMAT),
                    record.opened_at.format(TIMESTAMP_FORMAT),
                    record.closed_at.format(TIMESTAMP_FORMAT),
                )?;
            }
            Ok(())
        })?;
        debug!(path = %self.timings.display(), rows = records.len(), "timings written");
        Ok(())
    }

    fn odor_column(&self) -> String {
        format!("Odor {}", self.panel.label())
    }
}

/// Write through a sibling temp file and rename it over `path`,
/// so a reader never sees a half-written file
fn write_replacing<F>(path: &Path, body: F) -> Result<(), PersistError>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let tmp = path.with_extension("csv.tmp");
    let result = (|| {
        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        body(&mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        drop(writer);
        fs::rename(&tmp, path)
    })();

    result.map_err(|source| {
        let _ = fs::remove_file(&tmp);
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn metadata() -> SessionMetadata {
        SessionMetadata::new("2023-11-16", "m12", "roi3")
    }

    fn start() -> DateTime<Local> {
        Local.with_ymd_and_hms(2023, 11, 16, 14, 5, 9).unwrap()
    }

    #[test]
    fn test_file_names() {
        let files = SessionFiles::new(Path::new("/data"), Panel::TenPercent, &metadata(), &start());
        assert_eq!(
            files.order_path(),
            Path::new("/data/2023-11-16_m12_roi3_solenoid_order_231116-140509.csv")
        );
        assert_eq!(
            files.timings_path(),
            Path::new("/data/2023-11-16_m12_roi3_solenoid_timings_231116-140509.csv")
        );
    }

    #[test]
    fn test_write_order_sorted_by_odor() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), Panel::OnePercent, &metadata(), &start());
        let trials = TrialSpec::new(vec![3, 1, 2, 1]).unwrap();

        files.write_order(&trials).unwrap();

        let text = fs::read_to_string(files.order_path()).unwrap();
        assert_eq!(text, "Odor 1%,Trial\n1,2\n1,4\n2,3\n3,1\n");
    }

    #[test]
    fn test_write_timings_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let files = SessionFiles::new(dir.path(), Panel::OnePercent, &metadata(), &start());
        let at = Local.with_ymd_and_hms(2023, 11, 16, 14, 6, 0).unwrap();
        let record = |trial: usize| TrialRecord {
            trial,
            odor: 2,
            triggered_at: at,
            opened_at: at,
            closed_at: at,
        };

        files.write_timings(&[record(1)]).unwrap();
        files.write_timings(&[record(1), record(2)]).unwrap();

        let text = fs::read_to_string(files.timings_path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Trial,Odor 1%,Microscope Triggered,Solenoid opened,Solenoid closed",
                "1,2,2023-11-16|14:06:00.000,2023-11-16|14:06:00.000,2023-11-16|14:06:00.000",
                "2,2,2023-11-16|14:06:00.000,2023-11-16|14:06:00.000,2023-11-16|14:06:00.000",
            ]
        );
        assert!(!files.timings_path().with_extension("csv.tmp").exists());
    }

    #[test]
    fn test_write_into_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let files = SessionFiles::new(&missing, Panel::OnePercent, &metadata(), &start());
        let err = files.write_timings(&[]).unwrap_err();
        assert!(err.to_string().contains("solenoid_timings"));
    }
}
