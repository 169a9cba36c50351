use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Duration, Utc};

use crate::models::Semester;
use crate::source::CourseDataSource;

pub type SnapshotOverrides = HashMap<Semester, DateTime<Utc>>;

/// Records are judged one day before the estimated end of add/drop.
pub fn snapshot_from_add_drop_end(estimated_end: DateTime<Utc>) -> DateTime<Utc> {
    estimated_end - Duration::days(1)
}

pub fn read_overrides<R: std::io::Read>(reader: R) -> anyhow::Result<SnapshotOverrides> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        semester: String,
        snapshot_at: DateTime<Utc>,
    }

    let mut reader = csv::Reader::from_reader(reader);
    let mut overrides = SnapshotOverrides::new();

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let semester: Semester = row.semester.parse().map_err(|err: String| anyhow!(err))?;
        if overrides.insert(semester.clone(), row.snapshot_at).is_some() {
            return Err(anyhow!("duplicate snapshot override for {semester}"));
        }
    }

    Ok(overrides)
}

pub fn load_overrides(path: &Path) -> anyhow::Result<SnapshotOverrides> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("failed to open snapshot overrides {}", path.display()))?;
    read_overrides(file)
        .with_context(|| format!("invalid snapshot overrides in {}", path.display()))
}

pub async fn resolve_snapshot(
    source: &dyn CourseDataSource,
    semester: &Semester,
    overrides: &SnapshotOverrides,
) -> anyhow::Result<DateTime<Utc>> {
    if let Some(snapshot) = overrides.get(semester) {
        return Ok(*snapshot);
    }

    let estimated_end = source
        .fetch_add_drop_end(semester)
        .await
        .with_context(|| format!("no snapshot time available for {semester}"))?;
    Ok(snapshot_from_add_drop_end(estimated_end))
}
