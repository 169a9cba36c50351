use std::collections::{BTreeMap, BTreeSet};

use log::info;
use rand::Rng;

use crate::anonymize::{anonymize_semester, Anonymizer};
use crate::extract::{extract_semester, SemesterExport, WatchOrder};
use crate::models::{AnonId, SectionInfo, Semester};
use crate::snapshot::{resolve_snapshot, SnapshotOverrides};
use crate::source::CourseDataSource;

/// Which students share one anonymization mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnonymizationScope {
    /// Every semester is shuffled on its own; ids are not comparable across semesters.
    PerSemester,
    /// One shuffle over every student seen in the run.
    AcrossSemesters,
}

/// The three exported mappings, each keyed by semester.
#[derive(Debug, Clone, Default)]
pub struct ExportBundle {
    pub watching: BTreeMap<Semester, BTreeMap<AnonId, Vec<String>>>,
    pub section_info: BTreeMap<Semester, BTreeMap<String, SectionInfo>>,
    pub estimated_registration: BTreeMap<Semester, BTreeMap<AnonId, BTreeSet<String>>>,
}

/// Pulls every semester in order. The first failure aborts the whole run.
pub async fn extract_all(
    source: &dyn CourseDataSource,
    semesters: &[Semester],
    overrides: &SnapshotOverrides,
    order: WatchOrder,
) -> anyhow::Result<Vec<SemesterExport>> {
    let mut exports = Vec::with_capacity(semesters.len());
    for semester in semesters {
        let snapshot = resolve_snapshot(source, semester, overrides).await?;
        exports.push(extract_semester(source, semester, snapshot, order).await?);
    }
    Ok(exports)
}

pub fn anonymize_all<R>(
    exports: Vec<SemesterExport>,
    scope: AnonymizationScope,
    rng: &mut R,
) -> anyhow::Result<ExportBundle>
where
    R: Rng + ?Sized,
{
    let shared = match scope {
        AnonymizationScope::AcrossSemesters => {
            let students = exports.iter().flat_map(SemesterExport::student_ids);
            let anonymizer = Anonymizer::shuffled(students, rng);
            info!("anonymized {} students across all semesters", anonymizer.len());
            Some(anonymizer)
        }
        AnonymizationScope::PerSemester => None,
    };

    let mut bundle = ExportBundle::default();
    for export in exports {
        let semester = export.semester.clone();
        let anonymized = match &shared {
            Some(anonymizer) => anonymize_semester(export, anonymizer)?,
            None => {
                let anonymizer = Anonymizer::shuffled(export.student_ids(), rng);
                info!("{semester}: anonymized {} students", anonymizer.len());
                anonymize_semester(export, &anonymizer)?
            }
        };

        bundle.watching.insert(semester.clone(), anonymized.watching);
        bundle
            .section_info
            .insert(semester.clone(), anonymized.section_info);
        bundle
            .estimated_registration
            .insert(semester, anonymized.estimated_registration);
    }

    Ok(bundle)
}
