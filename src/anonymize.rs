use std::collections::{BTreeMap, BTreeSet, HashMap};

use anyhow::anyhow;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::extract::SemesterExport;
use crate::models::{AnonId, SectionInfo, StudentId};

/// Assignment of shuffled dense ids to the student ids seen in an export.
///
/// The shuffle only hides the ordering carried by database ids. It is not
/// meant to resist re-identification from timing or section correlations.
#[derive(Debug, Clone)]
pub struct Anonymizer {
    ids: HashMap<StudentId, AnonId>,
}

impl Anonymizer {
    pub fn shuffled<R>(students: impl IntoIterator<Item = StudentId>, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let mut students: Vec<StudentId> = students
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        students.shuffle(rng);

        let ids = students
            .into_iter()
            .zip(0..)
            .collect::<HashMap<StudentId, AnonId>>();
        Anonymizer { ids }
    }

    pub fn anon_id(&self, student: StudentId) -> Option<AnonId> {
        self.ids.get(&student).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.ids.len()
    }

    /// Re-keys `map` by anonymized id. Every key must have been seen when the
    /// anonymizer was built.
    pub fn rekey<V>(&self, map: BTreeMap<StudentId, V>) -> anyhow::Result<BTreeMap<AnonId, V>> {
        map.into_iter()
            .map(|(student, value)| {
                self.anon_id(student)
                    .map(|anon| (anon, value))
                    .ok_or_else(|| anyhow!("student {student} missing from anonymization"))
            })
            .collect()
    }
}

/// One semester of export data keyed by anonymized ids.
#[derive(Debug, Clone)]
pub struct AnonymizedSemester {
    pub section_info: BTreeMap<String, SectionInfo>,
    pub watching: BTreeMap<AnonId, Vec<String>>,
    pub estimated_registration: BTreeMap<AnonId, BTreeSet<String>>,
}

pub fn anonymize_semester(
    export: SemesterExport,
    anonymizer: &Anonymizer,
) -> anyhow::Result<AnonymizedSemester> {
    Ok(AnonymizedSemester {
        section_info: export.section_info,
        watching: anonymizer.rekey(export.watching)?,
        estimated_registration: anonymizer.rekey(export.estimated_registration)?,
    })
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    #[test]
    fn assigns_a_bijection_over_observed_ids() {
        let mut rng = StdRng::seed_from_u64(11);
        let students = vec![904, 17, 23, 17, 5001, 88];
        let anonymizer = Anonymizer::shuffled(students.clone(), &mut rng);

        assert_eq!(anonymizer.len(), 5);
        let assigned: BTreeSet<AnonId> = students
            .iter()
            .map(|student| anonymizer.anon_id(*student).unwrap())
            .collect();
        assert_eq!(assigned, (0..5).collect::<BTreeSet<AnonId>>());
        assert_eq!(anonymizer.anon_id(42), None);
    }

    #[test]
    fn same_seed_gives_same_assignment() {
        let students = vec![3, 1, 4, 15, 9, 26];
        let first = Anonymizer::shuffled(students.clone(), &mut StdRng::seed_from_u64(7));
        let second = Anonymizer::shuffled(
            students.iter().rev().copied(),
            &mut StdRng::seed_from_u64(7),
        );

        for student in students {
            assert_eq!(first.anon_id(student), second.anon_id(student));
        }
    }

    #[test]
    fn shuffle_breaks_database_order() {
        let students: Vec<StudentId> = (1000..1064).collect();
        let anonymizer = Anonymizer::shuffled(students.clone(), &mut StdRng::seed_from_u64(3));

        let identity = students
            .iter()
            .enumerate()
            .all(|(index, student)| anonymizer.anon_id(*student) == Some(index as AnonId));
        assert!(!identity);
    }

    #[test]
    fn rekeys_both_mappings_consistently() {
        let watching: BTreeMap<StudentId, Vec<String>> = [
            (40, vec!["CIS-1200-001".to_string()]),
            (41, vec!["CIS-1210-001".to_string()]),
        ]
        .into_iter()
        .collect();
        let estimated: BTreeMap<StudentId, BTreeSet<String>> =
            [(41, BTreeSet::new()), (42, ["MATH-1400-001".to_string()].into_iter().collect())]
                .into_iter()
                .collect();
        let anonymizer = Anonymizer::shuffled(
            watching.keys().chain(estimated.keys()).copied(),
            &mut StdRng::seed_from_u64(1),
        );

        let anon_watching = anonymizer.rekey(watching).unwrap();
        let anon_estimated = anonymizer.rekey(estimated).unwrap();

        let student_41 = anonymizer.anon_id(41).unwrap();
        assert_eq!(anon_watching[&student_41], vec!["CIS-1210-001"]);
        assert!(anon_estimated[&student_41].is_empty());
        assert_eq!(anon_watching.len() + anon_estimated.len(), 4);
    }

    #[test]
    fn rekey_rejects_unknown_students() {
        let anonymizer = Anonymizer::shuffled(vec![1, 2], &mut StdRng::seed_from_u64(0));
        let stray: BTreeMap<StudentId, Vec<String>> = [(3, Vec::new())].into_iter().collect();
        assert!(anonymizer.rekey(stray).is_err());
    }
}
