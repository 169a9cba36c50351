use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use anyhow::Context;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use crate::models::{
    Meeting, RestrictionRegime, ScheduleRecord, SectionInfo, SectionRecord, SectionRef,
    Semester, StudentId, SubscriptionRecord,
};
use crate::source::CourseDataSource;

const ACTIVITY_LABELS: &[(&str, &str)] = &[
    ("CLN", "Clinic"),
    ("CRT", "Clinical Rotation"),
    ("DAB", "Dissertation Abroad"),
    ("DIS", "Dissertation"),
    ("DPC", "Doctoral Program Exchange"),
    ("FLD", "Field Work"),
    ("HYB", "Hybrid"),
    ("IND", "Independent Study"),
    ("LAB", "Lab"),
    ("LEC", "Lecture"),
    ("MST", "Masters Thesis"),
    ("ONL", "Online"),
    ("PRC", "Practicum"),
    ("REC", "Recitation"),
    ("SEM", "Seminar"),
    ("SRT", "Senior Thesis"),
    ("STU", "Studio"),
];

const CANCELLED_STATUS: &str = "X";
const OPEN_STATUS: &str = "O";

/// How watched sections are kept per student.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOrder {
    /// In the order the student started watching them.
    Chronological,
    /// As a set, emitted sorted without duplicates.
    Unordered,
}

/// Everything pulled for one semester, still keyed by real student ids.
#[derive(Debug, Clone)]
pub struct SemesterExport {
    pub semester: Semester,
    pub snapshot: DateTime<Utc>,
    pub regime: RestrictionRegime,
    pub section_info: BTreeMap<String, SectionInfo>,
    pub watching: BTreeMap<StudentId, Vec<String>>,
    pub estimated_registration: BTreeMap<StudentId, BTreeSet<String>>,
}

impl SemesterExport {
    pub fn student_ids(&self) -> BTreeSet<StudentId> {
        self.watching
            .keys()
            .chain(self.estimated_registration.keys())
            .copied()
            .collect()
    }
}

pub fn activity_label(code: &str) -> Option<&'static str> {
    ACTIVITY_LABELS
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, label)| *label)
}

/// Full code of a referenced section, named after its course's primary listing.
pub fn resolve_full_code(
    primary_course_codes: &HashMap<i32, String>,
    section: &SectionRef,
) -> Option<String> {
    primary_course_codes
        .get(&section.primary_course_id())
        .map(|course_code| format!("{course_code}-{}", section.code))
}

pub fn build_section_info(
    sections: &[SectionRecord],
    primary_course_codes: &HashMap<i32, String>,
    permit_required: &HashSet<i32>,
) -> BTreeMap<String, SectionInfo> {
    let mut section_info = BTreeMap::new();

    for section in sections {
        if section.status == CANCELLED_STATUS
            || section.activity.is_empty()
            || !section.is_primary_listing()
        {
            continue;
        }

        let Some(course_code) = primary_course_codes.get(&section.course_id) else {
            debug!("section {} has no primary course code, skipping", section.id);
            continue;
        };

        let activity = match activity_label(&section.activity) {
            Some(label) => label.to_string(),
            None => {
                warn!(
                    "unknown activity code '{}' on section {}",
                    section.activity, section.id
                );
                section.activity.clone()
            }
        };

        let meetings = section
            .meetings
            .iter()
            .map(|meeting| Meeting {
                day: meeting.day.clone(),
                start: meeting.start,
                end: meeting.end,
            })
            .collect();

        section_info.insert(
            format!("{course_code}-{}", section.code),
            SectionInfo {
                activity,
                meetings,
                enrollment: section.enrollment,
                capacity: section.capacity,
                open: section.status == OPEN_STATUS,
                permit_required: permit_required.contains(&section.id),
            },
        );
    }

    section_info
}

pub fn build_watching(
    subscriptions: &[SubscriptionRecord],
    snapshot: DateTime<Utc>,
    primary_course_codes: &HashMap<i32, String>,
    section_info: &BTreeMap<String, SectionInfo>,
    order: WatchOrder,
) -> BTreeMap<StudentId, Vec<String>> {
    let mut active: Vec<&SubscriptionRecord> = subscriptions
        .iter()
        .filter(|subscription| subscription.is_active_at(snapshot))
        .collect();
    active.sort_by_key(|subscription| subscription.original_created_at);

    let mut watching: BTreeMap<StudentId, Vec<String>> = BTreeMap::new();
    for subscription in active {
        let Some(full_code) = resolve_full_code(primary_course_codes, &subscription.section)
        else {
            debug!(
                "subscription of student {} points at an unknown course",
                subscription.user_id
            );
            continue;
        };
        if !section_info.contains_key(&full_code) {
            debug!("dropping watch on invalid section {full_code}");
            continue;
        }
        watching
            .entry(subscription.user_id)
            .or_default()
            .push(full_code);
    }

    if order == WatchOrder::Unordered {
        for sections in watching.values_mut() {
            sections.sort();
            sections.dedup();
        }
    }

    watching
}

/// Keeps each student's most recently updated schedule. Among schedules that
/// share the latest update time, the last one read wins.
pub fn latest_schedules(schedules: &[ScheduleRecord]) -> BTreeMap<StudentId, &ScheduleRecord> {
    let mut latest: BTreeMap<StudentId, &ScheduleRecord> = BTreeMap::new();
    for schedule in schedules {
        match latest.get(&schedule.person_id) {
            Some(current) if current.updated_at > schedule.updated_at => {}
            _ => {
                latest.insert(schedule.person_id, schedule);
            }
        }
    }
    latest
}

/// Gives every student with an estimated registration a watch list, empty if
/// they were not watching anything.
pub fn add_missing_watchers(
    watching: &mut BTreeMap<StudentId, Vec<String>>,
    estimated_registration: &BTreeMap<StudentId, BTreeSet<String>>,
) {
    for student in estimated_registration.keys() {
        watching.entry(*student).or_default();
    }
}

/// Planned sections minus watched sections: what the student presumably
/// already holds.
pub fn build_estimated_registration(
    schedules: &[ScheduleRecord],
    primary_course_codes: &HashMap<i32, String>,
    section_info: &BTreeMap<String, SectionInfo>,
    watching: &BTreeMap<StudentId, Vec<String>>,
) -> BTreeMap<StudentId, BTreeSet<String>> {
    latest_schedules(schedules)
        .into_iter()
        .map(|(person_id, schedule)| {
            let watched: HashSet<&String> = watching
                .get(&person_id)
                .map(|sections| sections.iter().collect())
                .unwrap_or_default();
            let sections: BTreeSet<String> = schedule
                .sections
                .iter()
                .filter_map(|section| resolve_full_code(primary_course_codes, section))
                .filter(|full_code| section_info.contains_key(full_code))
                .filter(|full_code| !watched.contains(full_code))
                .collect();
            (person_id, sections)
        })
        .collect()
}

pub async fn extract_semester(
    source: &dyn CourseDataSource,
    semester: &Semester,
    snapshot: DateTime<Utc>,
    order: WatchOrder,
) -> anyhow::Result<SemesterExport> {
    let regime = RestrictionRegime::for_semester(semester);

    let primary_course_codes = source
        .fetch_primary_course_codes(semester)
        .await
        .with_context(|| format!("failed to load primary courses for {semester}"))?;
    let permit_required = source
        .fetch_permit_required(semester, regime)
        .await
        .with_context(|| format!("failed to load {regime} restrictions for {semester}"))?;
    let sections = source
        .fetch_sections(semester)
        .await
        .with_context(|| format!("failed to load sections for {semester}"))?;
    let section_info = build_section_info(&sections, &primary_course_codes, &permit_required);

    let subscriptions = source
        .fetch_active_subscriptions(semester, snapshot)
        .await
        .with_context(|| format!("failed to load subscriptions for {semester}"))?;
    let mut watching = build_watching(
        &subscriptions,
        snapshot,
        &primary_course_codes,
        &section_info,
        order,
    );

    let schedules = source
        .fetch_latest_schedules(semester)
        .await
        .with_context(|| format!("failed to load schedules for {semester}"))?;
    let estimated_registration = build_estimated_registration(
        &schedules,
        &primary_course_codes,
        &section_info,
        &watching,
    );
    add_missing_watchers(&mut watching, &estimated_registration);

    info!(
        "{semester}: {} sections, {} watching students, {} estimated registrations (snapshot {snapshot}, {regime})",
        section_info.len(),
        watching.len(),
        estimated_registration.len()
    );

    Ok(SemesterExport {
        semester: semester.clone(),
        snapshot,
        regime,
        section_info,
        watching,
        estimated_registration,
    })
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::MeetingRecord;
    use crate::source::MemorySource;

    pub fn snapshot() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 9, 19, 0, 0, 0).unwrap()
    }

    pub fn section(id: i32, course_id: i32, code: &str, status: &str) -> SectionRecord {
        SectionRecord {
            id,
            course_id,
            primary_listing_id: Some(course_id),
            code: code.to_string(),
            activity: "LEC".to_string(),
            status: status.to_string(),
            enrollment: 40,
            capacity: 50,
            meetings: vec![
                MeetingRecord {
                    day: "M".to_string(),
                    start: 10.15,
                    end: 11.45,
                },
                MeetingRecord {
                    day: "W".to_string(),
                    start: 10.15,
                    end: 11.45,
                },
            ],
        }
    }

    pub fn section_ref(course_id: i32, primary: i32, code: &str) -> SectionRef {
        SectionRef {
            course_id,
            primary_listing_id: Some(primary),
            code: code.to_string(),
        }
    }

    pub fn watch(user_id: StudentId, section: SectionRef, hours_before: i64) -> SubscriptionRecord {
        let created_at = snapshot() - Duration::hours(hours_before);
        SubscriptionRecord {
            user_id,
            section,
            original_created_at: created_at,
            created_at,
            notification_sent_at: None,
            cancelled_at: None,
            deleted_at: None,
        }
    }

    pub fn schedule(
        person_id: StudentId,
        days_before: i64,
        sections: Vec<SectionRef>,
    ) -> ScheduleRecord {
        ScheduleRecord {
            person_id,
            updated_at: snapshot() - Duration::days(days_before),
            sections,
        }
    }

    /// CIS-1200 (course 1) with sections 001 (open), 002 (closed) and 003
    /// (cancelled); CIS-1210 (course 2) with 001 (closed). Course 3 is
    /// NETS-1200, a cross-listing of CIS-1200 carrying its own copy of 001.
    pub fn source() -> MemorySource {
        let mut cross_listed = section(30, 3, "001", "O");
        cross_listed.primary_listing_id = Some(1);

        MemorySource {
            add_drop_ends: [("2022C".parse::<Semester>().unwrap(), snapshot() + Duration::days(1))]
                .into_iter()
                .collect(),
            primary_course_codes: [(1, "CIS-1200".to_string()), (2, "CIS-1210".to_string())]
                .into_iter()
                .collect(),
            sections: vec![
                section(10, 1, "001", "O"),
                section(11, 1, "002", "C"),
                section(12, 1, "003", "X"),
                section(20, 2, "001", "C"),
                cross_listed,
            ],
            pre_ngss_permits: [20].into_iter().collect(),
            ngss_permits: [11].into_iter().collect(),
            subscriptions: vec![
                watch(100, section_ref(2, 2, "001"), 5),
                watch(100, section_ref(1, 1, "002"), 48),
                watch(101, section_ref(1, 1, "003"), 10),
            ],
            schedules: vec![
                schedule(100, 2, vec![section_ref(1, 1, "001"), section_ref(1, 1, "002")]),
                schedule(102, 3, vec![section_ref(3, 1, "001"), section_ref(2, 2, "001")]),
            ],
        }
    }
}
