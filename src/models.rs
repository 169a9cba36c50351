use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

pub type StudentId = i32;
pub type AnonId = u32;

/// Semester identifier such as `2022C`: a four digit year followed by a term letter.
///
/// Ordering is lexicographic, which matches chronological order for this format.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Semester(String);

impl Semester {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Semester {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim().to_ascii_uppercase();
        let valid = value.len() == 5
            && value.is_ascii()
            && value[..4].chars().all(|c| c.is_ascii_digit())
            && matches!(&value[4..], "A" | "B" | "C");
        if valid {
            Ok(Semester(value))
        } else {
            Err(format!("invalid semester '{value}', expected e.g. 2022C"))
        }
    }
}

impl fmt::Display for Semester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A section row as stored, before any filtering.
#[derive(Debug, Clone)]
pub struct SectionRecord {
    pub id: i32,
    pub course_id: i32,
    /// Primary listing of the section's course; `None` is treated as the course itself.
    pub primary_listing_id: Option<i32>,
    pub code: String,
    pub activity: String,
    pub status: String,
    pub enrollment: i32,
    pub capacity: i32,
    pub meetings: Vec<MeetingRecord>,
}

impl SectionRecord {
    pub fn is_primary_listing(&self) -> bool {
        self.primary_listing_id
            .map_or(true, |primary| primary == self.course_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeetingRecord {
    pub day: String,
    pub start: f64,
    pub end: f64,
}

/// Reference from a watch or a schedule to a section, resolved to a full code
/// through the primary listing of its course.
#[derive(Debug, Clone)]
pub struct SectionRef {
    pub course_id: i32,
    pub primary_listing_id: Option<i32>,
    pub code: String,
}

impl SectionRef {
    pub fn primary_course_id(&self) -> i32 {
        self.primary_listing_id.unwrap_or(self.course_id)
    }
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub user_id: StudentId,
    pub section: SectionRef,
    pub original_created_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub notification_sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SubscriptionRecord {
    /// Whether the subscription was still waiting for an opening at `snapshot`.
    pub fn is_active_at(&self, snapshot: DateTime<Utc>) -> bool {
        let pending = |at: Option<DateTime<Utc>>| at.map_or(true, |at| at > snapshot);
        self.created_at <= snapshot
            && pending(self.notification_sent_at)
            && pending(self.cancelled_at)
            && pending(self.deleted_at)
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleRecord {
    pub person_id: StudentId,
    pub updated_at: DateTime<Utc>,
    pub sections: Vec<SectionRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Meeting {
    pub day: String,
    /// hh:mm encoded as hh.mm
    pub start: f64,
    /// hh:mm encoded as hh.mm
    pub end: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionInfo {
    pub activity: String,
    pub meetings: Vec<Meeting>,
    pub enrollment: i32,
    pub capacity: i32,
    pub open: bool,
    pub permit_required: bool,
}

/// Registration restriction model in force for a semester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionRegime {
    /// Rules imported from the registration system used before the cutover.
    PreNgss,
    /// Rules from the current registration system.
    Ngss,
}

impl RestrictionRegime {
    pub const FIRST_BANNER_SEMESTER: &'static str = "2022B";

    pub fn for_semester(semester: &Semester) -> Self {
        if semester.as_str() >= Self::FIRST_BANNER_SEMESTER {
            RestrictionRegime::Ngss
        } else {
            RestrictionRegime::PreNgss
        }
    }
}

impl fmt::Display for RestrictionRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestrictionRegime::PreNgss => f.write_str("pre-NGSS"),
            RestrictionRegime::Ngss => f.write_str("NGSS"),
        }
    }
}

/// Headline numbers for one exported semester.
#[derive(Debug, Clone)]
pub struct SemesterSummary {
    pub semester: Semester,
    pub snapshot: DateTime<Utc>,
    pub regime: RestrictionRegime,
    pub section_count: usize,
    pub open_sections: usize,
    pub permit_sections: usize,
    pub watching_students: usize,
    pub total_watches: usize,
    pub registered_students: usize,
    pub avg_registration_load: f64,
}

#[derive(Debug, Clone)]
pub struct SectionDemand {
    pub full_code: String,
    pub watchers: usize,
    pub enrollment: i32,
    pub capacity: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn semester(value: &str) -> Semester {
        value.parse().unwrap()
    }

    fn subscription(created_at: DateTime<Utc>) -> SubscriptionRecord {
        SubscriptionRecord {
            user_id: 7,
            section: SectionRef {
                course_id: 1,
                primary_listing_id: Some(1),
                code: "001".to_string(),
            },
            original_created_at: created_at,
            created_at,
            notification_sent_at: None,
            cancelled_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn parses_and_normalizes_semesters() {
        assert_eq!(semester(" 2021c").as_str(), "2021C");
        assert!("2021D".parse::<Semester>().is_err());
        assert!("21C".parse::<Semester>().is_err());
        assert!("2021".parse::<Semester>().is_err());
    }

    #[test]
    fn regime_switches_at_first_banner_semester() {
        assert_eq!(
            RestrictionRegime::for_semester(&semester("2022A")),
            RestrictionRegime::PreNgss
        );
        assert_eq!(
            RestrictionRegime::for_semester(&semester("2022B")),
            RestrictionRegime::Ngss
        );
        assert_eq!(
            RestrictionRegime::for_semester(&semester("2023C")),
            RestrictionRegime::Ngss
        );
    }

    #[test]
    fn subscription_lifecycle_is_judged_at_snapshot() {
        let snapshot = Utc.with_ymd_and_hms(2022, 9, 20, 0, 0, 0).unwrap();
        let before = snapshot - Duration::days(3);
        let after = snapshot + Duration::hours(1);

        assert!(subscription(before).is_active_at(snapshot));
        assert!(subscription(snapshot).is_active_at(snapshot));
        assert!(!subscription(after).is_active_at(snapshot));

        let mut notified = subscription(before);
        notified.notification_sent_at = Some(snapshot - Duration::hours(1));
        assert!(!notified.is_active_at(snapshot));
        notified.notification_sent_at = Some(after);
        assert!(notified.is_active_at(snapshot));

        let mut cancelled = subscription(before);
        cancelled.cancelled_at = Some(snapshot);
        assert!(!cancelled.is_active_at(snapshot));

        let mut deleted = subscription(before);
        deleted.deleted_at = Some(after);
        assert!(deleted.is_active_at(snapshot));
    }

    #[test]
    fn missing_primary_listing_counts_as_primary() {
        let section = SectionRecord {
            id: 1,
            course_id: 10,
            primary_listing_id: None,
            code: "001".to_string(),
            activity: "LEC".to_string(),
            status: "O".to_string(),
            enrollment: 0,
            capacity: 0,
            meetings: Vec::new(),
        };
        assert!(section.is_primary_listing());
        assert!(!SectionRecord {
            primary_listing_id: Some(11),
            ..section
        }
        .is_primary_listing());
    }
}
