//! Read-only access to the course planning database.
//!
//! The export only ever needs a handful of filtered reads, so everything it
//! consumes goes through [`CourseDataSource`]. `db::PgSource` answers them
//! from Postgres; tests use the in-memory `MemorySource`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{
    RestrictionRegime, ScheduleRecord, SectionRecord, Semester, SubscriptionRecord,
};

pub type SourceResult<T> = Result<T, SourceError>;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Query error: {0}")]
    Query(#[source] sqlx::Error),

    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<sqlx::Error> for SourceError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_) => SourceError::Decode(err.to_string()),
            other => SourceError::Query(other),
        }
    }
}

#[async_trait]
pub trait CourseDataSource: Send + Sync {
    /// Estimated end of the add/drop period of `semester`.
    ///
    /// Fails with [`SourceError::NotFound`] when the semester has no add/drop period.
    async fn fetch_add_drop_end(&self, semester: &Semester) -> SourceResult<DateTime<Utc>>;

    /// Map from primary course id to the course's full code (e.g. `CIS-1200`).
    async fn fetch_primary_course_codes(
        &self,
        semester: &Semester,
    ) -> SourceResult<HashMap<i32, String>>;

    /// Sections of the semester together with their meetings.
    async fn fetch_sections(&self, semester: &Semester) -> SourceResult<Vec<SectionRecord>>;

    /// Ids of sections whose restriction rules under `regime` require special approval.
    async fn fetch_permit_required(
        &self,
        semester: &Semester,
        regime: RestrictionRegime,
    ) -> SourceResult<HashSet<i32>>;

    /// Subscriptions on the semester's sections that were active at `snapshot`.
    async fn fetch_active_subscriptions(
        &self,
        semester: &Semester,
        snapshot: DateTime<Utc>,
    ) -> SourceResult<Vec<SubscriptionRecord>>;

    /// Each student's most recently updated schedule in the semester.
    async fn fetch_latest_schedules(&self, semester: &Semester)
        -> SourceResult<Vec<ScheduleRecord>>;
}

#[cfg(test)]
pub use memory::MemorySource;

#[cfg(test)]
mod memory {
    use super::*;

    /// In-memory data source holding the rows of a single test fixture.
    ///
    /// Rows are not partitioned by semester; every semester sees the same data
    /// except for add/drop periods. Subscriptions and schedules are returned
    /// unfiltered so the export's own lifecycle and latest-schedule rules get
    /// exercised.
    #[derive(Debug, Default, Clone)]
    pub struct MemorySource {
        pub add_drop_ends: HashMap<Semester, DateTime<Utc>>,
        pub primary_course_codes: HashMap<i32, String>,
        pub sections: Vec<SectionRecord>,
        pub pre_ngss_permits: HashSet<i32>,
        pub ngss_permits: HashSet<i32>,
        pub subscriptions: Vec<SubscriptionRecord>,
        pub schedules: Vec<ScheduleRecord>,
    }

    #[async_trait]
    impl CourseDataSource for MemorySource {
        async fn fetch_add_drop_end(&self, semester: &Semester) -> SourceResult<DateTime<Utc>> {
            self.add_drop_ends
                .get(semester)
                .copied()
                .ok_or_else(|| SourceError::NotFound(format!("add/drop period for {semester}")))
        }

        async fn fetch_primary_course_codes(
            &self,
            _semester: &Semester,
        ) -> SourceResult<HashMap<i32, String>> {
            Ok(self.primary_course_codes.clone())
        }

        async fn fetch_sections(&self, _semester: &Semester) -> SourceResult<Vec<SectionRecord>> {
            Ok(self.sections.clone())
        }

        async fn fetch_permit_required(
            &self,
            _semester: &Semester,
            regime: RestrictionRegime,
        ) -> SourceResult<HashSet<i32>> {
            Ok(match regime {
                RestrictionRegime::PreNgss => self.pre_ngss_permits.clone(),
                RestrictionRegime::Ngss => self.ngss_permits.clone(),
            })
        }

        async fn fetch_active_subscriptions(
            &self,
            _semester: &Semester,
            _snapshot: DateTime<Utc>,
        ) -> SourceResult<Vec<SubscriptionRecord>> {
            Ok(self.subscriptions.clone())
        }

        async fn fetch_latest_schedules(
            &self,
            _semester: &Semester,
        ) -> SourceResult<Vec<ScheduleRecord>> {
            Ok(self.schedules.clone())
        }
    }
}
