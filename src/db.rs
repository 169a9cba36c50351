use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::models::{
    MeetingRecord, RestrictionRegime, ScheduleRecord, SectionRecord, SectionRef, Semester,
    SubscriptionRecord,
};
use crate::source::{CourseDataSource, SourceError, SourceResult};

/// Restriction codes of the legacy registration system that need instructor permission.
const PRE_NGSS_SPECIAL_APPROVAL_CODES: &[&str] = &["DIS", "PER", "PRI", "INS", "CON"];

/// Read-only view of the course planning application's Postgres database.
pub struct PgSource {
    pool: PgPool,
}

impl PgSource {
    pub fn new(pool: PgPool) -> Self {
        PgSource { pool }
    }
}

#[async_trait]
impl CourseDataSource for PgSource {
    async fn fetch_add_drop_end(&self, semester: &Semester) -> SourceResult<DateTime<Utc>> {
        let row = sqlx::query(
            "SELECT estimated_end FROM alert_adddropperiod WHERE semester = $1",
        )
        .bind(semester.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let estimated_end: Option<DateTime<Utc>> = match row {
            Some(row) => row.try_get("estimated_end")?,
            None => None,
        };
        estimated_end
            .ok_or_else(|| SourceError::NotFound(format!("add/drop period for {semester}")))
    }

    async fn fetch_primary_course_codes(
        &self,
        semester: &Semester,
    ) -> SourceResult<HashMap<i32, String>> {
        let rows = sqlx::query(
            r#"
            SELECT id, full_code
            FROM courses_course
            WHERE semester = $1 AND primary_listing_id = id
            "#,
        )
        .bind(semester.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut codes = HashMap::with_capacity(rows.len());
        for row in rows {
            codes.insert(row.try_get("id")?, row.try_get("full_code")?);
        }
        Ok(codes)
    }

    async fn fetch_sections(&self, semester: &Semester) -> SourceResult<Vec<SectionRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.course_id, c.primary_listing_id, s.code, s.activity, s.status,
                   s.enrollment, s.capacity
            FROM courses_section s
            JOIN courses_course c ON c.id = s.course_id
            WHERE c.semester = $1
              AND s.status <> 'X'
              AND s.activity <> ''
              AND (c.primary_listing_id IS NULL OR c.primary_listing_id = c.id)
            ORDER BY s.id
            "#,
        )
        .bind(semester.as_str())
        .fetch_all(&self.pool)
        .await?;

        let meeting_rows = sqlx::query(
            r#"
            SELECT m.section_id, m.day, m.start::float8 AS start, m."end"::float8 AS "end"
            FROM courses_meeting m
            JOIN courses_section s ON s.id = m.section_id
            JOIN courses_course c ON c.id = s.course_id
            WHERE c.semester = $1
            ORDER BY m.section_id, m.id
            "#,
        )
        .bind(semester.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut meetings: HashMap<i32, Vec<MeetingRecord>> = HashMap::new();
        for row in meeting_rows {
            meetings
                .entry(row.try_get("section_id")?)
                .or_default()
                .push(MeetingRecord {
                    day: row.try_get("day")?,
                    start: row.try_get("start")?,
                    end: row.try_get("end")?,
                });
        }

        let mut sections = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i32 = row.try_get("id")?;
            sections.push(SectionRecord {
                id,
                course_id: row.try_get("course_id")?,
                primary_listing_id: row.try_get("primary_listing_id")?,
                code: row.try_get("code")?,
                activity: row.try_get("activity")?,
                status: row.try_get("status")?,
                enrollment: row.try_get("enrollment")?,
                capacity: row.try_get("capacity")?,
                meetings: meetings.remove(&id).unwrap_or_default(),
            });
        }

        Ok(sections)
    }

    async fn fetch_permit_required(
        &self,
        semester: &Semester,
        regime: RestrictionRegime,
    ) -> SourceResult<HashSet<i32>> {
        let query = match regime {
            RestrictionRegime::Ngss => sqlx::query(
                r#"
                SELECT DISTINCT rs.section_id
                FROM courses_ngssrestriction r
                JOIN courses_ngssrestriction_sections rs ON rs.ngssrestriction_id = r.id
                JOIN courses_section s ON s.id = rs.section_id
                JOIN courses_course c ON c.id = s.course_id
                WHERE c.semester = $1 AND r.special_approval
                "#,
            )
            .bind(semester.as_str()),
            RestrictionRegime::PreNgss => sqlx::query(
                r#"
                SELECT DISTINCT rs.section_id
                FROM courses_prengssrestriction r
                JOIN courses_prengssrestriction_sections rs ON rs.prengssrestriction_id = r.id
                JOIN courses_section s ON s.id = rs.section_id
                JOIN courses_course c ON c.id = s.course_id
                WHERE c.semester = $1 AND r.code = ANY($2)
                "#,
            )
            .bind(semester.as_str())
            .bind(PRE_NGSS_SPECIAL_APPROVAL_CODES),
        };

        let rows = query.fetch_all(&self.pool).await?;
        let mut ids = HashSet::with_capacity(rows.len());
        for row in rows {
            ids.insert(row.try_get("section_id")?);
        }
        Ok(ids)
    }

    async fn fetch_active_subscriptions(
        &self,
        semester: &Semester,
        snapshot: DateTime<Utc>,
    ) -> SourceResult<Vec<SubscriptionRecord>> {
        // Registrations without a user predate accounts and cannot be attributed.
        let rows = sqlx::query(
            r#"
            SELECT r.user_id, s.course_id, c.primary_listing_id, s.code,
                   COALESCE(r.original_created_at, r.created_at) AS original_created_at,
                   r.created_at, r.notification_sent_at, r.cancelled_at, r.deleted_at
            FROM alert_registration r
            JOIN courses_section s ON s.id = r.section_id
            JOIN courses_course c ON c.id = s.course_id
            WHERE c.semester = $1
              AND r.user_id IS NOT NULL
              AND r.created_at <= $2
              AND (r.notification_sent_at IS NULL OR r.notification_sent_at > $2)
              AND (r.cancelled_at IS NULL OR r.cancelled_at > $2)
              AND (r.deleted_at IS NULL OR r.deleted_at > $2)
            ORDER BY original_created_at, r.id
            "#,
        )
        .bind(semester.as_str())
        .bind(snapshot)
        .fetch_all(&self.pool)
        .await?;

        let mut subscriptions = Vec::with_capacity(rows.len());
        for row in rows {
            subscriptions.push(SubscriptionRecord {
                user_id: row.try_get("user_id")?,
                section: SectionRef {
                    course_id: row.try_get("course_id")?,
                    primary_listing_id: row.try_get("primary_listing_id")?,
                    code: row.try_get("code")?,
                },
                original_created_at: row.try_get("original_created_at")?,
                created_at: row.try_get("created_at")?,
                notification_sent_at: row.try_get("notification_sent_at")?,
                cancelled_at: row.try_get("cancelled_at")?,
                deleted_at: row.try_get("deleted_at")?,
            });
        }

        Ok(subscriptions)
    }

    async fn fetch_latest_schedules(
        &self,
        semester: &Semester,
    ) -> SourceResult<Vec<ScheduleRecord>> {
        // One row per scheduled section; schedules without sections come back
        // once with NULL section columns.
        let rows = sqlx::query(
            r#"
            SELECT sch.id AS schedule_id, sch.person_id, sch.updated_at,
                   s.course_id, c.primary_listing_id, s.code
            FROM plan_schedule sch
            LEFT JOIN plan_schedule_sections ss ON ss.schedule_id = sch.id
            LEFT JOIN courses_section s ON s.id = ss.section_id
            LEFT JOIN courses_course c ON c.id = s.course_id
            WHERE sch.semester = $1
              AND sch.updated_at = (
                  SELECT MAX(latest.updated_at)
                  FROM plan_schedule latest
                  WHERE latest.person_id = sch.person_id AND latest.semester = $1
              )
            ORDER BY sch.updated_at, sch.id
            "#,
        )
        .bind(semester.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut schedules: Vec<ScheduleRecord> = Vec::new();
        let mut positions: HashMap<i32, usize> = HashMap::new();
        for row in rows {
            let schedule_id: i32 = row.try_get("schedule_id")?;
            let position = match positions.get(&schedule_id) {
                Some(position) => *position,
                None => {
                    schedules.push(ScheduleRecord {
                        person_id: row.try_get("person_id")?,
                        updated_at: row.try_get("updated_at")?,
                        sections: Vec::new(),
                    });
                    positions.insert(schedule_id, schedules.len() - 1);
                    schedules.len() - 1
                }
            };

            let course_id: Option<i32> = row.try_get("course_id")?;
            let code: Option<String> = row.try_get("code")?;
            if let (Some(course_id), Some(code)) = (course_id, code) {
                schedules[position].sections.push(SectionRef {
                    course_id,
                    primary_listing_id: row.try_get("primary_listing_id")?,
                    code,
                });
            }
        }

        Ok(schedules)
    }
}
