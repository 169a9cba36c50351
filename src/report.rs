use std::collections::HashMap;
use std::fmt::Write;

use crate::extract::SemesterExport;
use crate::models::{SectionDemand, SemesterSummary};

pub fn summarize_semester(export: &SemesterExport) -> SemesterSummary {
    let sections = export.section_info.values();
    let registered_students = export.estimated_registration.len();
    let registered_sections: usize = export
        .estimated_registration
        .values()
        .map(|sections| sections.len())
        .sum();

    SemesterSummary {
        semester: export.semester.clone(),
        snapshot: export.snapshot,
        regime: export.regime,
        section_count: export.section_info.len(),
        open_sections: sections.clone().filter(|info| info.open).count(),
        permit_sections: sections.filter(|info| info.permit_required).count(),
        watching_students: export
            .watching
            .values()
            .filter(|sections| !sections.is_empty())
            .count(),
        total_watches: export.watching.values().map(Vec::len).sum(),
        registered_students,
        avg_registration_load: if registered_students == 0 {
            0.0
        } else {
            registered_sections as f64 / registered_students as f64
        },
    }
}

/// Sections ranked by how many students were watching them, ties broken by code.
pub fn most_watched(export: &SemesterExport) -> Vec<SectionDemand> {
    let mut watchers: HashMap<&str, usize> = HashMap::new();
    for sections in export.watching.values() {
        for section in sections {
            *watchers.entry(section.as_str()).or_insert(0) += 1;
        }
    }

    let mut demand: Vec<SectionDemand> = watchers
        .into_iter()
        .filter_map(|(full_code, watchers)| {
            export.section_info.get(full_code).map(|info| SectionDemand {
                full_code: full_code.to_string(),
                watchers,
                enrollment: info.enrollment,
                capacity: info.capacity,
            })
        })
        .collect();

    demand.sort_by(|a, b| {
        b.watchers
            .cmp(&a.watchers)
            .then_with(|| a.full_code.cmp(&b.full_code))
    });
    demand
}

pub fn build_report(exports: &[SemesterExport], top: usize) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Course Interest Export Summary");
    let _ = writeln!(output, "Covers {} semester(s)", exports.len());

    if exports.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "No semesters were exported.");
        return output;
    }

    for export in exports {
        let summary = summarize_semester(export);
        let _ = writeln!(output);
        let _ = writeln!(output, "## {}", summary.semester);
        let _ = writeln!(
            output,
            "Snapshot {} ({} restrictions)",
            summary.snapshot.format("%Y-%m-%d %H:%M UTC"),
            summary.regime
        );
        let _ = writeln!(
            output,
            "- Sections: {} ({} open, {} permit required)",
            summary.section_count, summary.open_sections, summary.permit_sections
        );
        let _ = writeln!(
            output,
            "- Watching: {} students, {} active watches",
            summary.watching_students, summary.total_watches
        );
        let _ = writeln!(
            output,
            "- Estimated registrations: {} students (avg {:.1} sections)",
            summary.registered_students, summary.avg_registration_load
        );

        let _ = writeln!(output);
        let _ = writeln!(output, "### Most Watched Sections");
        let demand = most_watched(export);
        if demand.is_empty() {
            let _ = writeln!(output, "No active watches at the snapshot.");
        } else {
            for section in demand.iter().take(top) {
                let _ = writeln!(
                    output,
                    "- {}: {} watchers ({}/{} enrolled)",
                    section.full_code, section.watchers, section.enrollment, section.capacity
                );
            }
        }
    }

    output
}
