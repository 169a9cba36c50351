use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use log::info;
use serde::Serialize;

use crate::models::Semester;
use crate::pipeline::ExportBundle;

pub const DEFAULT_OUTPUT_DIR: &str = "~/git/course-trading/data";
pub const WATCHING_FILE: &str = "watching.json";
pub const SECTION_INFO_FILE: &str = "section_info.json";
pub const ESTIMATED_REGISTRATION_FILE: &str = "estimated-registration.json";

/// Shape of the written mappings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `{semester: mapping}`
    BySemester,
    /// The mapping of the only exported semester, without the semester key.
    Flat,
}

/// Expands a leading `~` to `$HOME`.
pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

fn encode<T: Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn encode_layout<T: Serialize>(
    by_semester: &BTreeMap<Semester, T>,
    layout: Layout,
) -> anyhow::Result<Vec<u8>> {
    match layout {
        Layout::BySemester => encode(by_semester),
        Layout::Flat => match (by_semester.len(), by_semester.values().next()) {
            (1, Some(mapping)) => encode(mapping),
            (count, _) => bail!("flat output needs exactly one semester, got {count}"),
        },
    }
}

/// Writes the three export files into `dir`, creating it if needed.
///
/// Everything is encoded before the first file is touched, so an encoding
/// failure leaves the directory as it was.
pub fn write_bundle(
    dir: &Path,
    bundle: &ExportBundle,
    layout: Layout,
) -> anyhow::Result<Vec<PathBuf>> {
    let files = [
        (WATCHING_FILE, encode_layout(&bundle.watching, layout)?),
        (SECTION_INFO_FILE, encode_layout(&bundle.section_info, layout)?),
        (
            ESTIMATED_REGISTRATION_FILE,
            encode_layout(&bundle.estimated_registration, layout)?,
        ),
    ];

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    let mut written = Vec::with_capacity(files.len());
    for (name, bytes) in files {
        let path = dir.join(name);
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {}", path.display());
        written.push(path);
    }

    Ok(written)
}
