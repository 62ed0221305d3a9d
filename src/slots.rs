use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

const PRIMARY_STEM: &str = "wp1";
const SECONDARY_STEM: &str = "wp2";
pub const PARTIAL_SUFFIX: &str = ".part";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotId {
    #[serde(rename = "Slot_1")]
    A,
    #[serde(rename = "Slot_2")]
    B,
}

impl SlotId {
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::A => "Slot_1",
            Self::B => "Slot_2",
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Debug, Clone)]
pub struct Slot {
    pub id: SlotId,
    pub dir: PathBuf,
    pub last_prepared: Option<DateTime<Local>>,
    /// Resolved URL of the image currently stored here, when known.
    pub source_url: Option<String>,
}

impl Slot {
    fn new(base: &Path, id: SlotId) -> Self {
        Self {
            id,
            dir: base.join(id.dir_name()),
            last_prepared: None,
            source_url: None,
        }
    }

    pub fn primary_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{PRIMARY_STEM}.{extension}"))
    }

    pub fn secondary_path(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("{SECONDARY_STEM}.{extension}"))
    }

    pub fn primary_file(&self) -> Option<PathBuf> {
        self.find_file(PRIMARY_STEM)
    }

    pub fn secondary_file(&self) -> Option<PathBuf> {
        self.find_file(SECONDARY_STEM)
    }

    /// A primary image of non-zero size exists. Absence is not an error.
    pub fn is_populated(&self) -> bool {
        self.primary_file()
            .and_then(|p| fs::metadata(p).ok())
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }

    /// Removes every primary/secondary file, finished or partial.
    pub fn clear(&self) -> io::Result<()> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if is_slot_file_name(name, PRIMARY_STEM) || is_slot_file_name(name, SECONDARY_STEM) {
                match fs::remove_file(entry.path()) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn find_file(&self, stem: &str) -> Option<PathBuf> {
        let mut matches: Vec<PathBuf> = fs::read_dir(&self.dir)
            .ok()?
            .flatten()
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .map(|name| is_slot_file_name(name, stem) && !name.ends_with(PARTIAL_SUFFIX))
                    .unwrap_or(false)
            })
            .map(|entry| entry.path())
            .collect();
        matches.sort();
        matches.into_iter().next()
    }
}

fn is_slot_file_name(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .map(|rest| rest.starts_with('.'))
        .unwrap_or(false)
}

/// The two alternating slots and which one is on screen.
#[derive(Debug, Clone)]
pub struct SlotManager {
    slots: [Slot; 2],
    current: SlotId,
}

impl SlotManager {
    pub fn new(base: &Path, current: SlotId) -> Self {
        Self {
            slots: [Slot::new(base, SlotId::A), Slot::new(base, SlotId::B)],
            current,
        }
    }

    pub fn ensure_dirs(&self) -> io::Result<()> {
        for slot in &self.slots {
            fs::create_dir_all(&slot.dir)?;
        }
        Ok(())
    }

    pub fn current_id(&self) -> SlotId {
        self.current
    }

    pub fn next_id(&self) -> SlotId {
        self.current.other()
    }

    pub fn current(&self) -> &Slot {
        &self.slots[self.current.index()]
    }

    pub fn next(&self) -> &Slot {
        &self.slots[self.next_id().index()]
    }

    /// The only mutable access: the displayed slot is never written in place.
    pub fn next_mut(&mut self) -> &mut Slot {
        let idx = self.next_id().index();
        &mut self.slots[idx]
    }

    pub fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id.index()]
    }

    pub fn is_populated(&self, id: SlotId) -> bool {
        self.slot(id).is_populated()
    }

    /// Call exactly once per successful switch.
    pub fn swap(&mut self) {
        self.current = self.current.other();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_alternates_current_and_next() {
        let dir = tempfile::tempdir().unwrap();
        let mut slots = SlotManager::new(dir.path(), SlotId::B);
        assert_eq!(slots.current_id(), SlotId::B);
        assert_eq!(slots.next().dir, dir.path().join("Slot_1"));

        slots.swap();
        assert_eq!(slots.current_id(), SlotId::A);
        assert_eq!(slots.next_id(), SlotId::B);
        assert_eq!(slots.current().dir, dir.path().join("Slot_1"));
    }

    #[test]
    fn populated_requires_non_empty_primary() {
        let dir = tempfile::tempdir().unwrap();
        let slots = SlotManager::new(dir.path(), SlotId::A);
        assert!(!slots.is_populated(SlotId::B));

        slots.ensure_dirs().unwrap();
        let next = slots.next();
        assert!(!next.is_populated());

        fs::write(next.primary_path("png"), b"").unwrap();
        assert!(!next.is_populated());

        fs::write(next.dir.join("wp1.png.part"), b"partial").unwrap();
        fs::remove_file(next.primary_path("png")).unwrap();
        assert!(!next.is_populated());

        fs::write(next.primary_path("jpg"), b"data").unwrap();
        assert!(next.is_populated());
        assert_eq!(next.primary_file(), Some(next.primary_path("jpg")));
    }

    #[test]
    fn clear_only_touches_slot_files() {
        let dir = tempfile::tempdir().unwrap();
        let slots = SlotManager::new(dir.path(), SlotId::A);
        slots.ensure_dirs().unwrap();
        let slot = slots.next();

        fs::write(slot.primary_path("jpg"), b"a").unwrap();
        fs::write(slot.secondary_path("jpg"), b"a").unwrap();
        fs::write(slot.dir.join("wp1.webp.part"), b"a").unwrap();
        fs::write(slot.dir.join("wp10.txt"), b"keep").unwrap();
        fs::write(slot.dir.join("notes.txt"), b"keep").unwrap();

        slot.clear().unwrap();

        let mut left: Vec<String> = fs::read_dir(&slot.dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        left.sort();
        assert_eq!(left, vec!["notes.txt", "wp10.txt"]);
    }

    #[test]
    fn slot_id_serialises_as_directory_name() {
        assert_eq!(serde_yaml::to_string(&SlotId::A).unwrap().trim(), "Slot_1");
        assert_eq!(serde_yaml::from_str::<SlotId>("Slot_2").unwrap(), SlotId::B);
        assert!(serde_yaml::from_str::<SlotId>("Slot_3").is_err());
    }
}
