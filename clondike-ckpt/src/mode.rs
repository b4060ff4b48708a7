use crate::npm::NpmParams;

/// `write(stream, mode)` mode selector (spec. §4.1 contract).
#[derive(Debug, Clone)]
pub enum CheckpointMode {
    PpmHeavy,
    PpmLight,
    Npm(NpmParams),
}

impl CheckpointMode {
    pub fn is_npm(&self) -> bool {
        matches!(self, CheckpointMode::Npm(_))
    }

    pub fn is_light_only(&self) -> bool {
        matches!(self, CheckpointMode::PpmLight)
    }
}

/// One open file as seen by the checkpoint writer, already stripped of the
/// raw fd plumbing so the engine's write path stays testable without real
/// file descriptors.
#[derive(Debug, Clone)]
pub struct OpenFileSource {
    pub fd: i32,
    pub path: String,
    pub open_flags: i32,
    pub mode: u32,
}

/// One VMA as seen by the checkpoint writer.
#[derive(Debug, Clone)]
pub struct VmaSource {
    pub record: crate::vma::VmaRecord,
    /// Heavy VMAs only: one entry per page, `None` for a hole.
    pub pages: Vec<Option<Vec<u8>>>,
}
