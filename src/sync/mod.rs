pub mod coordinator;
pub mod mirror;
pub mod output;
pub mod watch;

use coordinator::Applied;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    pub files_copied: usize,
    pub files_deleted: usize,
    pub trees_deleted: usize,
    pub events_handled: usize,
    pub events_ignored: usize,
}

impl SyncStats {
    pub fn record(&mut self, applied: &Applied) {
        self.events_handled += 1;
        match applied {
            Applied::CopiedFile { .. } => self.files_copied += 1,
            Applied::CopiedTree { files, .. } => self.files_copied += files,
            Applied::DeletedFile { .. } => self.files_deleted += 1,
            Applied::DeletedTree { .. } => self.trees_deleted += 1,
            Applied::Ignored { .. } => self.events_ignored += 1,
        }
    }
}
