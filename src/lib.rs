pub mod merge;

pub use merge::{
    spawn_merge, FileDescriptor, FolderScanner, MergeError, MergeOrchestrator, MergeSettings,
    XlsxStore,
};
