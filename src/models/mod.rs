pub mod index_record;
pub mod manifest;

pub use index_record::{IndexRecord, IndexedCommit};
pub use manifest::{
    generate_session_id, Artifacts, BuildProgress, Commit, GitContext, Phase, PhaseHistory,
    SessionManifest, SessionType, Status, MANIFEST_FILE, MANIFEST_TMP_FILE,
};
