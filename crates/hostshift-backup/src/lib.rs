mod controller;
mod error;
mod file;
mod fs_utils;
mod host;
mod item;
mod journal;
mod layout;
mod packages;
mod repos;
mod rollback;
mod subscription;

pub use controller::{BackupController, PartitionId, RestoreFailure, RollbackReport};
pub use error::{is_program_logic_error, ProgramLogicError};
pub use file::FileBackup;
pub use fs_utils::{remove_file_if_exists, sha256_file_hex};
pub use host::{HostServices, PackageManager, SubscriptionClient};
pub use item::{ItemId, RestorableChange, RestorableItem, RestoreOutcome};
pub use journal::{read_journal_records, JournalEvent, JournalRecord, LedgerJournal};
pub use layout::{current_unix_timestamp, new_run_id, BackupLayout};
pub use packages::{PackageBackup, PackageChangeKind};
pub use repos::RepoEnablementBackup;
pub use rollback::{RollbackExecutor, RollbackOutcome};
pub use subscription::SubscriptionBackup;
