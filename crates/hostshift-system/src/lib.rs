mod command;
mod repofiles;
mod rhsm;
mod sysinfo;
mod versionlock;
mod yum;

pub use command::{run_checked, CommandOutput, CommandRunner, SystemCommandRunner};
pub use repofiles::RepositorySnapshot;
pub use rhsm::{parse_repo_ids, SubscriptionManagerClient};
pub use sysinfo::{parse_os_release, SystemInfo, OS_RELEASE_PATH};
pub use versionlock::clear_versionlock;
pub use yum::RpmPackageManager;
