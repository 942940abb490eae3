use crate::commands::{with_database, CommandResult};
use hrflow_db::migrations::MIGRATOR;

pub fn run() -> CommandResult {
    match with_database("migrate", |_pool| async { Ok(()) }) {
        Ok(()) => CommandResult::success(
            "migrate",
            format!("applied pending migrations ({} known)", MIGRATOR.iter().count()),
        ),
        Err(failure) => failure,
    }
}
