//! Startup recovery of tasks stranded in `processing/`.
//!
//! Files are moved back to `inbox/` with a `recovered-` marker and their
//! content untouched. A task that crashed after its `attempt` was bumped but
//! before the retry move may therefore run fewer times than `maxAttempts`
//! intends; recovery does not try to reconcile this.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::io::events::{Event, EventLog, EventStatus};
use crate::io::init::HomePaths;
use crate::io::queue::{Destination, QueueStore, RequeueTag};

/// Move every file in `processing/` back to `inbox/`, returning the new paths.
///
/// A file that vanishes mid-recovery (another daemon recovered it first) is
/// skipped.
#[instrument(skip_all)]
pub fn recover_processing(paths: &HomePaths) -> Result<Vec<PathBuf>> {
    let queue = QueueStore::new(paths);
    let events = EventLog::new(&paths.events_path);
    let mut recovered = Vec::new();

    for file_name in queue.list_processing()? {
        let orphan = queue.orphaned(&file_name);
        let task_id = task_id_hint(&orphan.path).unwrap_or_else(|| orphan.stem().to_string());
        let at = Utc::now();
        let target = match queue.move_claimed(&orphan, Destination::Inbox(RequeueTag::Recovered), at) {
            Ok(target) => target,
            Err(err) if is_not_found(&err) => {
                info!(file = %file_name, "orphan already recovered elsewhere");
                continue;
            }
            Err(err) => return Err(err),
        };
        info!(file = %file_name, target = %target.display(), "recovered task");

        let mut event = Event::new(EventStatus::Recovered, at);
        event.task_id = Some(task_id);
        event.task_file = Some(target.display().to_string());
        if let Err(err) = events.append(&event) {
            warn!(err = %format!("{err:#}"), "failed to append event");
        }
        recovered.push(target);
    }
    Ok(recovered)
}

/// The `id` recorded in a task file, if it is readable JSON with one.
fn task_id_hint(path: &Path) -> Option<String> {
    let raw = fs::read_to_string(path).ok()?;
    let value: Value = serde_json::from_str(&raw).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

fn is_not_found(err: &anyhow::Error) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == ErrorKind::NotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestHome;

    #[test]
    fn processing_files_return_to_inbox_unchanged() {
        let home = TestHome::new();
        let paths = &home.settings.paths;
        let body = r#"{"id":"t1","prompt":"p","attempt":1,"maxAttempts":3}"#;
        fs::write(paths.processing_dir.join("retry-t1.json"), body).expect("write");

        let recovered = recover_processing(paths).expect("recover");

        let expected = paths.inbox_dir.join("recovered-t1.json");
        assert_eq!(recovered, vec![expected.clone()]);
        assert_eq!(fs::read_to_string(&expected).expect("read"), body);
        assert_eq!(home.count(&paths.processing_dir), 0);

        let events = home.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, EventStatus::Recovered);
        assert_eq!(events[0].task_id.as_deref(), Some("t1"));
    }

    #[test]
    fn empty_processing_is_a_no_op() {
        let home = TestHome::new();
        assert!(recover_processing(&home.settings.paths).expect("recover").is_empty());
        assert!(home.events().is_empty());
    }

    #[test]
    fn recovery_does_not_clobber_inbox_entries() {
        let home = TestHome::new();
        let paths = &home.settings.paths;
        fs::write(paths.inbox_dir.join("recovered-a.json"), "{}").expect("write");
        fs::write(paths.processing_dir.join("a.json"), "{\"x\":1}").expect("write");

        let recovered = recover_processing(paths).expect("recover");

        assert_eq!(recovered, vec![paths.inbox_dir.join("recovered-a-2.json")]);
        assert_eq!(home.count(&paths.inbox_dir), 2);
    }
}
