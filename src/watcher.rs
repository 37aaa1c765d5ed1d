// watch the directory, not the files: table writes replace the file by rename

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::store::{AccessStore, Table};

pub struct ChangeNotifier {
    _watcher: RecommendedWatcher,
}

impl ChangeNotifier {
    pub fn start(dir: &Path, store: Arc<AccessStore>, debounce: Duration) -> notify::Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for table in changed_tables(&event) {
                    let _ = tx.send(table);
                }
            }
            Err(e) => error!(error = %e, "file watcher error"),
        })?;
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        tokio::spawn(reload_loop(rx, store, debounce));
        info!(dir = %dir.display(), "watching data directory for changes");

        Ok(Self { _watcher: watcher })
    }
}

fn changed_tables(event: &Event) -> Vec<Table> {
    if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
        return Vec::new();
    }
    event
        .paths
        .iter()
        .filter_map(|path| path.file_name()?.to_str())
        .filter_map(Table::from_file_name)
        .collect()
}

async fn reload_loop(mut rx: mpsc::UnboundedReceiver<Table>, store: Arc<AccessStore>, debounce: Duration) {
    while let Some(first) = rx.recv().await {
        // one save usually fires several events
        tokio::time::sleep(debounce).await;
        let mut dirty = HashSet::from([first]);
        while let Ok(table) = rx.try_recv() {
            dirty.insert(table);
        }

        for table in dirty {
            let store = Arc::clone(&store);
            match tokio::task::spawn_blocking(move || store.reload(table)).await {
                Ok(Ok(true)) => info!(%table, "table changed on disk, reloaded"),
                Ok(Ok(false)) => debug!(%table, "change event without new content"),
                Ok(Err(e)) => warn!(error = %e, "reload failed, keeping previous state"),
                Err(e) => error!(error = %e, %table, "reload task panicked"),
            }
        }
    }

    info!("change notifier stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn maps_table_files_and_ignores_the_rest() {
        let modify = event(
            EventKind::Modify(ModifyKind::Any),
            &["/srv/data/banned-ips.json", "/srv/data/banned-ips.json.tmp", "/srv/data/notes.txt"],
        );
        assert_eq!(changed_tables(&modify), [Table::Banned]);

        let create = event(EventKind::Create(CreateKind::File), &["/srv/data/rate-limit-config.json"]);
        assert_eq!(changed_tables(&create), [Table::Config]);

        let remove = event(EventKind::Remove(RemoveKind::File), &["/srv/data/whitelist-ips.json"]);
        assert!(changed_tables(&remove).is_empty());
    }
}
