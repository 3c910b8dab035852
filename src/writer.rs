use std::sync::Arc;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::notion::{NotionClient, PROP_INTERVIEWEE, PROP_INTERVIEWER};
use crate::planner::PendingUpdate;

const CONCURRENCY: usize = 4;

pub struct WriteStats {
    pub updated: usize,
    pub skipped: usize,
    pub failures: usize,
}

/// Apply every pending update with at least one resolved link. Writes are
/// independent and unordered; per-page failures are counted, not fatal.
pub async fn apply(client: Arc<NotionClient>, updates: Vec<PendingUpdate>) -> Result<WriteStats> {
    let mut stats = WriteStats {
        updated: 0,
        skipped: 0,
        failures: 0,
    };

    let mut jobs = Vec::new();
    for update in updates {
        match relation_properties(&update) {
            Some(properties) => jobs.push((update.page_id, properties)),
            None => stats.skipped += 1,
        }
    }
    if jobs.is_empty() {
        return Ok(stats);
    }

    let pb = ProgressBar::new(jobs.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")?
            .progress_chars("=> "),
    );

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, Result<()>)>(CONCURRENCY * 2);

    for (page_id, properties) in jobs {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let result = client.update_page(&page_id, properties).await;
            let _ = tx.send((page_id, result)).await;
        });
    }
    drop(tx);

    while let Some((page_id, result)) = rx.recv().await {
        match result {
            Ok(()) => stats.updated += 1,
            Err(e) => {
                warn!("Failed to update page {page_id}: {e:#}");
                stats.failures += 1;
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Updated {} pages ({} skipped, {} failures)",
        stats.updated, stats.skipped, stats.failures
    );
    Ok(stats)
}

/// The relation properties to PATCH for one update, or None when no staged
/// link resolved to an id (e.g. every missing member failed to provision).
/// The interviewee relation is set outright; the interviewer relation keeps
/// the page's existing links ahead of the new ones.
pub fn relation_properties(update: &PendingUpdate) -> Option<Value> {
    let mut properties = serde_json::Map::new();

    if let Some(id) = update.interviewee.as_ref().and_then(|l| l.id.as_ref()) {
        properties.insert(
            PROP_INTERVIEWEE.to_string(),
            json!({ "relation": [{ "id": id }] }),
        );
    }

    let staged: Vec<&String> = update
        .interviewers
        .iter()
        .filter_map(|l| l.id.as_ref())
        .collect();
    if !staged.is_empty() {
        let mut ids = update.existing_interviewers.clone();
        for id in staged {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        let relation: Vec<Value> = ids.iter().map(|id| json!({ "id": id })).collect();
        properties.insert(
            PROP_INTERVIEWER.to_string(),
            json!({ "relation": relation }),
        );
    }

    if properties.is_empty() {
        None
    } else {
        Some(Value::Object(properties))
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Link;

    fn resolved(name: &str, id: &str) -> Link {
        Link {
            id: Some(id.to_string()),
            name: name.to_string(),
        }
    }

    #[test]
    fn sets_both_relations() {
        let update = PendingUpdate {
            page_id: "p-1".into(),
            interviewee: Some(resolved("田中", "id-1")),
            interviewers: vec![resolved("鈴木", "id-2")],
            existing_interviewers: Vec::new(),
        };
        let props = relation_properties(&update).unwrap();
        assert_eq!(
            props["インタビュイー"]["relation"],
            serde_json::json!([{ "id": "id-1" }])
        );
        assert_eq!(
            props["インタビュアー"]["relation"],
            serde_json::json!([{ "id": "id-2" }])
        );
    }

    #[test]
    fn existing_interviewer_links_come_first_and_are_kept() {
        let update = PendingUpdate {
            page_id: "p-1".into(),
            interviewee: None,
            interviewers: vec![resolved("佐藤", "id-3")],
            existing_interviewers: vec!["id-2".into()],
        };
        let props = relation_properties(&update).unwrap();
        assert_eq!(
            props["インタビュアー"]["relation"],
            serde_json::json!([{ "id": "id-2" }, { "id": "id-3" }])
        );
        assert!(props.get("インタビュイー").is_none());
    }

    #[test]
    fn duplicate_staged_ids_are_written_once() {
        let update = PendingUpdate {
            page_id: "p-1".into(),
            interviewee: None,
            interviewers: vec![resolved("鈴木", "id-2"), resolved("鈴木", "id-2")],
            existing_interviewers: Vec::new(),
        };
        let props = relation_properties(&update).unwrap();
        assert_eq!(
            props["インタビュアー"]["relation"],
            serde_json::json!([{ "id": "id-2" }])
        );
    }

    #[test]
    fn nothing_resolved_means_skip() {
        let update = PendingUpdate {
            page_id: "p-1".into(),
            interviewee: Some(Link {
                id: None,
                name: "山田".into(),
            }),
            interviewers: vec![Link {
                id: None,
                name: "鈴木".into(),
            }],
            existing_interviewers: vec!["id-2".into()],
        };
        assert!(relation_properties(&update).is_none());
    }
}
