use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::notion::{NotionClient, PROP_MEMBER_NAME};
use crate::planner::PendingUpdate;

const CONCURRENCY: usize = 4;

pub struct ProvisionStats {
    pub created: usize,
    /// Names whose page creation failed; their links stay unresolved and
    /// are skipped by the write phase.
    pub failed_names: Vec<String>,
}

/// Create one member page per missing name and back-fill the generated ids
/// into every staged link. No-op when nothing is missing.
pub async fn run(
    client: Arc<NotionClient>,
    member_db: &str,
    updates: &mut [PendingUpdate],
) -> Result<ProvisionStats> {
    let names = missing_names(updates);
    if names.is_empty() {
        return Ok(ProvisionStats {
            created: 0,
            failed_names: Vec::new(),
        });
    }
    info!("Creating {} member pages", names.len());

    let semaphore = Arc::new(Semaphore::new(CONCURRENCY));
    let (tx, mut rx) = tokio::sync::mpsc::channel::<(String, Result<String>)>(CONCURRENCY * 2);

    for name in names {
        let client = Arc::clone(&client);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();
        let member_db = member_db.to_string();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let properties = json!({
                PROP_MEMBER_NAME: { "title": [{ "text": { "content": name } }] }
            });
            let result = client.create_page(&member_db, properties).await;
            let _ = tx.send((name, result)).await;
        });
    }
    drop(tx);

    let mut created = HashMap::new();
    let mut failed_names = Vec::new();
    while let Some((name, result)) = rx.recv().await {
        match result {
            Ok(id) => {
                created.insert(name, id);
            }
            Err(e) => {
                warn!("Failed to create member page for {name}: {e:#}");
                failed_names.push(name);
            }
        }
    }

    backfill(updates, &created);
    Ok(ProvisionStats {
        created: created.len(),
        failed_names,
    })
}

/// Unique names, across both link sides of every update, that still need a
/// member page. One creation per name no matter how often it occurs.
pub fn missing_names(updates: &[PendingUpdate]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for update in updates {
        let links = update.interviewee.iter().chain(update.interviewers.iter());
        for link in links {
            if link.id.is_none() && seen.insert(link.name.clone()) {
                names.push(link.name.clone());
            }
        }
    }
    names
}

/// Fill created ids back into every unresolved link with a matching name.
pub fn backfill(updates: &mut [PendingUpdate], created: &HashMap<String, String>) {
    for update in updates {
        let links = update
            .interviewee
            .iter_mut()
            .chain(update.interviewers.iter_mut());
        for link in links {
            if link.id.is_none() {
                if let Some(id) = created.get(&link.name) {
                    link.id = Some(id.clone());
                }
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Link;

    fn named(name: &str) -> Link {
        Link {
            id: None,
            name: name.to_string(),
        }
    }

    fn resolved(name: &str, id: &str) -> Link {
        Link {
            id: Some(id.to_string()),
            name: name.to_string(),
        }
    }

    fn update(interviewee: Option<Link>, interviewers: Vec<Link>) -> PendingUpdate {
        PendingUpdate {
            page_id: "p-1".into(),
            interviewee,
            interviewers,
            existing_interviewers: Vec::new(),
        }
    }

    #[test]
    fn missing_names_dedupe_across_sides_and_records() {
        let updates = vec![
            update(Some(named("山田")), vec![named("鈴木"), resolved("佐藤", "id-3")]),
            update(Some(named("鈴木")), vec![named("山田"), named("山田")]),
        ];
        assert_eq!(missing_names(&updates), vec!["山田", "鈴木"]);
    }

    #[test]
    fn no_missing_names_is_empty() {
        let updates = vec![update(Some(resolved("田中", "id-1")), vec![])];
        assert!(missing_names(&updates).is_empty());
    }

    #[test]
    fn backfill_hits_every_occurrence() {
        let mut updates = vec![
            update(Some(named("山田")), vec![named("鈴木")]),
            update(None, vec![named("山田"), named("山田")]),
        ];
        let created = HashMap::from([
            ("山田".to_string(), "id-9".to_string()),
            ("鈴木".to_string(), "id-8".to_string()),
        ]);
        backfill(&mut updates, &created);

        assert_eq!(updates[0].interviewee.as_ref().unwrap().id.as_deref(), Some("id-9"));
        assert_eq!(updates[0].interviewers[0].id.as_deref(), Some("id-8"));
        assert!(updates[1].interviewers.iter().all(|l| l.id.as_deref() == Some("id-9")));
    }

    #[test]
    fn failed_names_stay_unresolved() {
        let mut updates = vec![update(Some(named("山田")), vec![named("鈴木")])];
        let created = HashMap::from([("鈴木".to_string(), "id-8".to_string())]);
        backfill(&mut updates, &created);

        assert!(updates[0].interviewee.as_ref().unwrap().id.is_none());
        assert_eq!(updates[0].interviewers[0].id.as_deref(), Some("id-8"));
    }
}
