use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::directory::Directory;
use crate::notion::{NotionClient, Page, PROP_INTERVIEWEE, PROP_INTERVIEWER, PROP_TITLE};
use crate::title;

/// A relation link to a member page. `id` is None until the member page
/// exists (the provisioner fills it in).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub id: Option<String>,
    pub name: String,
}

/// Relation links one interview page is missing. Built once per run,
/// consumed by the write phase.
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub page_id: String,
    pub interviewee: Option<Link>,
    pub interviewers: Vec<Link>,
    /// Interviewer ids already linked on the page. The write phase unions
    /// these with the staged links so a partial earlier run is never undone.
    pub existing_interviewers: Vec<String>,
}

pub struct Plan {
    pub updates: Vec<PendingUpdate>,
    pub records_seen: usize,
    pub parse_failures: usize,
}

/// Page through the interview database and stage every missing relation
/// link. Unparsable titles are warned about and skipped, never fatal.
pub async fn build(
    client: &NotionClient,
    interview_db: &str,
    directory: &Directory,
) -> Result<Plan> {
    let pages = client.query_all(interview_db).await?;
    let mut plan = Plan {
        updates: Vec::new(),
        records_seen: pages.len(),
        parse_failures: 0,
    };
    for page in &pages {
        match plan_page(page, directory) {
            Ok(Some(update)) => plan.updates.push(update),
            Ok(None) => {}
            Err(e) => {
                warn!("Skipping interview page {}: {e:#}", page.id);
                plan.parse_failures += 1;
            }
        }
    }
    info!(
        "Planned {} updates over {} interview pages ({} skipped)",
        plan.updates.len(),
        plan.records_seen,
        plan.parse_failures
    );
    Ok(plan)
}

/// Diff one interview page's parsed names against the directory and its
/// current relation links. None when nothing needs to change.
pub fn plan_page(page: &Page, directory: &Directory) -> Result<Option<PendingUpdate>> {
    let title = page.rich_text(PROP_TITLE)?.context("Empty title")?;
    let info = title::extract(&title)?;

    let interviewee_ids = page.relation_ids(PROP_INTERVIEWEE)?;
    let interviewer_ids = page.relation_ids(PROP_INTERVIEWER)?;

    let interviewee = match directory.get(&info.subject) {
        Some(member) if interviewee_ids.iter().any(|id| *id == member.id) => None,
        Some(member) => Some(Link {
            id: Some(member.id.clone()),
            name: member.name.clone(),
        }),
        None => Some(Link {
            id: None,
            name: info.subject.clone(),
        }),
    };

    // Duplicate names within one title stage duplicate links, as the first
    // iteration of this tool did.
    let interviewers: Vec<Link> = info
        .interviewers
        .iter()
        .filter_map(|name| match directory.get(name) {
            Some(member) if interviewer_ids.iter().any(|id| *id == member.id) => None,
            Some(member) => Some(Link {
                id: Some(member.id.clone()),
                name: member.name.clone(),
            }),
            None => Some(Link {
                id: None,
                name: name.clone(),
            }),
        })
        .collect();

    if interviewee.is_none() && interviewers.is_empty() {
        return Ok(None);
    }
    Ok(Some(PendingUpdate {
        page_id: page.id.clone(),
        interviewee,
        interviewers,
        existing_interviewers: interviewer_ids,
    }))
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::Member;
    use serde_json::{json, Value};

    fn interview_page(id: &str, title: &str, interviewees: &[&str], interviewers: &[&str]) -> Page {
        let rel = |ids: &[&str]| -> Vec<Value> {
            ids.iter().map(|id| json!({ "id": id })).collect()
        };
        serde_json::from_value(json!({
            "id": id,
            "properties": {
                "タイトル": { "rich_text": [{ "plain_text": title }] },
                "インタビュイー": { "relation": rel(interviewees) },
                "インタビュアー": { "relation": rel(interviewers) },
            }
        }))
        .unwrap()
    }

    fn directory(members: &[(&str, &str)]) -> Directory {
        members
            .iter()
            .map(|(name, id)| {
                (
                    name.to_string(),
                    Member {
                        id: id.to_string(),
                        name: name.to_string(),
                    },
                )
            })
            .collect()
    }

    const TITLE: &str =
        "【社員インタビュー】田中さんインタビュー（インタビューアー：鈴木さん・佐藤さん）";

    #[test]
    fn stages_resolved_links_for_known_unlinked_names() {
        let dir = directory(&[("田中", "id-1"), ("鈴木", "id-2"), ("佐藤", "id-3")]);
        let page = interview_page("p-1", TITLE, &[], &[]);

        let update = plan_page(&page, &dir).unwrap().unwrap();
        assert_eq!(
            update.interviewee,
            Some(Link {
                id: Some("id-1".into()),
                name: "田中".into()
            })
        );
        assert_eq!(update.interviewers.len(), 2);
        assert_eq!(update.interviewers[0].id.as_deref(), Some("id-2"));
        assert_eq!(update.interviewers[1].id.as_deref(), Some("id-3"));
        assert!(update.existing_interviewers.is_empty());
    }

    #[test]
    fn stages_name_only_link_for_unknown_subject() {
        let dir = directory(&[("鈴木", "id-2"), ("佐藤", "id-3")]);
        let page = interview_page("p-1", TITLE, &[], &["id-2", "id-3"]);

        let update = plan_page(&page, &dir).unwrap().unwrap();
        assert_eq!(
            update.interviewee,
            Some(Link {
                id: None,
                name: "田中".into()
            })
        );
        assert!(update.interviewers.is_empty());
    }

    #[test]
    fn fully_linked_page_emits_nothing() {
        let dir = directory(&[("田中", "id-1"), ("鈴木", "id-2"), ("佐藤", "id-3")]);
        let page = interview_page("p-1", TITLE, &["id-1"], &["id-2", "id-3"]);
        assert!(plan_page(&page, &dir).unwrap().is_none());
    }

    #[test]
    fn partially_linked_interviewers_stage_only_the_missing_one() {
        let dir = directory(&[("田中", "id-1"), ("鈴木", "id-2"), ("佐藤", "id-3")]);
        let page = interview_page("p-1", TITLE, &["id-1"], &["id-2"]);

        let update = plan_page(&page, &dir).unwrap().unwrap();
        assert!(update.interviewee.is_none());
        assert_eq!(update.interviewers.len(), 1);
        assert_eq!(update.interviewers[0].id.as_deref(), Some("id-3"));
        assert_eq!(update.existing_interviewers, vec!["id-2"]);
    }

    #[test]
    fn duplicate_interviewer_names_stage_duplicate_links() {
        let dir = directory(&[("田中", "id-1"), ("鈴木", "id-2")]);
        let page = interview_page(
            "p-1",
            "【社員インタビュー】田中さんインタビュー（インタビューアー：鈴木さん・鈴木さん）",
            &["id-1"],
            &[],
        );

        let update = plan_page(&page, &dir).unwrap().unwrap();
        assert_eq!(update.interviewers.len(), 2);
        assert_eq!(update.interviewers[0], update.interviewers[1]);
    }

    #[test]
    fn malformed_title_is_an_error() {
        let dir = directory(&[]);
        let page = interview_page("p-1", "お知らせ", &[], &[]);
        assert!(plan_page(&page, &dir).is_err());
    }

    #[test]
    fn replanning_after_a_write_converges_to_nothing() {
        let dir = directory(&[("田中", "id-1"), ("鈴木", "id-2"), ("佐藤", "id-3")]);
        let before = interview_page("p-1", TITLE, &[], &["id-2"]);
        let update = plan_page(&before, &dir).unwrap().unwrap();

        // Simulate the write: interviewee set, interviewers unioned.
        let mut interviewers = update.existing_interviewers.clone();
        interviewers.extend(update.interviewers.iter().filter_map(|l| l.id.clone()));
        let interviewee = update.interviewee.and_then(|l| l.id).unwrap();
        let interviewer_refs: Vec<&str> = interviewers.iter().map(String::as_str).collect();
        let after = interview_page("p-1", TITLE, &[interviewee.as_str()], &interviewer_refs);

        assert!(plan_page(&after, &dir).unwrap().is_none());
    }
}
