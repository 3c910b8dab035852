use std::collections::HashMap;

use anyhow::Result;
use tracing::{info, warn};

use crate::notion::{NotionClient, Page, PROP_MEMBER_NAME};
use crate::title::normalize_name;

/// A member page, keyed in the directory by its normalized display name.
#[derive(Debug, Clone)]
pub struct Member {
    pub id: String,
    pub name: String,
}

pub type Directory = HashMap<String, Member>;

/// Page through the member database and build the name -> page mapping.
pub async fn load(client: &NotionClient, member_db: &str) -> Result<Directory> {
    let pages = client.query_all(member_db).await?;
    let directory = build(&pages);
    info!("Loaded {} members from {} pages", directory.len(), pages.len());
    Ok(directory)
}

/// Pages with an empty name are skipped; a later page with the same
/// normalized name overwrites an earlier one.
fn build(pages: &[Page]) -> Directory {
    let mut directory = Directory::new();
    for page in pages {
        let name = match page.title_text(PROP_MEMBER_NAME) {
            Ok(Some(name)) => name,
            Ok(None) => continue,
            Err(e) => {
                warn!("Skipping member page {}: {e:#}", page.id);
                continue;
            }
        };
        directory.insert(
            normalize_name(&name),
            Member {
                id: page.id.clone(),
                name,
            },
        );
    }
    directory
}
