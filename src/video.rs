use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::notion::{Block, NotionClient, Page, PROP_VIDEO_URL};

pub struct VideoStats {
    pub scanned: usize,
    pub embedded: usize,
    pub already_embedded: usize,
    pub no_url: usize,
    pub failures: usize,
}

impl VideoStats {
    pub fn print(&self) {
        println!(
            "Scanned {} interview pages: {} videos embedded, {} already embedded, {} without a URL, {} failures.",
            self.scanned, self.embedded, self.already_embedded, self.no_url, self.failures
        );
    }
}

/// Page through the interview database and embed an external video block
/// into every page that has a video URL but no video block yet.
pub async fn run(client: &NotionClient, interview_db: &str) -> Result<VideoStats> {
    let pages = client.query_all(interview_db).await?;
    let mut stats = VideoStats {
        scanned: pages.len(),
        embedded: 0,
        already_embedded: 0,
        no_url: 0,
        failures: 0,
    };

    let pb = ProgressBar::new(pages.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec})")?
            .progress_chars("=> "),
    );

    for page in &pages {
        if let Err(e) = embed_one(client, page, &mut stats).await {
            warn!("Skipping video embed for page {}: {e:#}", page.id);
            stats.failures += 1;
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!(
        "Embedded {} videos ({} already present, {} without URL, {} failures)",
        stats.embedded, stats.already_embedded, stats.no_url, stats.failures
    );
    Ok(stats)
}

async fn embed_one(client: &NotionClient, page: &Page, stats: &mut VideoStats) -> Result<()> {
    let Some(url) = page.url(PROP_VIDEO_URL)? else {
        stats.no_url += 1;
        return Ok(());
    };

    let blocks = client.list_block_children(&page.id).await?;
    if has_video_block(&blocks) {
        stats.already_embedded += 1;
        return Ok(());
    }

    client
        .append_block_children(&page.id, json!([video_block(&url)]))
        .await?;
    stats.embedded += 1;
    Ok(())
}

pub fn has_video_block(blocks: &[Block]) -> bool {
    blocks.iter().any(|b| b.kind == "video")
}

/// An external video block pointing at the stored URL.
pub fn video_block(url: &str) -> Value {
    json!({
        "object": "block",
        "type": "video",
        "video": { "type": "external", "external": { "url": url } }
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn block(kind: &str) -> Block {
        serde_json::from_value(json!({ "type": kind })).unwrap()
    }

    #[test]
    fn detects_an_existing_video_block() {
        let blocks = vec![block("paragraph"), block("video"), block("heading_1")];
        assert!(has_video_block(&blocks));
    }

    #[test]
    fn no_video_block_among_other_kinds() {
        let blocks = vec![block("paragraph"), block("embed")];
        assert!(!has_video_block(&blocks));
        assert!(!has_video_block(&[]));
    }

    #[test]
    fn video_block_payload_shape() {
        let b = video_block("https://example.com/v.mp4");
        assert_eq!(b["type"], "video");
        assert_eq!(b["video"]["type"], "external");
        assert_eq!(b["video"]["external"]["url"], "https://example.com/v.mp4");
    }
}
