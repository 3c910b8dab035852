mod config;
mod directory;
mod notion;
mod planner;
mod provision;
mod title;
mod video;
mod writer;

use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};

use config::Config;
use notion::NotionClient;

#[derive(Parser)]
#[command(
    name = "interview_sync",
    about = "Sync interview relation links and video embeds in a Notion workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Link interviewee/interviewer relations from interview titles
    Relations {
        /// Print the staged plan without creating or updating anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Embed video blocks into interview pages that have a video URL
    Videos,
    /// Relations then videos in one pass
    Run {
        /// Dry-run the relations phase (videos are skipped too)
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;
    let client = Arc::new(NotionClient::new(cfg.notion_key.clone())?);

    let result = match cli.command {
        Commands::Relations { dry_run } => sync_relations(&cfg, &client, dry_run).await,
        Commands::Videos => sync_videos(&cfg, &client).await,
        Commands::Run { dry_run } => {
            sync_relations(&cfg, &client, dry_run).await?;
            if dry_run {
                Ok(())
            } else {
                sync_videos(&cfg, &client).await
            }
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

async fn sync_relations(
    cfg: &Config,
    client: &Arc<NotionClient>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let directory = directory::load(client, &cfg.member_database_id).await?;
    let mut plan = planner::build(client, &cfg.interview_database_id, &directory).await?;

    if plan.updates.is_empty() {
        println!(
            "All {} interview pages already linked ({} unparsable).",
            plan.records_seen, plan.parse_failures
        );
        return Ok(());
    }

    if dry_run {
        print_plan(&plan);
        return Ok(());
    }

    let staged = plan.updates.len();
    let provisioned =
        provision::run(Arc::clone(client), &cfg.member_database_id, &mut plan.updates).await?;
    let written = writer::apply(Arc::clone(client), plan.updates).await?;

    let report = RelationReport {
        records_seen: plan.records_seen,
        parse_failures: plan.parse_failures,
        staged,
        members_created: provisioned.created,
        failed_names: provisioned.failed_names,
        updated: written.updated,
        skipped: written.skipped,
        update_failures: written.failures,
    };
    report.print();
    Ok(())
}

async fn sync_videos(cfg: &Config, client: &Arc<NotionClient>) -> anyhow::Result<()> {
    let stats = video::run(client, &cfg.interview_database_id).await?;
    stats.print();
    Ok(())
}

struct RelationReport {
    records_seen: usize,
    parse_failures: usize,
    staged: usize,
    members_created: usize,
    failed_names: Vec<String>,
    updated: usize,
    skipped: usize,
    update_failures: usize,
}

impl RelationReport {
    fn print(&self) {
        println!(
            "Scanned {} interview pages: {} staged, {} unparsable.",
            self.records_seen, self.staged, self.parse_failures
        );
        println!(
            "Created {} member pages, updated {} pages ({} skipped, {} update failures).",
            self.members_created, self.updated, self.skipped, self.update_failures
        );
        if !self.failed_names.is_empty() {
            println!(
                "Member pages could not be created for: {}",
                self.failed_names.join(", ")
            );
        }
    }
}

fn print_plan(plan: &planner::Plan) {
    println!(
        "{} of {} interview pages need linking ({} unparsable):",
        plan.updates.len(),
        plan.records_seen,
        plan.parse_failures
    );
    for update in &plan.updates {
        if let Some(link) = &update.interviewee {
            println!("  {} interviewee: {}", update.page_id, describe(link));
        }
        for link in &update.interviewers {
            println!("  {} interviewer: {}", update.page_id, describe(link));
        }
    }
}

fn describe(link: &planner::Link) -> String {
    match &link.id {
        Some(id) => format!("{} ({})", link.name, id),
        None => format!("{} (new member page)", link.name),
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
