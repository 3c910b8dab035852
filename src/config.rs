use anyhow::{Context, Result};

/// Environment-sourced settings. A local .env file is honored when present.
pub struct Config {
    pub notion_key: String,
    pub interview_database_id: String,
    pub member_database_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Ok(Self {
            notion_key: require("NOTION_KEY")?,
            interview_database_id: require("INTERVIEW_DATABASE_ID")?,
            member_database_id: require("MEMBER_DATABASE_ID")?,
        })
    }
}

fn require(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{name} environment variable must be set"))
}
