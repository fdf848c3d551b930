use std::collections::BTreeSet;
use std::time::Duration;

use feishu_core::MAX_PAGE_SIZE;

const DEFAULT_MAX_PAGES: u32 = 200;
const DEFAULT_MOVE_BATCH: u64 = 90;
const DEFAULT_COOLDOWN_MS: u64 = 60_000;
const DEFAULT_COOLDOWN_TICK_MS: u64 = 500;
const DEFAULT_TASK_POLL_ATTEMPTS: u64 = 5;
const DEFAULT_TASK_POLL_BASE_MS: u64 = 500;
const DEFAULT_TASK_POLL_MAX_MS: u64 = 5_000;
const DEFAULT_STAGING_SUFFIX: &str = "_to_migrate";

/// Object kinds a wiki space accepts through `move_docs_to_wiki`.
pub const DEFAULT_WIKI_TYPES: [&str; 5] = ["doc", "docx", "sheet", "bitable", "mindnote"];

#[derive(Clone, Debug)]
pub struct MigrationConfig {
    pub page_size: u32,
    pub max_pages: u32,
    pub move_batch_size: usize,
    pub cooldown: Duration,
    pub cooldown_tick: Duration,
    pub task_poll_attempts: u32,
    pub task_poll_base: Duration,
    pub task_poll_max: Duration,
    pub supported_types: BTreeSet<String>,
    pub staging_suffix: String,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_pages: DEFAULT_MAX_PAGES,
            move_batch_size: DEFAULT_MOVE_BATCH as usize,
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            cooldown_tick: Duration::from_millis(DEFAULT_COOLDOWN_TICK_MS),
            task_poll_attempts: DEFAULT_TASK_POLL_ATTEMPTS as u32,
            task_poll_base: Duration::from_millis(DEFAULT_TASK_POLL_BASE_MS),
            task_poll_max: Duration::from_millis(DEFAULT_TASK_POLL_MAX_MS),
            supported_types: DEFAULT_WIKI_TYPES.iter().map(|t| t.to_string()).collect(),
            staging_suffix: DEFAULT_STAGING_SUFFIX.to_string(),
        }
    }
}

impl MigrationConfig {
    pub fn from_env() -> Self {
        let page_size = read_u64_env("WIKIMOVER_PAGE_SIZE", u64::from(MAX_PAGE_SIZE))
            .min(u64::from(MAX_PAGE_SIZE)) as u32;
        let max_pages = read_u64_env("WIKIMOVER_MAX_PAGES", u64::from(DEFAULT_MAX_PAGES))
            .min(u64::from(u32::MAX)) as u32;
        let move_batch_size = read_u64_env("WIKIMOVER_MOVE_BATCH", DEFAULT_MOVE_BATCH) as usize;
        let cooldown =
            Duration::from_millis(read_u64_env("WIKIMOVER_COOLDOWN_MS", DEFAULT_COOLDOWN_MS));
        let cooldown_tick = Duration::from_millis(read_u64_env(
            "WIKIMOVER_COOLDOWN_TICK_MS",
            DEFAULT_COOLDOWN_TICK_MS,
        ));
        let task_poll_attempts =
            read_u64_env("WIKIMOVER_TASK_POLL_ATTEMPTS", DEFAULT_TASK_POLL_ATTEMPTS)
                .min(u64::from(u32::MAX)) as u32;
        let supported_types = read_list_env("WIKIMOVER_WIKI_TYPES")
            .unwrap_or_else(|| DEFAULT_WIKI_TYPES.iter().map(|t| t.to_string()).collect());
        let staging_suffix = std::env::var("WIKIMOVER_STAGING_SUFFIX")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STAGING_SUFFIX.to_string());

        Self {
            page_size,
            max_pages,
            move_batch_size,
            cooldown,
            cooldown_tick,
            task_poll_attempts,
            supported_types,
            staging_suffix,
            ..Self::default()
        }
    }

    pub fn is_supported(&self, wiki_type: &str) -> bool {
        self.supported_types.contains(wiki_type)
    }
}

pub(crate) fn read_u64_env(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_list_env(name: &str) -> Option<BTreeSet<String>> {
    let value = std::env::var(name).ok()?;
    let items = parse_type_list(&value);
    (!items.is_empty()).then_some(items)
}

fn parse_type_list(value: &str) -> BTreeSet<String> {
    value
        .split([',', ' '])
        .map(|item| item.trim().to_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}
