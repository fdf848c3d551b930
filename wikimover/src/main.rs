use anyhow::Context;
use feishu_core::{DEFAULT_SCOPE, FeishuClient, OAuthClient};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use wikimover::migrate::tree::Node;
use wikimover::migrate::{MigrationError, ProgressEvent, RunContext, StepState, Tree};
use wikimover::{MigrationConfig, Migrator};

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliMode {
    List { folder: String },
    Migrate { folder: String, select: Vec<String> },
    AuthUrl,
    Help,
}

fn parse_cli_mode<I>(args: I) -> anyhow::Result<CliMode>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter().skip(1);
    let Some(command) = args.next() else {
        return Ok(CliMode::Help);
    };
    match command.as_str() {
        "--help" | "-h" | "help" => Ok(CliMode::Help),
        "auth-url" => Ok(CliMode::AuthUrl),
        "list" => {
            let folder = args.next().context("list needs a folder token")?;
            if let Some(extra) = args.next() {
                anyhow::bail!("unexpected argument: {extra}");
            }
            Ok(CliMode::List { folder })
        }
        "migrate" => {
            let folder = args.next().context("migrate needs a folder token")?;
            let mut select = Vec::new();
            while let Some(arg) = args.next() {
                match arg.as_str() {
                    "--select" => select.push(args.next().context("--select needs a token")?),
                    other => anyhow::bail!("unknown argument: {other}"),
                }
            }
            Ok(CliMode::Migrate { folder, select })
        }
        other => anyhow::bail!("unknown command: {other}"),
    }
}

fn print_help() {
    println!("Usage: wikimover <command>");
    println!("  list <folder>                         List the items of a drive folder");
    println!("  migrate <folder> [--select <token>]   Move a folder (or some of its children) into a new wiki space");
    println!("  auth-url                              Print the OAuth authorization URL");
    println!();
    println!("Credentials: FEISHU_USER_ACCESS_TOKEN, or FEISHU_APP_ID + FEISHU_APP_SECRET with");
    println!("FEISHU_AUTH_CODE + FEISHU_REDIRECT_URI (or FEISHU_REFRESH_TOKEN).");
}

fn required_env(name: &str) -> anyhow::Result<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn base_url() -> Option<String> {
    std::env::var("FEISHU_BASE_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn oauth_client() -> anyhow::Result<OAuthClient> {
    let app_id = required_env("FEISHU_APP_ID")?;
    let app_secret = required_env("FEISHU_APP_SECRET")?;
    let client = match base_url() {
        Some(base) => OAuthClient::with_base_urls(&base, &base, app_id, app_secret),
        None => OAuthClient::new(app_id, app_secret),
    };
    Ok(client?)
}

async fn resolve_access_token() -> anyhow::Result<String> {
    if let Ok(token) = required_env("FEISHU_USER_ACCESS_TOKEN") {
        return Ok(token);
    }
    let client = oauth_client().context("no user access token and no app credentials")?;
    let token = if let Ok(refresh) = required_env("FEISHU_REFRESH_TOKEN") {
        client.refresh_token(&refresh).await?
    } else {
        let code = required_env("FEISHU_AUTH_CODE")?;
        let redirect = required_env("FEISHU_REDIRECT_URI")?;
        client
            .exchange_code(&code, &redirect, Some(DEFAULT_SCOPE))
            .await?
    };
    info!(expires_in = ?token.expires_in, "user access token obtained");
    Ok(token.access_token)
}

fn drive_client(token: String) -> anyhow::Result<FeishuClient> {
    let client = match base_url() {
        Some(base) => FeishuClient::with_base_url(&base, token),
        None => FeishuClient::new(token),
    };
    Ok(client?)
}

fn spawn_progress_logger(mut events: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                ProgressEvent::Step {
                    id,
                    state: StepState::Active,
                } => info!(step = id.as_str(), "step started"),
                ProgressEvent::Nodes(counter) => {
                    debug!(current = counter.current, total = counter.total, "wiki nodes")
                }
                ProgressEvent::Moves(counter) => {
                    debug!(current = counter.current, total = counter.total, "documents moved")
                }
                ProgressEvent::State(state) => debug!(?state, "run state"),
                _ => {}
            }
        }
    });
}

fn cancel_on_ctrl_c(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling migration");
            token.cancel();
        }
    });
}

async fn list(migrator: &Migrator<FeishuClient>, folder: &str) -> anyhow::Result<()> {
    let mut tree = Tree::new();
    let root = tree.add_root(folder, folder)?;
    let children = migrator.expand(&mut tree, root, &RunContext::new()).await?;
    for id in children {
        println!("{}", list_line(tree.node(id)));
    }
    Ok(())
}

fn list_line(node: &Node) -> String {
    format!("{}\t{}\t{}", node.token, node.kind, node.name)
}

async fn migrate(
    migrator: &Migrator<FeishuClient>,
    folder: &str,
    select: &[String],
) -> anyhow::Result<()> {
    let token = CancellationToken::new();
    let (ctx, events) = RunContext::with_events(token.clone());
    cancel_on_ctrl_c(token);
    spawn_progress_logger(events);

    let mut tree = Tree::new();
    let root = tree.add_root(folder, "")?;
    if select.is_empty() {
        tree.toggle(root, true)?;
    } else {
        migrator.expand(&mut tree, root, &ctx).await?;
        for wanted in select {
            let id = tree
                .find(wanted)
                .with_context(|| format!("{wanted} is not a child of {folder}"))?;
            tree.toggle(id, true)?;
        }
    }
    let summary = tree.summary();
    info!(
        folders = summary.folders,
        files = summary.files,
        "selection ready"
    );

    match migrator.run(&tree, &ctx).await {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(MigrationError::Transport {
            step,
            request,
            response,
        }) => {
            let status = response.status;
            let detail = serde_json::json!({ "request": request, "response": response });
            eprintln!("{}", serde_json::to_string_pretty(&detail)?);
            anyhow::bail!("{step} was rejected with status {status}")
        }
        Err(err) => Err(err).context("migration did not complete"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mode = parse_cli_mode(std::env::args())?;
    match mode {
        CliMode::Help => {
            print_help();
            return Ok(());
        }
        CliMode::AuthUrl => {
            let redirect = required_env("FEISHU_REDIRECT_URI")?;
            let url = oauth_client()?.authorize_url(&redirect, Some(DEFAULT_SCOPE), None)?;
            println!("{url}");
            return Ok(());
        }
        CliMode::List { .. } | CliMode::Migrate { .. } => {}
    }

    let access_token = resolve_access_token().await?;
    let migrator = Migrator::new(drive_client(access_token)?, MigrationConfig::from_env());
    match mode {
        CliMode::List { folder } => list(&migrator, &folder).await,
        CliMode::Migrate { folder, select } => migrate(&migrator, &folder, &select).await,
        CliMode::Help | CliMode::AuthUrl => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wikimover::migrate::discovery::normalize_item;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("wikimover")
            .chain(list.iter().copied())
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn parse_cli_mode_defaults_to_help() {
        assert_eq!(parse_cli_mode(args(&[])).unwrap(), CliMode::Help);
    }

    #[test]
    fn parse_cli_mode_reads_list_folder() {
        assert_eq!(
            parse_cli_mode(args(&["list", "fldcn1"])).unwrap(),
            CliMode::List {
                folder: "fldcn1".to_string()
            }
        );
    }

    #[test]
    fn parse_cli_mode_collects_selected_children() {
        let mode =
            parse_cli_mode(args(&["migrate", "root", "--select", "a", "--select", "b"])).unwrap();
        assert_eq!(
            mode,
            CliMode::Migrate {
                folder: "root".to_string(),
                select: vec!["a".to_string(), "b".to_string()],
            }
        );
    }

    #[test]
    fn list_line_marks_shortcuts_once() {
        let item: feishu_core::DriveFile = serde_json::from_value(serde_json::json!({
            "token": "sc-1",
            "name": "Roadmap",
            "type": "shortcut",
            "shortcut_info": { "target_type": "docx", "target_token": "dox-1" }
        }))
        .unwrap();
        let mut tree = Tree::new();
        let root = tree.add_root("root", "Root").unwrap();
        let id = tree.attach_children(root, vec![normalize_item(&item).unwrap()])[0];

        assert_eq!(list_line(tree.node(id)), "dox-1\tdocx\tRoadmap (shortcut)");
    }

    #[test]
    fn parse_cli_mode_rejects_unknown_arguments() {
        assert!(parse_cli_mode(args(&["migrate", "root", "--force"])).is_err());
        assert!(parse_cli_mode(args(&["migrate"])).is_err());
        assert!(parse_cli_mode(args(&["sync"])).is_err());
    }
}
