mod cache;
mod classify;
mod config;
mod credential;
mod dom;
mod host;
mod overlay;
mod pr;
mod report;
mod router;
mod session;
mod watcher;

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use tracing_subscriber::EnvFilter;

use config::{Config, Theme};
use credential::{CredentialStore, MemoryStorage, NoPrompt};
use host::{HostPage, Markup, Snapshot};
use pr::{Fetcher, GitHubFetcher, PrStats, StaticFetcher, Subject};
use router::View;
use session::Session;

/// PR Badges: annotates GitHub pull request pages with age, size and
/// complexity badges and reports what ended up on the page.
#[derive(Parser, Debug)]
#[command(name = "pr-badges", version, about)]
struct Cli {
    /// GitHub page URL, a pull request (https://github.com/org/repo/pull/42)
    /// or a pulls listing (https://github.com/org/repo/pulls)
    ///
    /// Not required when --mock is used.
    page_url: Option<String>,

    /// Optional output file path for markdown report
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Use built-in mock pages and statistics (no GitHub token needed)
    #[arg(long)]
    r#mock: bool,

    /// TOML description of the page markup (rows, title, color mode)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Force the page color scheme
    #[arg(long, value_enum)]
    theme: Option<Theme>,

    /// Behave as if the system prefers a dark color scheme
    #[arg(long)]
    prefers_dark: bool,

    /// Never ask for a token on stdin
    #[arg(long)]
    no_prompt: bool,

    /// Navigate to this GitHub page URL after the first page is badged
    /// (repeatable, after any steps listed in the snapshot)
    #[arg(long = "navigate", value_name = "URL")]
    navigate: Vec<String>,
}

const MOCK_FIXTURE: &str = include_str!("../tests/fixtures/mock_pulls.toml");

#[derive(Debug, Deserialize)]
struct MockFixture {
    /// `owner/name` every mock row belongs to
    repo: String,
    #[serde(flatten)]
    page: Snapshot,
    #[serde(default)]
    stats: Vec<MockStats>,
}

#[derive(Debug, Deserialize)]
struct MockStats {
    number: u64,
    #[serde(flatten)]
    stats: PrStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("loading configuration");
    let config = Config::load()?;

    let (path, snapshot, fetcher, credentials) = if cli.r#mock {
        info!("using mock pages for demo");
        let fixture: MockFixture = toml::from_str(MOCK_FIXTURE)?;
        let path = match cli.page_url.as_deref() {
            Some(url) => pr::parse_page_url(url)?,
            None => format!("/{}/pulls", fixture.repo),
        };
        let (owner, repo) = fixture
            .repo
            .split_once('/')
            .ok_or("mock fixture repo must look like owner/name")?;
        let fetcher: Arc<dyn Fetcher> = Arc::new(StaticFetcher::new(
            fixture
                .stats
                .iter()
                .map(|mock| (Subject::new(owner, repo, mock.number), mock.stats)),
        ));
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::default()), Arc::new(NoPrompt)));
        credentials.seed("mock-token")?;
        let snapshot = match &cli.snapshot {
            Some(file) => Snapshot::load_from(file)?,
            None => fixture.page,
        };
        (path, snapshot, fetcher, credentials)
    } else {
        let page_url = cli.page_url.as_deref().ok_or(
            "Page URL is required unless --mock is used. Usage: pr-badges <URL> or pr-badges --mock",
        )?;

        info!("parsing page URL");
        let path = pr::parse_page_url(page_url)?;
        let snapshot = match &cli.snapshot {
            Some(file) => Snapshot::load_from(file)?,
            None => Snapshot::default(),
        };
        let credentials = Arc::new(CredentialStore::new(config.storage(), config.prompter(!cli.no_prompt)));
        if let Some(token) = config.github_token() {
            credentials.seed(&token)?;
        }
        let fetcher: Arc<dyn Fetcher> = Arc::new(GitHubFetcher::new(config.api_base())?);
        (path, snapshot, fetcher, credentials)
    };

    let detail = matches!(View::detect(&path), View::Detail(_));
    debug!(%path, detail, rows = snapshot.rows.len(), "building page");
    let page = Arc::new(HostPage::with_document(path.clone(), snapshot.to_document(detail)));
    snapshot.apply(&page);
    if cli.prefers_dark {
        page.set_prefers_dark(true);
    }
    if let Some(theme) = cli.theme.or(config.display.mode) {
        page.dom(|doc| doc.set_attr(doc.root(), "data-color-mode", theme.as_attr()));
    }

    let mut steps = snapshot.navigate.clone();
    steps.extend(cli.navigate.iter().map(|step| pr::parse_page_url(step)).collect::<Result<Vec<_>, _>>()?);

    let session = Session::new(page, Markup::github()?, fetcher, credentials);
    let view = session
        .browse(&steps, |doc, view| snapshot.rebuild(doc, view))
        .instrument(info_span!("badge_page", path = %path, steps = steps.len()))
        .await;
    if view == View::Inactive {
        warn!(path = %session.page.location(), "not a pull request page or pulls listing, nothing to badge");
    }

    info!("generating report");
    let built_report = report::build(&session, &view);
    session.close().await;
    report::output(&built_report, cli.output.as_deref())?;
    info!(badges = built_report.badge_count(), "done");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_fixture_parses() {
        let fixture: MockFixture = toml::from_str(MOCK_FIXTURE).unwrap();
        assert_eq!(fixture.repo, "octo-org/octo-repo");
        assert_eq!(fixture.page.rows.len(), 6);
        assert!(fixture.page.now.is_some());
        let big = fixture.stats.iter().find(|mock| mock.number == 35).unwrap();
        assert_eq!(big.stats.complexity_score(), 100);
    }

    fn mock_session(fixture: &MockFixture, path: &str, detail: bool) -> (Session, Arc<StaticFetcher>) {
        let fetcher = Arc::new(StaticFetcher::new(
            fixture
                .stats
                .iter()
                .map(|mock| (Subject::new("octo-org", "octo-repo", mock.number), mock.stats)),
        ));
        let credentials = Arc::new(CredentialStore::new(Arc::new(MemoryStorage::default()), Arc::new(NoPrompt)));
        credentials.seed("mock-token").unwrap();

        let page = Arc::new(HostPage::with_document(path, fixture.page.to_document(detail)));
        fixture.page.apply(&page);
        let session = Session::new(page, Markup::github().unwrap(), fetcher.clone(), credentials);
        (session, fetcher)
    }

    #[tokio::test]
    async fn test_mock_listing_end_to_end() {
        let fixture: MockFixture = toml::from_str(MOCK_FIXTURE).unwrap();
        let (session, fetcher) = mock_session(&fixture, "/octo-org/octo-repo/pulls", false);
        let view = session.browse(&[], |doc, view| fixture.page.rebuild(doc, view)).await;

        let report = report::build(&session, &view);
        session.close().await;
        assert_eq!(report.entries.len(), 6);
        // #12 has no statistics: age badge only.
        assert_eq!(report.badge_count(), 11);
        assert_eq!(fetcher.calls(), 6);

        let first = &report.entries[0];
        assert_eq!(first.subject, "octo-org/octo-repo#42");
        let labels: Vec<&str> = first.badges.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["2h", "Medium 36"]);
        assert!(!first.badges[0].panel.is_empty());
        let oldest = report.entries.iter().find(|e| e.subject.ends_with("#12")).unwrap();
        assert_eq!(oldest.badges[0].label, "99d+");
        assert_eq!(oldest.badges[0].tier, "stale");
    }

    #[tokio::test]
    async fn test_mock_listing_then_detail() {
        let fixture: MockFixture = toml::from_str(MOCK_FIXTURE).unwrap();
        let (session, fetcher) = mock_session(&fixture, "/octo-org/octo-repo/pulls", false);
        session.page.set_prefers_dark(true);
        let steps = vec!["/octo-org/octo-repo/pull/42".to_string()];
        let view = session.browse(&steps, |doc, view| fixture.page.rebuild(doc, view)).await;

        let report = report::build(&session, &view);
        session.close().await;
        assert_eq!(view, View::Detail(Subject::new("octo-org", "octo-repo", 42)));
        assert_eq!(report.mode, classify::DisplayMode::Dark);
        assert_eq!(report.entries.len(), 1);
        let labels: Vec<&str> = report.entries[0].badges.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["size/L", "Medium 36"]);
        // Resolved on the listing; the detail page reuses it.
        assert_eq!(fetcher.calls(), 6);
    }
}
