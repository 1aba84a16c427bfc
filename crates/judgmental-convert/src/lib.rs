//! Batch conversion of scraped judgment pages into finished site pages.
//!
//! [`convert_file`] is one conversion unit: store lookup, repair, template
//! composition and output, always ending with the store session committed and
//! closed. [`convert_all`] fans units out over a [`WorkerPool`] and tallies
//! the outcomes.

pub mod log;
pub mod pool;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use judgmental_core::{ConversionOutcome, ErrorKind, RepairLabel};
use judgmental_html::{MarkupError, Opinion, TemplatePage};
use judgmental_store::{MetadataStore, StoreError};
use serde::Serialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub use log::{FileLog, LogSink, MemoryLog};
pub use pool::{Completion, InlinePool, ParallelPool, PoolError, Unit, WorkerPool};

pub const CRATE_NAME: &str = "judgmental-convert";

#[derive(Debug, Clone)]
pub struct ConvertConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_file: PathBuf,
    pub database: PathBuf,
    pub template: PathBuf,
    pub workers: usize,
    pub parallel: bool,
}

impl ConvertConfig {
    pub fn from_env() -> Self {
        Self {
            input_dir: std::env::var("JUDGMENTAL_INPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./bailii")),
            output_dir: std::env::var("JUDGMENTAL_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./public_html/judgments")),
            log_file: std::env::var("JUDGMENTAL_LOG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./errors.log")),
            database: std::env::var("JUDGMENTAL_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./judgmental.db")),
            template: std::env::var("JUDGMENTAL_TEMPLATE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./templates/judgment.html")),
            workers: std::env::var("JUDGMENTAL_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default_workers),
            parallel: std::env::var("JUDGMENTAL_PARALLEL")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
        }
    }

    pub fn settings(&self) -> ConvertSettings {
        ConvertSettings {
            store_path: self.database.clone(),
            template_path: self.template.clone(),
            output_dir: self.output_dir.clone(),
        }
    }

    pub fn pool(&self) -> Box<dyn WorkerPool<ConversionOutcome>> {
        if self.parallel {
            info!(workers = self.workers, "using parallel worker pool");
            Box::new(ParallelPool::new(self.workers))
        } else {
            info!("using inline worker pool");
            Box::new(InlinePool::new())
        }
    }
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Locations every unit of a batch shares.
#[derive(Debug, Clone)]
pub struct ConvertSettings {
    pub store_path: PathBuf,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ConversionJob {
    pub input: PathBuf,
    /// Key into the store and name of the output file.
    pub basename: String,
    pub store_path: PathBuf,
    pub template_path: PathBuf,
    pub output_dir: PathBuf,
}

impl ConversionJob {
    pub fn new(input: impl Into<PathBuf>, settings: &ConvertSettings) -> Self {
        let input = input.into();
        let basename = input
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            input,
            basename,
            store_path: settings.store_path.clone(),
            template_path: settings.template_path.clone(),
            output_dir: settings.output_dir.clone(),
        }
    }

    pub fn output_path(&self) -> PathBuf {
        self.output_dir.join(&self.basename)
    }
}

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Markup(#[from] MarkupError),
    #[error("{action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConversionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(err) => err.kind(),
            Self::Markup(err) => err.kind(),
            Self::Io { .. } => ErrorKind::IoError,
        }
    }

    fn io<'a>(action: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    fn into_outcome(self) -> ConversionOutcome {
        ConversionOutcome::failure(self.kind(), self.to_string())
    }
}

/// Converts one input file. Never fails: every error becomes a failure
/// outcome, and the store session is finished before returning either way.
pub async fn convert_file(job: ConversionJob) -> ConversionOutcome {
    let mut store = match MetadataStore::open(&job.store_path).await {
        Ok(store) => store,
        Err(err) => return ConversionError::from(err).into_outcome(),
    };

    let result = run_stages(&job, &mut store).await;

    if let Err(err) = store.finish().await {
        warn!(basename = %job.basename, error = %err, "finishing metadata store session failed");
    }

    match result {
        Ok(repairs) => ConversionOutcome::success(repairs),
        Err(err) => err.into_outcome(),
    }
}

async fn run_stages(
    job: &ConversionJob,
    store: &mut MetadataStore,
) -> Result<Vec<RepairLabel>, ConversionError> {
    let metadata = store.fetch_metadata(&job.basename).await?;

    let raw = fs::read(&job.input)
        .await
        .map_err(ConversionError::io("reading", &job.input))?;
    let mut opinion = Opinion::extract(&String::from_utf8_lossy(&raw))?;
    let repairs = opinion.repair();

    let template_source = fs::read_to_string(&job.template_path)
        .await
        .map_err(ConversionError::io("reading template", &job.template_path))?;
    let page = TemplatePage::parse(&template_source)?.compose(&opinion, &metadata);

    let output = job.output_path();
    fs::write(&output, page)
        .await
        .map_err(ConversionError::io("writing", &output))?;
    Ok(repairs)
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub parallel: bool,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units whose outcome never reached the completion handler.
    pub faulted: usize,
}

pub fn success_line(basename: &str, repairs: &[RepairLabel]) -> String {
    let labels = repairs
        .iter()
        .map(|r| r.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    format!("[convert success] {basename} ({labels})")
}

pub fn failure_line(basename: &str, kind: ErrorKind, message: &str) -> String {
    format!("[convert fail] {basename} {kind}: {message}")
}

fn append_or_warn(log: &dyn LogSink, line: &str) {
    if let Err(err) = log.append(line) {
        warn!(error = %err, line, "could not append to conversion log");
    }
}

#[derive(Debug, Default)]
struct Tally {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

fn completion_handler(
    basename: String,
    tally: Arc<Tally>,
    log: Arc<dyn LogSink>,
) -> Completion<ConversionOutcome> {
    Box::new(move |outcome| match outcome {
        ConversionOutcome::Success { repairs } => {
            let count = tally.succeeded.fetch_add(1, Ordering::SeqCst) + 1;
            info!("convert:{count:>6}. {basename}");
            if !repairs.is_empty() {
                append_or_warn(log.as_ref(), &success_line(&basename, &repairs));
            }
        }
        ConversionOutcome::Failure { kind, message } => {
            tally.failed.fetch_add(1, Ordering::SeqCst);
            warn!(basename = %basename, %kind, message = %message, "conversion failed");
            append_or_warn(log.as_ref(), &failure_line(&basename, kind, &message));
        }
    })
}

/// Converts every file in `files`, isolating failures per document.
///
/// Fails up front only if the metadata store does not exist; after that the
/// run always completes and the log carries per-document failures.
pub async fn convert_all(
    files: &[PathBuf],
    settings: &ConvertSettings,
    log: Arc<dyn LogSink>,
    pool: &mut dyn WorkerPool<ConversionOutcome>,
) -> Result<BatchSummary> {
    if !settings.store_path.exists() {
        bail!(
            "no metadata store at {}; run the analysis and cross-referencing stages first",
            settings.store_path.display()
        );
    }

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    let tally = Arc::new(Tally::default());
    info!(%run_id, files = files.len(), "converting files");

    for file in files {
        let job = ConversionJob::new(file, settings);
        let span = info_span!("convert_file", %run_id, basename = %job.basename);
        let on_complete = completion_handler(job.basename.clone(), tally.clone(), log.clone());
        let unit: Unit<ConversionOutcome> = Box::pin(convert_file(job).instrument(span));
        pool.submit(unit, on_complete)
            .await
            .with_context(|| format!("submitting {}", file.display()))?;
    }

    pool.close();
    let faulted = pool.join().await;

    let succeeded = tally.succeeded.load(Ordering::SeqCst);
    let summary = format!("Converted {succeeded} files successfully");
    info!(%run_id, faulted, "{summary}");
    log.append(&summary).context("writing conversion summary")?;

    Ok(BatchSummary {
        run_id,
        started_at,
        finished_at: Utc::now(),
        parallel: pool.is_parallel(),
        submitted: files.len(),
        succeeded,
        failed: tally.failed.load(Ordering::SeqCst),
        faulted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqliteConnectOptions;
    use sqlx::Connection;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const SOURCE_PAGE: &str = "<html><body><p><a href=\"/\">Home</a> | Databases</p><hr>\
        <p>1. The appeal is dismissed.</p><p> </p><hr><p>Copyright</p></body></html>";

    fn shipped_template() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../templates/judgment.html")
    }

    struct Fixture {
        dir: TempDir,
        settings: ConvertSettings,
    }

    impl Fixture {
        fn input(&self, name: &str) -> PathBuf {
            self.dir.path().join("input").join(name)
        }

        fn output(&self, name: &str) -> PathBuf {
            self.settings.output_dir.join(name)
        }
    }

    async fn fixture(filenames: &[&str]) -> Fixture {
        let dir = tempdir().expect("tempdir");
        let store_path = dir.path().join("judgmental.db");
        let mut conn = judgmental_store::initialise(&store_path).await.expect("init store");
        sqlx::raw_sql(
            "INSERT INTO courts (id, name) VALUES (1, 'England and Wales Court of Appeal (Civil Division)');",
        )
        .execute(&mut conn)
        .await
        .expect("court");
        for (i, filename) in filenames.iter().enumerate() {
            let id = i as i64 + 1;
            sqlx::query("INSERT INTO judgments (id, filename, title, date, court_id) VALUES (?, ?, ?, ?, 1)")
                .bind(id)
                .bind(*filename)
                .bind(format!("Case {id} v Respondent"))
                .bind("2001-03-12")
                .execute(&mut conn)
                .await
                .expect("judgment");
            for n in 0..2 {
                sqlx::query("INSERT INTO citations (judgment_id, text) VALUES (?, ?)")
                    .bind(id)
                    .bind(format!("[2001] EWCA Civ {}", id * 10 + n))
                    .execute(&mut conn)
                    .await
                    .expect("citation");
            }
        }
        conn.close().await.expect("close store");

        std::fs::create_dir_all(dir.path().join("input")).unwrap();
        std::fs::create_dir_all(dir.path().join("output")).unwrap();
        let settings = ConvertSettings {
            store_path,
            template_path: shipped_template(),
            output_dir: dir.path().join("output"),
        };
        Fixture { dir, settings }
    }

    #[tokio::test]
    async fn converts_a_known_document_into_the_template() {
        let fx = fixture(&["1.html"]).await;
        std::fs::write(fx.input("1.html"), SOURCE_PAGE).unwrap();

        let outcome = convert_file(ConversionJob::new(fx.input("1.html"), &fx.settings)).await;
        assert_eq!(
            outcome,
            ConversionOutcome::success(vec![RepairLabel::EmptyParagraphsToBreaks])
        );

        let html = std::fs::read_to_string(fx.output("1.html")).unwrap();
        assert!(html.contains("<title>Case 1 v Respondent</title>"));
        assert!(html.contains("<div id=\"meta-date\">2001-03-12</div>"));
        assert!(html.contains("<span id=\"meta-citation\">[2001] EWCA Civ 10, [2001] EWCA Civ 11</span>"));
        assert!(html.contains("<h1>England and Wales Court of Appeal (Civil Division)</h1>"));
        assert!(html.contains("<p>1. The appeal is dismissed.</p>"));
        assert!(!html.contains("Opinion goes here."));
        assert!(!html.contains("Copyright"));
    }

    #[tokio::test]
    async fn unknown_document_fails_with_no_metadata_and_writes_nothing() {
        let fx = fixture(&["1.html"]).await;
        std::fs::write(fx.input("unknown.html"), SOURCE_PAGE).unwrap();

        let outcome = convert_file(ConversionJob::new(fx.input("unknown.html"), &fx.settings)).await;
        assert_eq!(
            outcome,
            ConversionOutcome::failure(ErrorKind::NoMetadata, "no metadata found")
        );
        assert!(!fx.output("unknown.html").exists());
    }

    #[tokio::test]
    async fn failed_conversions_leave_the_store_free_for_writers() {
        let fx = fixture(&["1.html"]).await;
        std::fs::write(fx.input("unknown.html"), SOURCE_PAGE).unwrap();

        let missing = convert_file(ConversionJob::new(fx.input("unknown.html"), &fx.settings)).await;
        assert!(!missing.is_success());
        let unreadable = convert_file(ConversionJob::new(fx.input("1.html"), &fx.settings)).await;
        assert!(!unreadable.is_success());

        let options = SqliteConnectOptions::new()
            .filename(&fx.settings.store_path)
            .busy_timeout(Duration::ZERO);
        let mut writer = sqlx::SqliteConnection::connect_with(&options)
            .await
            .expect("reopen store");
        sqlx::raw_sql("BEGIN EXCLUSIVE; UPDATE judgments SET title = 'Renamed'; COMMIT;")
            .execute(&mut writer)
            .await
            .expect("exclusive write after failed conversions");
        writer.close().await.expect("close store");
    }

    #[tokio::test]
    async fn broken_template_is_reported_per_document() {
        let mut fx = fixture(&["1.html"]).await;
        std::fs::write(fx.input("1.html"), SOURCE_PAGE).unwrap();
        let template = fx.dir.path().join("template.html");
        std::fs::write(
            &template,
            "<html><head><title>t</title></head><body><div id=\"content\"><h1>c</h1></div></body></html>",
        )
        .unwrap();
        fx.settings.template_path = template;

        let outcome = convert_file(ConversionJob::new(fx.input("1.html"), &fx.settings)).await;
        assert_eq!(
            outcome,
            ConversionOutcome::failure(
                ErrorKind::CantFindElement,
                "can't find element \"div.opinion > p\""
            )
        );
        assert!(!fx.output("1.html").exists());
    }

    #[tokio::test]
    async fn unreadable_input_becomes_an_io_failure() {
        let fx = fixture(&["1.html"]).await;
        let outcome = convert_file(ConversionJob::new(fx.input("1.html"), &fx.settings)).await;
        match outcome {
            ConversionOutcome::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::IoError);
                assert!(message.starts_with("reading "), "{message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    async fn run_batch(pool: &mut dyn WorkerPool<ConversionOutcome>) {
        let fx = fixture(&["1.html", "3.html"]).await;
        let files = ["1.html", "2.html", "3.html"]
            .iter()
            .map(|name| {
                std::fs::write(fx.input(name), SOURCE_PAGE).unwrap();
                fx.input(name)
            })
            .collect::<Vec<_>>();
        let log = Arc::new(MemoryLog::new());

        let summary = convert_all(&files, &fx.settings, log.clone(), pool)
            .await
            .expect("batch");

        assert_eq!(summary.submitted, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.faulted, 0);
        assert!(fx.output("1.html").exists());
        assert!(!fx.output("2.html").exists());
        assert!(fx.output("3.html").exists());

        let lines = log.lines();
        let failures = lines
            .iter()
            .filter(|l| l.starts_with("[convert fail]"))
            .collect::<Vec<_>>();
        assert_eq!(
            failures,
            vec!["[convert fail] 2.html NoMetadata: no metadata found"]
        );
        assert_eq!(
            lines
                .iter()
                .filter(|l| l.starts_with("[convert success]"))
                .count(),
            2
        );
        assert!(lines.contains(&"[convert success] 3.html (empty_paragraphs_to_breaks)".to_string()));
        assert_eq!(lines.last().map(String::as_str), Some("Converted 2 files successfully"));
    }

    #[tokio::test]
    async fn batch_isolates_a_missing_record_inline() {
        let mut pool = InlinePool::new();
        run_batch(&mut pool).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn batch_isolates_a_missing_record_in_parallel() {
        let mut pool = ParallelPool::new(3);
        run_batch(&mut pool).await;
    }

    #[tokio::test]
    async fn batch_refuses_to_run_without_a_store() {
        let dir = tempdir().expect("tempdir");
        let settings = ConvertSettings {
            store_path: dir.path().join("missing.db"),
            template_path: shipped_template(),
            output_dir: dir.path().to_path_buf(),
        };
        let log = Arc::new(MemoryLog::new());
        let mut pool = InlinePool::new();
        let err = convert_all(&[], &settings, log.clone(), &mut pool)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no metadata store"));
        assert!(log.lines().is_empty());
    }

    #[test]
    fn log_lines_name_file_and_repairs() {
        assert_eq!(
            success_line(
                "a.html",
                &[RepairLabel::MendUnclosedTags, RepairLabel::EmptyParagraphsToBreaks]
            ),
            "[convert success] a.html (mend_unclosed_tags, empty_paragraphs_to_breaks)"
        );
        assert_eq!(
            failure_line("b.html", ErrorKind::StandardConversionError, "no body tag"),
            "[convert fail] b.html StandardConversionError: no body tag"
        );
    }
}
