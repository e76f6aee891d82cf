use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;
use folio_core::{
    highlighted_text, Command, CommandOutcome, DocumentBackend, DocumentSource, FileStorage,
    HostSelection, KeyValueStorage, NavigationController, NavigationRequest, NodeRole,
    Persistence, RenderOptions, ScrollInstruction, ScrollSurface, SelectionEndpoint, TextRun,
    Viewer, ViewerConfig, ViewerState,
};
use folio_render::provider_for_path;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(
    name = "folio",
    version,
    about = "Document viewer with persistent, text-anchored bookmarks"
)]
struct Args {
    /// Height of the simulated viewport in pixels
    #[arg(long = "viewport-height", default_value_t = 900.0, global = true)]
    viewport_height: f64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, Subcommand)]
enum Action {
    /// Show the document identity and the saved viewing position
    Info { file: PathBuf },
    /// Scroll to a page (1-based)
    Goto {
        file: PathBuf,
        page: usize,
        #[arg(long)]
        smooth: bool,
    },
    /// Change the zoom level
    Zoom {
        file: PathBuf,
        #[arg(value_enum)]
        direction: Option<ZoomDirection>,
        /// Absolute scale instead of a step
        #[arg(long, conflicts_with = "direction")]
        scale: Option<f64>,
    },
    /// Send a keyboard shortcut, e.g. `ArrowRight` or `--ctrl =`
    Key {
        file: PathBuf,
        key: String,
        #[arg(long)]
        ctrl: bool,
    },
    /// Bookmark text on a page, addressed by run index and character offsets
    Bookmark {
        file: PathBuf,
        /// Page to select on (1-based)
        #[arg(long)]
        page: usize,
        #[arg(long = "from-run")]
        from_run: usize,
        #[arg(long = "to-run")]
        to_run: Option<usize>,
        /// Character offset into the first run
        #[arg(long, default_value_t = 0)]
        start: usize,
        /// Character offset into the last run; defaults to its end
        #[arg(long)]
        end: Option<usize>,
        #[arg(long)]
        name: Option<String>,
    },
    /// List bookmarks grouped by page
    Bookmarks { file: PathBuf },
    /// Scroll to a bookmark's saved position
    Jump { file: PathBuf, id: Uuid },
    /// Rename a bookmark; omit the name to clear it
    Rename {
        file: PathBuf,
        id: Uuid,
        name: Option<String>,
    },
    Remove { file: PathBuf, id: Uuid },
    /// Print the text runs of a page with their indices
    Runs { file: PathBuf, page: usize },
    /// Print bookmark highlights on a page
    Highlights { file: PathBuf, page: usize },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ZoomDirection {
    In,
    Out,
}

impl Action {
    fn file(&self) -> &Path {
        match self {
            Action::Info { file }
            | Action::Goto { file, .. }
            | Action::Zoom { file, .. }
            | Action::Key { file, .. }
            | Action::Bookmark { file, .. }
            | Action::Bookmarks { file }
            | Action::Jump { file, .. }
            | Action::Rename { file, .. }
            | Action::Remove { file, .. }
            | Action::Runs { file, .. }
            | Action::Highlights { file, .. } => file,
        }
    }
}

/// Stands in for the host scroll container.
struct LoggingSurface;

impl ScrollSurface for LoggingSurface {
    fn scroll_to(&mut self, instruction: ScrollInstruction) {
        debug!(
            offset = instruction.offset,
            behavior = ?instruction.behavior,
            "scroll"
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "folio", "folio")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;
    let config = ViewerConfig::load()?;
    let state_dir = project_dirs.data_local_dir().join("state");
    let storage: Arc<dyn KeyValueStorage> = Arc::new(FileStorage::new(state_dir)?);

    let file = args.action.file().to_path_buf();
    let provider = provider_for_path(&file)?;
    let backend = provider
        .open(DocumentSource::Path(file.clone()), RenderOptions::default())
        .await
        .with_context(|| format!("failed to open {:?}", file))?;

    let mut viewer = Viewer::new(config, storage);
    let document = viewer.on_document_loaded(backend.as_ref());
    info!(identity = %document.identity, path = %file.display(), "opened");
    viewer.set_viewport_height(args.viewport_height);
    materialize(&mut viewer, backend.as_ref());

    let controller = NavigationController::new(viewer);
    let mut surface = LoggingSurface;
    run(args.action, &controller, backend.as_ref(), &mut surface).await?;

    if controller.viewer().persistence() == Persistence::SessionOnly {
        warn!("state could not be saved and will be lost on exit");
    }
    Ok(())
}

async fn run(
    action: Action,
    controller: &NavigationController,
    backend: &dyn DocumentBackend,
    surface: &mut LoggingSurface,
) -> Result<()> {
    match action {
        Action::Info { .. } => {
            let viewer = controller.viewer();
            let identity = viewer
                .identity()
                .map(ToString::to_string)
                .unwrap_or_default();
            println!("identity   {identity}");
            print_state(viewer.state());
            println!("bookmarks  {}", viewer.list_bookmarks().len());
        }
        Action::Goto { page, smooth, .. } => {
            let mut request = NavigationRequest::page(page);
            if smooth {
                request = request.smooth();
            }
            let state = controller.scroll_to(surface, request).await;
            print_state(&state);
        }
        Action::Zoom {
            direction, scale, ..
        } => {
            let changed = match (direction, scale) {
                (_, Some(scale)) => controller.set_scale(surface, scale),
                (Some(ZoomDirection::In), None) => controller.zoom_in(surface),
                (Some(ZoomDirection::Out), None) => controller.zoom_out(surface),
                (None, None) => bail!("pass `in`, `out` or --scale"),
            };
            if changed.is_none() {
                println!("scale unchanged");
            }
            print_state(controller.viewer().state());
        }
        Action::Key { key, ctrl, .. } => {
            let Some(command) = Command::for_key(&key, ctrl) else {
                bail!("no shortcut bound to {}{key}", if ctrl { "ctrl+" } else { "" });
            };
            match controller.apply(surface, command).await {
                CommandOutcome::Navigated(state) => print_state(&state),
                CommandOutcome::Rescaled(_) => print_state(controller.viewer().state()),
                CommandOutcome::BookmarkAdded(bookmark) => println!("added {}", bookmark.id),
                CommandOutcome::BookmarkRemoved(id) => println!("removed {id}"),
                CommandOutcome::Ignored => println!("nothing to do"),
            }
        }
        Action::Bookmark {
            page,
            from_run,
            to_run,
            start,
            end,
            name,
            ..
        } => {
            let page_index = page
                .checked_sub(1)
                .ok_or_else(|| anyhow!("pages are numbered from 1"))?;
            show_page(controller, backend, surface, page_index).await?;

            let selection = {
                let viewer = controller.viewer();
                let runs = viewer
                    .text_runs(page_index)
                    .ok_or_else(|| anyhow!("no text extracted for page {page}"))?;
                let page_height = viewer
                    .rendered_page(page_index)
                    .map(|rendered| rendered.size.height)
                    .unwrap_or(viewer.config().page_height);
                select_runs(
                    runs,
                    from_run,
                    to_run.unwrap_or(from_run),
                    start,
                    end,
                    page_height,
                    viewer.state().scale,
                )?
            };
            controller.viewer().on_selection_changed(Some(selection));

            let bookmark = controller
                .bookmark_current_selection()
                .ok_or_else(|| anyhow!("selection could not be bookmarked (already saved?)"))?;
            if name.is_some() {
                controller.viewer().rename_bookmark(bookmark.id, name);
            }
            println!("{}  p{}  {:?}", bookmark.id, bookmark.page_number(), bookmark.selected_text);
        }
        Action::Bookmarks { .. } => {
            let viewer = controller.viewer();
            let groups = viewer.grouped_bookmarks();
            if groups.is_empty() {
                println!("no bookmarks");
            }
            for (page_index, bookmarks) in groups {
                println!("page {}", page_index + 1);
                for bookmark in bookmarks {
                    println!("  {}  {}", bookmark.id, bookmark.label());
                }
            }
        }
        Action::Jump { id, .. } => {
            let state = controller
                .jump_to_bookmark(surface, id)
                .await
                .ok_or_else(|| anyhow!("no bookmark {id}"))?;
            print_state(&state);
        }
        Action::Rename { id, name, .. } => {
            if !controller.viewer().rename_bookmark(id, name) {
                bail!("no bookmark {id}");
            }
        }
        Action::Remove { id, .. } => {
            if !controller.viewer().remove_bookmark(id) {
                bail!("no bookmark {id}");
            }
            println!("removed {id}");
        }
        Action::Runs { page, .. } => {
            let page_index = page
                .checked_sub(1)
                .ok_or_else(|| anyhow!("pages are numbered from 1"))?;
            show_page(controller, backend, surface, page_index).await?;
            let viewer = controller.viewer();
            for run in viewer.text_runs(page_index).unwrap_or(&[]) {
                println!("{:>4}  {}", run.run_index, run.text);
            }
        }
        Action::Highlights { page, .. } => {
            let page_index = page
                .checked_sub(1)
                .ok_or_else(|| anyhow!("pages are numbered from 1"))?;
            show_page(controller, backend, surface, page_index).await?;
            let viewer = controller.viewer();
            let highlights = viewer.highlights_for_page(page_index);
            if highlights.is_empty() {
                println!("no highlights on page {page}");
            }
            for highlight in highlights {
                println!("{}  {:?}", highlight.bookmark_id, highlighted_text(&highlight.spans));
            }
        }
    }
    Ok(())
}

/// Scrolls `page_index` into view and renders it so its text runs are cached.
async fn show_page(
    controller: &NavigationController,
    backend: &dyn DocumentBackend,
    surface: &mut LoggingSurface,
    page_index: usize,
) -> Result<()> {
    let page_count = controller.viewer().page_count();
    if page_index >= page_count {
        bail!("page {} out of range (document has {page_count})", page_index + 1);
    }
    controller.go_to_page(surface, page_index + 1).await;
    materialize(&mut controller.viewer(), backend);
    Ok(())
}

fn materialize(viewer: &mut Viewer, backend: &dyn DocumentBackend) {
    if let Err(err) = viewer.materialize(backend) {
        warn!(error = %err, "some pages failed to render");
    }
}

/// Builds the selection a user would make by dragging from `start` in run `from` to `end` in
/// run `to`.
fn select_runs(
    runs: &[TextRun],
    from: usize,
    to: usize,
    start: usize,
    end: Option<usize>,
    page_height: f64,
    scale: f64,
) -> Result<HostSelection> {
    if from > to {
        bail!("--from-run must not come after --to-run");
    }
    let run = |index: usize| {
        runs.iter()
            .find(|run| run.run_index == index)
            .ok_or_else(|| anyhow!("page has no run {index}"))
    };
    let first = run(from)?;
    let last = run(to)?;
    let end = end.unwrap_or_else(|| last.text.chars().count());

    let text = if from == to {
        first
            .text
            .chars()
            .skip(start)
            .take(end.saturating_sub(start))
            .collect()
    } else {
        let mut parts = vec![first.text.chars().skip(start).collect::<String>()];
        parts.extend(
            runs.iter()
                .filter(|run| run.run_index > from && run.run_index < to)
                .map(|run| run.text.clone()),
        );
        parts.push(last.text.chars().take(end).collect());
        parts.concat()
    };

    let endpoint = |run: &TextRun, offset: usize| SelectionEndpoint {
        node_id: run.run_index as u64 + 1,
        ancestors: vec![
            NodeRole::TextSpan,
            NodeRole::TextLayer {
                page_index: run.page_index,
            },
        ],
        container_text: run.text.clone(),
        offset,
        // Runs are positioned from the bottom of the page.
        offset_top: ((page_height - run.transform.translate_y()) * scale).max(0.0),
    };

    Ok(HostSelection {
        anchor: Some(endpoint(first, start)),
        focus: Some(endpoint(last, end)),
        text,
        backward: false,
    })
}

fn print_state(state: &ViewerState) {
    println!("page       {} / {}", state.current_page, state.page_count);
    println!("offset     {:.1}", state.scroll_offset);
    println!("scale      {:.2}", state.scale);
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "folio.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    let console_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
