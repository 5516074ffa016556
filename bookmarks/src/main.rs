use std::{
    collections::{BTreeSet, HashSet},
    fmt::Write as _,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use bookmarks::HtmlBookmarkParser;
use bookmarks::core::BookmarkNode;
use bookmarks::format::HtmlFileSink;
use bookmarks::merge::merge_all_with_report;
use bookmarks::serialize_bookmarks;
use bookmarks::storage::{BookmarkSink, BookmarkSource};
use clap::{Args, Parser, Subcommand};
use tracing::{Level, debug, info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "bookmarks",
    about = "Merge browser bookmark exports into one importable file",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Merge bookmark exports left to right into a single file.
    Merge(MergeArgs),

    /// Parse bookmark exports and print their tree.
    Parse(ParseArgs),

    /// Re-emit bookmark exports in canonical form.
    Format(FormatArgs),

    /// Count folders and bookmarks in each export.
    Stats(StatsArgs),
}

#[derive(Debug, Args)]
struct MergeArgs {
    /// Bookmark files (or directories of them), in priority order.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Where to write the merged bookmarks.
    #[arg(short, long, default_value = "bookmarks.html")]
    output: PathBuf,
    /// Print the merged bookmarks instead of writing a file.
    #[arg(long)]
    stdout: bool,
    /// Skip inputs that cannot be read instead of aborting.
    #[arg(long)]
    skip_invalid: bool,
}

#[derive(Debug, Args)]
struct ParseArgs {
    /// Bookmark files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Emit JSON instead of an outline.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct FormatArgs {
    /// Bookmark files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
    /// Overwrite the file instead of printing to stdout.
    #[arg(long)]
    in_place: bool,
}

#[derive(Debug, Args)]
struct StatsArgs {
    /// Bookmark files or directories containing them.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Merge(args) => handle_merge(args),
        Commands::Parse(args) => handle_parse(args),
        Commands::Format(args) => handle_format(args),
        Commands::Stats(args) => handle_stats(args),
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn handle_merge(args: MergeArgs) -> Result<()> {
    let MergeArgs {
        inputs,
        output,
        stdout,
        skip_invalid,
    } = args;

    let merged = merge_inputs(&inputs, skip_invalid)?;
    if stdout {
        print!("{}", serialize_bookmarks(&merged));
    } else {
        HtmlFileSink.store(&output, &merged)?;
        println!("Wrote merged bookmarks to {:?}", output);
    }
    Ok(())
}

/// Parse every input and fold them left to right.
fn merge_inputs(inputs: &[PathBuf], skip_invalid: bool) -> Result<BookmarkNode> {
    let expanded = expand_inputs(inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no bookmark files found in the provided inputs");
    }

    let trees = load_all(&HtmlBookmarkParser, &expanded, skip_invalid)?;
    let (merged, report) = merge_all_with_report(&trees);
    info!(
        inputs = trees.len(),
        folders_merged = report.folders_merged,
        bookmarks_deduplicated = report.bookmarks_deduplicated,
        carried_from_right = report.carried_from_right,
        "merged bookmark trees"
    );
    Ok(merged)
}

/// Load each path in order; unreadable inputs abort unless `skip_invalid` is set.
fn load_all(
    source: &impl BookmarkSource,
    paths: &[PathBuf],
    skip_invalid: bool,
) -> Result<Vec<BookmarkNode>> {
    let mut trees = Vec::new();
    for path in paths {
        match source.load(path) {
            Ok(tree) => {
                let stats = tree.stats();
                debug!(
                    path = %path.display(),
                    folders = stats.folders,
                    bookmarks = stats.bookmarks,
                    "loaded bookmark export"
                );
                trees.push(tree);
            }
            Err(err) if skip_invalid => warn!("skipping {:?}: {err:#}", path),
            Err(err) => return Err(err),
        }
    }
    if trees.is_empty() {
        anyhow::bail!("none of the inputs could be parsed");
    }
    Ok(trees)
}

fn handle_parse(args: ParseArgs) -> Result<()> {
    let ParseArgs { inputs, json } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no bookmark files found in the provided inputs");
    }

    let parser = HtmlBookmarkParser;
    let mut parsed = Vec::new();
    for path in expanded {
        debug!("Parsing {:?}", path);
        let tree = parser.load(&path)?;
        parsed.push((path, tree));
    }

    if json {
        #[derive(serde::Serialize)]
        struct JsonOutput<'a> {
            path: String,
            bookmarks: &'a BookmarkNode,
        }

        let payload: Vec<JsonOutput<'_>> = parsed
            .iter()
            .map(|(path, tree)| JsonOutput {
                path: path.display().to_string(),
                bookmarks: tree,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&payload)?);
    } else {
        for (idx, (path, tree)) in parsed.iter().enumerate() {
            if parsed.len() > 1 {
                println!("== {} ==", path.display());
            }
            print!("{}", outline(tree));
            if parsed.len() > 1 && idx + 1 < parsed.len() {
                println!();
            }
        }
    }
    Ok(())
}

/// Indented, human-readable listing of a tree.
fn outline(root: &BookmarkNode) -> String {
    fn rec(node: &BookmarkNode, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        let added = node
            .added_at()
            .map(|at| format!(" (added {})", at.format("%Y-%m-%d")))
            .unwrap_or_default();
        if node.is_dir {
            let _ = writeln!(out, "{indent}[+] {}{added}", node.title);
            for child in &node.children {
                rec(child, depth + 1, out);
            }
        } else {
            let _ = writeln!(out, "{indent}- {} <{}>{added}", node.title, node.url);
        }
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", root.title);
    for child in &root.children {
        rec(child, 1, &mut out);
    }
    out
}

fn handle_format(args: FormatArgs) -> Result<()> {
    let FormatArgs { inputs, in_place } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no bookmark files found in the provided inputs");
    }

    let parser = HtmlBookmarkParser;
    let mut formatted = Vec::new();
    for path in expanded {
        debug!("Formatting {:?}", path);
        let tree = parser.load(&path)?;
        if in_place {
            HtmlFileSink.store(&path, &tree)?;
        } else {
            formatted.push((path, tree));
        }
    }
    if !in_place {
        print!("{}", format_listing(&formatted));
    }
    Ok(())
}

/// Canonical markup for each file; several files each get a `== path ==` header.
fn format_listing(formatted: &[(PathBuf, BookmarkNode)]) -> String {
    let headed = formatted.len() > 1;
    let mut out = String::new();
    for (idx, (path, tree)) in formatted.iter().enumerate() {
        if headed {
            if idx > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "== {} ==", path.display());
        }
        out.push_str(&serialize_bookmarks(tree));
    }
    out
}

fn handle_stats(args: StatsArgs) -> Result<()> {
    let StatsArgs { inputs } = args;
    let expanded = expand_inputs(&inputs)?;
    if expanded.is_empty() {
        anyhow::bail!("no bookmark files found in the provided inputs");
    }

    let parser = HtmlBookmarkParser;
    for path in expanded {
        let stats = parser.load(&path)?.stats();
        println!(
            "{}: {} folders, {} bookmarks, depth {}",
            path.display(),
            stats.folders,
            stats.bookmarks,
            stats.depth
        );
    }
    Ok(())
}

fn is_bookmark_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
}

/// Resolve files and directories into a de-duplicated list of export files, keeping
/// the order inputs were given in.
fn expand_inputs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = BTreeSet::new();
    for path in paths {
        let canonical =
            fs::canonicalize(path).with_context(|| format!("resolving path {:?}", path))?;
        let meta = fs::metadata(&canonical)
            .with_context(|| format!("reading metadata for {:?}", canonical))?;
        if meta.is_dir() {
            debug!("Scanning directory {:?}", canonical);
            for file in collect_bookmark_files(&canonical)? {
                if visited.insert(file.clone()) {
                    out.push(file);
                }
            }
        } else if meta.is_file() {
            // Explicitly named files are taken whatever their extension.
            if visited.insert(canonical.clone()) {
                out.push(canonical);
            }
        }
    }
    Ok(out)
}

fn collect_bookmark_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    visit_dir(dir, &mut out, &mut visited)?;
    out.sort();
    out.dedup();
    Ok(out)
}

fn visit_dir(path: &Path, out: &mut Vec<PathBuf>, visited: &mut HashSet<PathBuf>) -> Result<()> {
    let canonical = fs::canonicalize(path)?;
    if !visited.insert(canonical.clone()) {
        return Ok(());
    }
    let metadata = fs::metadata(&canonical)?;
    if metadata.is_dir() {
        for entry in fs::read_dir(&canonical)? {
            let entry = entry?;
            if entry.file_type()?.is_symlink() {
                continue;
            }
            visit_dir(&entry.path(), out, visited)?;
        }
    } else if metadata.is_file() && is_bookmark_file(&canonical) {
        debug!("Found bookmark file {:?}", canonical);
        out.push(canonical);
    }
    Ok(())
}
