//! Bookmark domain library: parse Netscape bookmark exports into trees, merge trees
//! folder by folder, and render the result back into markup browsers can import.
//! The core is pure; file access lives behind the `storage` traits.

pub mod core {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    /// Title of the folder the parser wraps every document in.
    pub const SYNTHETIC_ROOT_TITLE: &str = "Bookmarks";

    /// Title given to a merge result whose inputs disagree on their own title.
    pub const MERGED_ROOT_TITLE: &str = "Merged Bookmarks";

    /* ------------------------------ Entity ------------------------------ */

    /// A folder or a bookmark. Folders own their children; leaves never have any.
    #[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase", default)]
    pub struct BookmarkNode {
        pub title: String,
        #[serde(rename = "URL")]
        pub url: String,
        /// Opaque timestamp copied from `ADD_DATE`.
        pub add_date: String,
        pub icon: String,
        pub is_dir: bool,
        /// Opaque timestamp copied from `LAST_MODIFIED` (folders only).
        pub last_modified: String,
        pub children: Vec<BookmarkNode>,
    }

    impl BookmarkNode {
        pub fn folder(title: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                is_dir: true,
                ..Self::default()
            }
        }

        pub fn leaf(title: impl Into<String>, url: impl Into<String>) -> Self {
            Self {
                title: title.into(),
                url: url.into(),
                ..Self::default()
            }
        }

        /// Empty folder titled like the parser's root.
        pub fn synthetic_root() -> Self {
            Self::folder(SYNTHETIC_ROOT_TITLE)
        }

        /// Identity used when reconciling siblings from two trees.
        pub fn match_key(&self) -> MatchKey<'_> {
            MatchKey {
                is_dir: self.is_dir,
                title: &self.title,
            }
        }

        /// `ADD_DATE` read as UNIX seconds, when it is one.
        pub fn added_at(&self) -> Option<DateTime<Utc>> {
            epoch_seconds(&self.add_date)
        }

        pub fn modified_at(&self) -> Option<DateTime<Utc>> {
            epoch_seconds(&self.last_modified)
        }

        /// Counts everything below this node.
        pub fn stats(&self) -> TreeStats {
            fn rec(node: &BookmarkNode, level: usize, out: &mut TreeStats) {
                for child in &node.children {
                    out.depth = out.depth.max(level);
                    if child.is_dir {
                        out.folders += 1;
                        rec(child, level + 1, out);
                    } else {
                        out.bookmarks += 1;
                    }
                }
            }
            let mut stats = TreeStats::default();
            rec(self, 1, &mut stats);
            stats
        }
    }

    fn epoch_seconds(raw: &str) -> Option<DateTime<Utc>> {
        let secs = raw.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    /* --------------------------- Value Objects --------------------------- */

    /// `(is_dir, title)`; URLs never take part in matching.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MatchKey<'a> {
        pub is_dir: bool,
        pub title: &'a str,
    }

    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct TreeStats {
        pub folders: usize,
        pub bookmarks: usize,
        /// Deepest nesting level; direct children of the root are level 1.
        pub depth: usize,
    }

}

pub mod markup {
    //! HTML5 reading for bookmark exports.
    //!
    //! Documents go through `html5ever` into an `RcDom`, so implied end tags, character
    //! references and error recovery follow what browsers do. Tag and attribute names
    //! come back lowercased.

    use html5ever::{ParseOpts, parse_document, tendril::TendrilSink};
    use markup5ever_rcdom::{Handle, NodeData, RcDom};
    use std::io::{self, Read};

    #[derive(Debug, thiserror::Error)]
    pub enum MarkupError {
        #[error("reading bookmark markup: {0}")]
        Read(#[from] io::Error),
    }

    /// Parse markup held in memory. HTML5 tokenizing recovers from any input.
    pub fn parse_html(input: &str) -> RcDom {
        parse_document(RcDom::default(), ParseOpts::default()).one(input)
    }

    /// Parse markup from a byte stream; invalid UTF-8 is replaced, not rejected.
    pub fn read_html<R: Read>(reader: &mut R) -> Result<RcDom, MarkupError> {
        let dom = parse_document(RcDom::default(), ParseOpts::default())
            .from_utf8()
            .read_from(reader)?;
        Ok(dom)
    }

    /* ----------------------------- Queries ----------------------------- */

    pub fn tag_name(node: &Handle) -> Option<&str> {
        match &node.data {
            NodeData::Element { name, .. } => Some(&*name.local),
            _ => None,
        }
    }

    /// First attribute named `key`; the tokenizer already drops later duplicates.
    pub fn attr(node: &Handle, key: &str) -> Option<String> {
        let NodeData::Element { attrs, .. } = &node.data else {
            return None;
        };
        attrs
            .borrow()
            .iter()
            .find(|a| &*a.name.local == key)
            .map(|a| a.value.to_string())
    }

    /// First direct text child, with character references already decoded.
    pub fn first_text(node: &Handle) -> Option<String> {
        node.children.borrow().iter().find_map(|child| match &child.data {
            NodeData::Text { contents } => Some(contents.borrow().to_string()),
            _ => None,
        })
    }

}

pub mod storage {
    use super::core::BookmarkNode;
    use anyhow::Result;
    use std::path::Path;

    /// Supplies parsed bookmark trees, typically from exported files.
    pub trait BookmarkSource {
        fn load(&self, path: &Path) -> Result<BookmarkNode>;
    }

    /// Receives a finished tree and persists it.
    pub trait BookmarkSink {
        fn store(&self, path: &Path, root: &BookmarkNode) -> Result<()>;
    }
}

pub mod parser {
    //! Builds a bookmark tree from an exported document.
    //!
    //! A `<H3>` opens a folder that collects every following sibling at its level, so the
    //! walk carries the receiving folder as an explicit cursor: a path of child indices
    //! from the root. Nodes never point back at their parents.

    use crate::core::BookmarkNode;
    use crate::markup::{MarkupError, attr, first_text, parse_html, read_html, tag_name};
    use crate::storage::BookmarkSource;
    use anyhow::{Context, Result};
    use markup5ever_rcdom::{Handle, RcDom};
    use std::{
        fs::File,
        io::{BufReader, Read},
        path::Path,
    };

    /// Parse bookmark markup into a tree under a synthetic "Bookmarks" root.
    pub fn parse_bookmarks_from_str(input: &str) -> BookmarkNode {
        bookmarks_from_dom(&parse_html(input))
    }

    /// Parse an export straight from a reader. Only the read itself can fail.
    pub fn parse_bookmarks<R: Read>(reader: &mut R) -> Result<BookmarkNode, MarkupError> {
        let dom = read_html(reader)?;
        Ok(bookmarks_from_dom(&dom))
    }

    fn bookmarks_from_dom(dom: &RcDom) -> BookmarkNode {
        let mut root = BookmarkNode::synthetic_root();
        walk(&dom.document.children.borrow(), &mut root, Cursor::default());

        let stats = root.stats();
        tracing::debug!(
            folders = stats.folders,
            bookmarks = stats.bookmarks,
            depth = stats.depth,
            "parsed bookmark markup"
        );
        root
    }

    /// Reads bookmark exports from disk.
    pub struct HtmlBookmarkParser;

    impl BookmarkSource for HtmlBookmarkParser {
        fn load(&self, path: &Path) -> Result<BookmarkNode> {
            let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
            let root = parse_bookmarks(&mut BufReader::new(file))
                .with_context(|| format!("parsing {:?}", path))?;
            Ok(root)
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Cursor(Vec<usize>);

    impl Cursor {
        fn child(&self, index: usize) -> Self {
            let mut path = self.0.clone();
            path.push(index);
            Self(path)
        }

        fn resolve<'t>(&self, root: &'t mut BookmarkNode) -> &'t mut BookmarkNode {
            self.0
                .iter()
                .fold(root, |node, &index| &mut node.children[index])
        }
    }

    fn walk(nodes: &[Handle], root: &mut BookmarkNode, mut cursor: Cursor) {
        for node in nodes {
            match tag_name(node) {
                None => {}
                Some("a") => cursor.resolve(root).children.push(bookmark_from_link(node)),
                Some("h3") => {
                    let parent = cursor.resolve(root);
                    parent.children.push(folder_from_heading(node));
                    let index = parent.children.len() - 1;
                    cursor = cursor.child(index);
                }
                Some(_) => walk(&node.children.borrow(), root, cursor.clone()),
            }
        }
    }

    fn bookmark_from_link(link: &Handle) -> BookmarkNode {
        BookmarkNode {
            title: text_of(link),
            url: attr_of(link, "href"),
            add_date: attr_of(link, "add_date"),
            icon: attr_of(link, "icon"),
            ..BookmarkNode::default()
        }
    }

    fn folder_from_heading(heading: &Handle) -> BookmarkNode {
        BookmarkNode {
            title: text_of(heading),
            add_date: attr_of(heading, "add_date"),
            last_modified: attr_of(heading, "last_modified"),
            is_dir: true,
            ..BookmarkNode::default()
        }
    }

    fn text_of(node: &Handle) -> String {
        first_text(node).unwrap_or_default()
    }

    fn attr_of(node: &Handle, key: &str) -> String {
        attr(node, key).unwrap_or_default()
    }

}

pub mod merge {
    //! Union merge of two bookmark trees.
    //!
    //! Siblings are matched on `(is_dir, title)`. Matched folders merge recursively,
    //! matched bookmarks keep the left copy, everything unmatched is carried over. The
    //! left side's children come first, then the right side's leftovers.

    use crate::core::{BookmarkNode, MERGED_ROOT_TITLE, MatchKey};
    use indexmap::IndexMap;
    use serde::Serialize;
    use std::ops::AddAssign;

    /// What a merge did, for logging.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    pub struct MergeReport {
        /// Folder pairs merged recursively.
        pub folders_merged: usize,
        /// Left bookmarks whose right-hand namesake was dropped.
        pub bookmarks_deduplicated: usize,
        /// Right-hand nodes with no left counterpart.
        pub carried_from_right: usize,
    }

    impl AddAssign for MergeReport {
        fn add_assign(&mut self, other: Self) {
            self.folders_merged += other.folders_merged;
            self.bookmarks_deduplicated += other.bookmarks_deduplicated;
            self.carried_from_right += other.carried_from_right;
        }
    }

    pub fn merge(left: &BookmarkNode, right: &BookmarkNode) -> BookmarkNode {
        merge_with_report(left, right).0
    }

    pub fn merge_with_report(
        left: &BookmarkNode,
        right: &BookmarkNode,
    ) -> (BookmarkNode, MergeReport) {
        let mut report = MergeReport::default();
        let merged = merge_folders(left, right, &mut report);
        (merged, report)
    }

    /// Left fold: `merge(merge(a, b), c)`. No trees gives an empty synthetic root.
    pub fn merge_all<'a, I>(trees: I) -> BookmarkNode
    where
        I: IntoIterator<Item = &'a BookmarkNode>,
    {
        merge_all_with_report(trees).0
    }

    pub fn merge_all_with_report<'a, I>(trees: I) -> (BookmarkNode, MergeReport)
    where
        I: IntoIterator<Item = &'a BookmarkNode>,
    {
        let mut trees = trees.into_iter();
        let Some(first) = trees.next() else {
            return (BookmarkNode::synthetic_root(), MergeReport::default());
        };
        let mut total = MergeReport::default();
        let merged = trees.fold(first.clone(), |acc, next| {
            let (merged, report) = merge_with_report(&acc, next);
            total += report;
            merged
        });
        (merged, total)
    }

    fn merge_folders(
        left: &BookmarkNode,
        right: &BookmarkNode,
        report: &mut MergeReport,
    ) -> BookmarkNode {
        let title = if left.title == right.title {
            left.title.clone()
        } else {
            MERGED_ROOT_TITLE.to_string()
        };
        let mut merged = BookmarkNode {
            title,
            add_date: left.add_date.clone(),
            last_modified: left.last_modified.clone(),
            is_dir: true,
            ..BookmarkNode::default()
        };

        let right_index = first_by_key(&right.children);
        for child in &left.children {
            match right_index.get(&child.match_key()) {
                Some(counterpart) if child.is_dir => {
                    report.folders_merged += 1;
                    merged
                        .children
                        .push(merge_folders(child, counterpart, report));
                }
                Some(_) => {
                    report.bookmarks_deduplicated += 1;
                    merged.children.push(child.clone());
                }
                None => merged.children.push(child.clone()),
            }
        }

        let left_index = first_by_key(&left.children);
        for child in &right.children {
            if !left_index.contains_key(&child.match_key()) {
                report.carried_from_right += 1;
                merged.children.push(child.clone());
            }
        }
        merged
    }

    /// First sibling per key, in sibling order.
    fn first_by_key(children: &[BookmarkNode]) -> IndexMap<MatchKey<'_>, &BookmarkNode> {
        let mut index = IndexMap::with_capacity(children.len());
        for child in children {
            index.entry(child.match_key()).or_insert(child);
        }
        index
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::core::SYNTHETIC_ROOT_TITLE;

        fn folder(title: &str, children: Vec<BookmarkNode>) -> BookmarkNode {
            let mut node = BookmarkNode::folder(title);
            node.children = children;
            node
        }

        fn leaf(title: &str, url: &str) -> BookmarkNode {
            BookmarkNode::leaf(title, url)
        }

        fn root(children: Vec<BookmarkNode>) -> BookmarkNode {
            folder(SYNTHETIC_ROOT_TITLE, children)
        }

        fn sample() -> BookmarkNode {
            root(vec![
                folder(
                    "Dev",
                    vec![
                        leaf("Rust", "https://www.rust-lang.org/"),
                        folder("Docs", vec![leaf("std", "https://doc.rust-lang.org/std/")]),
                    ],
                ),
                leaf("News", "https://news.example/"),
            ])
        }

        #[test]
        fn left_first_then_unmatched_right() {
            let left = root(vec![
                folder("A", vec![]),
                leaf("B", "https://left.example/"),
            ]);
            let right = root(vec![
                leaf("B", "https://right.example/"),
                folder("C", vec![]),
            ]);

            let merged = merge(&left, &right);
            assert_eq!(
                merged.children,
                vec![
                    folder("A", vec![]),
                    leaf("B", "https://left.example/"),
                    folder("C", vec![]),
                ]
            );
        }

        #[test]
        fn matched_folders_merge_recursively() {
            let left = root(vec![folder(
                "Dev",
                vec![leaf("Rust", "https://www.rust-lang.org/")],
            )]);
            let right = root(vec![folder(
                "Dev",
                vec![
                    leaf("Cargo", "https://doc.rust-lang.org/cargo/"),
                    leaf("Rust", "https://other.example/"),
                ],
            )]);

            let (merged, report) = merge_with_report(&left, &right);
            assert_eq!(
                merged.children,
                vec![folder(
                    "Dev",
                    vec![
                        leaf("Rust", "https://www.rust-lang.org/"),
                        leaf("Cargo", "https://doc.rust-lang.org/cargo/"),
                    ]
                )]
            );
            assert_eq!(
                report,
                MergeReport {
                    folders_merged: 1,
                    bookmarks_deduplicated: 1,
                    carried_from_right: 1,
                }
            );
        }

        #[test]
        fn folders_and_bookmarks_with_same_title_do_not_match() {
            let left = root(vec![folder("Same", vec![])]);
            let right = root(vec![leaf("Same", "https://same.example/")]);
            let merged = merge(&left, &right);
            assert_eq!(
                merged.children,
                vec![folder("Same", vec![]), leaf("Same", "https://same.example/")]
            );
        }

        #[test]
        fn root_title_is_kept_only_when_shared() {
            let merged = merge(&root(vec![]), &root(vec![]));
            assert_eq!(merged.title, SYNTHETIC_ROOT_TITLE);
            assert!(merged.is_dir);

            let merged = merge(&folder("Edge", vec![]), &folder("Chrome", vec![]));
            assert_eq!(merged.title, MERGED_ROOT_TITLE);
        }

        #[test]
        fn merging_with_empty_is_identity() {
            let tree = sample();
            let empty = BookmarkNode::synthetic_root();
            assert_eq!(merge(&tree, &empty), tree);
            assert_eq!(merge(&empty, &tree), tree);
        }

        #[test]
        fn merging_a_tree_with_itself_is_idempotent() {
            let mut tree = sample();
            tree.children[0].add_date = "1700000000".into();
            tree.children[0].last_modified = "1700000001".into();
            assert_eq!(merge(&tree, &tree), tree);
        }

        #[test]
        fn inputs_are_left_untouched() {
            let left = sample();
            let right = root(vec![folder("Dev", vec![leaf("New", "https://new.example/")])]);
            let (left_before, right_before) = (left.clone(), right.clone());
            let _ = merge(&left, &right);
            assert_eq!(left, left_before);
            assert_eq!(right, right_before);
        }

        #[test]
        fn three_way_merge_is_left_biased() {
            let a = root(vec![leaf("X", "https://a.example/"), folder("F", vec![])]);
            let b = root(vec![
                folder("F", vec![leaf("fb", "https://b.example/fb")]),
                leaf("X", "https://b.example/"),
                leaf("Y", "https://b.example/y"),
            ]);
            let c = root(vec![
                leaf("Y", "https://c.example/y"),
                leaf("Z", "https://c.example/z"),
                folder("F", vec![leaf("fc", "https://c.example/fc")]),
            ]);

            let merged = merge_all([&a, &b, &c]);
            assert_eq!(merged, merge(&merge(&a, &b), &c));
            assert_eq!(
                merged.children,
                vec![
                    leaf("X", "https://a.example/"),
                    folder(
                        "F",
                        vec![
                            leaf("fb", "https://b.example/fb"),
                            leaf("fc", "https://c.example/fc"),
                        ]
                    ),
                    leaf("Y", "https://b.example/y"),
                    leaf("Z", "https://c.example/z"),
                ]
            );
        }

        #[test]
        fn duplicate_left_folders_each_merge_with_first_right_match() {
            let left = root(vec![folder("F", vec![]), folder("F", vec![])]);
            let right = root(vec![
                folder("F", vec![leaf("one", "1")]),
                folder("F", vec![leaf("two", "2")]),
            ]);
            let merged = merge(&left, &right);
            assert_eq!(
                merged.children,
                vec![
                    folder("F", vec![leaf("one", "1")]),
                    folder("F", vec![leaf("one", "1")]),
                ]
            );
        }

        #[test]
        fn merge_all_edges() {
            assert_eq!(
                merge_all(Vec::<&BookmarkNode>::new()),
                BookmarkNode::synthetic_root()
            );
            let tree = sample();
            assert_eq!(merge_all([&tree]), tree);

            let (_, report) = merge_all_with_report([&tree, &tree, &tree]);
            assert_eq!(report.folders_merged, 4);
            assert_eq!(report.bookmarks_deduplicated, 6);
            assert_eq!(report.carried_from_right, 0);
        }
    }
}

pub mod format {
    //! Renders a tree as Netscape bookmark markup.
    //!
    //! The root's own frame is never rendered: its children sit directly in the
    //! document's top-level list. Only `&` is escaped, in titles and URLs.

    use super::core::BookmarkNode;
    use super::storage::BookmarkSink;
    use anyhow::{Context, Result};
    use std::{borrow::Cow, fmt::Write, fs, path::Path};

    pub const PREAMBLE: &str = "<!DOCTYPE NETSCAPE-Bookmark-file-1>
<!-- This is an automatically generated file.
\t It will be read and overwritten.
\t DO NOT EDIT! -->
\t <META HTTP-EQUIV=\"Content-Type\" CONTENT=\"text/html; charset=UTF-8\">
\t <TITLE>Bookmarks</TITLE>
\t <H1>Bookmarks</H1>
\t <DL><p>
";

    pub const EPILOGUE: &str = "</DL><p>\n";

    const INDENT: &str = "    ";

    pub fn serialize_bookmarks(root: &BookmarkNode) -> String {
        let mut out = String::from(PREAMBLE);
        for child in &root.children {
            render_node(&mut out, child, 1);
        }
        out.push_str(EPILOGUE);
        out
    }

    fn render_node(out: &mut String, node: &BookmarkNode, depth: usize) {
        let indent = INDENT.repeat(depth);
        if !node.is_dir {
            let _ = writeln!(
                out,
                "{indent}<DT><A HREF=\"{}\" ADD_DATE=\"{}\" ICON=\"{}\">{}</A>",
                escape_html(&node.url),
                node.add_date,
                node.icon,
                escape_html(&node.title)
            );
            return;
        }

        let _ = write!(out, "{indent}<DT><H3");
        if !node.add_date.is_empty() {
            let _ = write!(out, " ADD_DATE=\"{}\"", node.add_date);
        }
        if !node.last_modified.is_empty() {
            let _ = write!(out, " LAST_MODIFIED=\"{}\"", node.last_modified);
        }
        let _ = writeln!(out, ">{}</H3>", escape_html(&node.title));
        let _ = writeln!(out, "{indent}<DL><p>");
        for child in &node.children {
            render_node(out, child, depth + 1);
        }
        let _ = writeln!(out, "{indent}</DL><p>");
    }

    /// Escapes `&` only; `<`, `>` and quotes pass through untouched.
    pub fn escape_html(text: &str) -> Cow<'_, str> {
        if text.contains('&') {
            Cow::Owned(text.replace('&', "&amp;"))
        } else {
            Cow::Borrowed(text)
        }
    }

    /// Writes serialized markup to a file.
    pub struct HtmlFileSink;

    impl BookmarkSink for HtmlFileSink {
        fn store(&self, path: &Path, root: &BookmarkNode) -> Result<()> {
            fs::write(path, serialize_bookmarks(root).as_bytes())
                .with_context(|| format!("writing {:?}", path))
        }
    }

}

pub use format::serialize_bookmarks;
pub use merge::{merge, merge_all};
pub use parser::{HtmlBookmarkParser, parse_bookmarks, parse_bookmarks_from_str};
