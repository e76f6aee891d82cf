use uuid::Uuid;

use crate::bookmarks::Bookmark;
use crate::viewer::ViewerState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Backward => -1.0,
            Direction::Forward => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    NextPage,
    PrevPage,
    /// 1-indexed page number.
    GotoPage { page: usize },
    Nudge { direction: Direction },
    ZoomIn,
    ZoomOut,
    BookmarkSelection,
    RemoveBookmark { id: Uuid },
    JumpToBookmark { id: Uuid },
}

impl Command {
    /// Default keyboard shortcuts. `key` uses DOM key names (`"ArrowUp"`, `"b"`, ...).
    pub fn for_key(key: &str, ctrl: bool) -> Option<Self> {
        let command = match (key, ctrl) {
            ("ArrowUp", false) => Command::Nudge {
                direction: Direction::Backward,
            },
            ("ArrowDown", false) => Command::Nudge {
                direction: Direction::Forward,
            },
            ("ArrowLeft", false) => Command::PrevPage,
            ("ArrowRight", false) => Command::NextPage,
            ("b", true) => Command::BookmarkSelection,
            ("=", true) => Command::ZoomIn,
            ("-", true) => Command::ZoomOut,
            _ => return None,
        };
        Some(command)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Navigated(ViewerState),
    Rescaled(f64),
    BookmarkAdded(Bookmark),
    BookmarkRemoved(Uuid),
    Ignored,
}
