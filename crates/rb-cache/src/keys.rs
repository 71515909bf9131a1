//! Cache key scheme.
//!
//! Keys follow `{type}:{boardId}[:{threadId}][:{id}]`; scalar entries live
//! under `global:`.

use std::fmt;

use rb_core::{BoardId, ThreadId};

/// Scalar counters projected into the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    Posts,
    Users,
    /// Total bytes of stored uploads.
    Size,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Board(BoardId),
    Thread {
        board: BoardId,
        thread: ThreadId,
    },
    Image {
        board: BoardId,
        thread: ThreadId,
        image: String,
    },
    News(u64),
    Recent {
        board: BoardId,
        thread: ThreadId,
    },
    Counter(Counter),
    Config,
}

impl CacheKey {
    pub fn board(board: &str) -> Self {
        Self::Board(board.to_string())
    }

    pub fn thread(board: &str, thread: ThreadId) -> Self {
        Self::Thread {
            board: board.to_string(),
            thread,
        }
    }

    pub fn image(board: &str, thread: ThreadId, image: &str) -> Self {
        Self::Image {
            board: board.to_string(),
            thread,
            image: image.to_string(),
        }
    }

    pub fn recent(board: &str, thread: ThreadId) -> Self {
        Self::Recent {
            board: board.to_string(),
            thread,
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Board(board) => write!(f, "board:{board}"),
            Self::Thread { board, thread } => write!(f, "thread:{board}:{thread}"),
            Self::Image {
                board,
                thread,
                image,
            } => write!(f, "image:{board}:{thread}:{image}"),
            Self::News(id) => write!(f, "news:{id}"),
            Self::Recent { board, thread } => write!(f, "recent:{board}:{thread}"),
            Self::Counter(Counter::Posts) => f.write_str("global:postcount"),
            Self::Counter(Counter::Users) => f.write_str("global:usercount"),
            Self::Counter(Counter::Size) => f.write_str("global:size"),
            Self::Config => f.write_str("global:config"),
        }
    }
}

/// Prefixes for enumerating families of keys.
pub mod prefix {
    use rb_core::ThreadId;

    pub const BOARDS: &str = "board:";
    pub const NEWS: &str = "news:";
    pub const RECENT: &str = "recent:";

    pub fn threads(board: &str) -> String {
        format!("thread:{board}:")
    }

    pub fn images(board: &str) -> String {
        format!("image:{board}:")
    }

    pub fn thread_images(board: &str, thread: ThreadId) -> String {
        format!("image:{board}:{thread}:")
    }

    pub fn recent(board: &str) -> String {
        format!("recent:{board}:")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_render_namespaced() {
        assert_eq!(CacheKey::board("b").to_string(), "board:b");
        assert_eq!(CacheKey::thread("b", 3).to_string(), "thread:b:3");
        assert_eq!(CacheKey::image("b", 3, "abc").to_string(), "image:b:3:abc");
        assert_eq!(CacheKey::News(7).to_string(), "news:7");
        assert_eq!(CacheKey::recent("b", 3).to_string(), "recent:b:3");
        assert_eq!(CacheKey::Counter(Counter::Posts).to_string(), "global:postcount");
        assert_eq!(CacheKey::Config.to_string(), "global:config");
    }

    #[test]
    fn board_prefixes_do_not_overlap() {
        // "thread:b:" must not match keys of board "bb".
        assert!(!CacheKey::thread("bb", 1)
            .to_string()
            .starts_with(&prefix::threads("b")));
        assert!(CacheKey::image("b", 2, "x")
            .to_string()
            .starts_with(&prefix::thread_images("b", 2)));
        assert!(!CacheKey::image("b", 21, "x")
            .to_string()
            .starts_with(&prefix::thread_images("b", 2)));
    }
}
