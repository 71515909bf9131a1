//! # Retention Policy
//!
//! Pure decisions bounding how many threads a board keeps live, how many
//! posts a thread accepts, and how large the recent-posts ring grows.
//! Nothing in here performs I/O.

use crate::models::{RecentPost, Thread, ThreadId};

/// Live threads a board keeps before the oldest is evicted.
pub const MAX_LIVE_THREADS: usize = 30;
/// Posts a thread accepts; the next one is rejected, not evicted.
pub const MAX_THREAD_POSTS: usize = 300;
/// Entries kept in the cross-board recent-posts ring.
pub const RECENT_RING_CAPACITY: usize = 10;

/// `live_thread_count` includes the thread about to be created, so the 31st
/// thread evicts exactly one before it is stored.
pub fn should_evict_oldest_thread(live_thread_count: usize) -> bool {
    live_thread_count > MAX_LIVE_THREADS
}

/// Picks the thread whose first post is oldest; ties go to the lowest id.
///
/// Activity after the first post is ignored: the oldest-created thread goes,
/// not the least recently bumped one. Threads without posts never qualify.
pub fn select_eviction_target<'a, I>(threads: I) -> Option<ThreadId>
where
    I: IntoIterator<Item = &'a Thread>,
{
    threads
        .into_iter()
        .filter_map(|t| t.first_post().map(|op| (op.timestamp, t.id)))
        .min()
        .map(|(_, id)| id)
}

pub fn is_thread_full(post_count: usize) -> bool {
    post_count >= MAX_THREAD_POSTS
}

/// Inserts `incoming`, first dropping the entry with the smallest timestamp
/// when the ring is at capacity. Returns the dropped entry.
pub fn recent_ring_evict(ring: &mut Vec<RecentPost>, incoming: RecentPost) -> Option<RecentPost> {
    let evicted = if ring.len() >= RECENT_RING_CAPACITY {
        ring.iter()
            .enumerate()
            .min_by_key(|(_, entry)| entry.timestamp)
            .map(|(idx, _)| idx)
            .map(|idx| ring.remove(idx))
    } else {
        None
    };
    ring.push(incoming);
    evicted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Post;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn thread(id: ThreadId, op_secs: i64, last_secs: Option<i64>) -> Thread {
        let mut posts = vec![Post {
            thread_id: id,
            timestamp: at(op_secs),
            ..Post::default()
        }];
        if let Some(last) = last_secs {
            posts.push(Post {
                thread_id: id,
                timestamp: at(last),
                ..Post::default()
            });
        }
        Thread::from_posts("b", id, posts)
    }

    fn recent(secs: i64) -> RecentPost {
        RecentPost {
            post_id: secs as u64,
            timestamp: at(secs),
            ..RecentPost::default()
        }
    }

    #[test]
    fn eviction_triggers_on_the_thirty_first_thread() {
        assert!(!should_evict_oldest_thread(0));
        assert!(!should_evict_oldest_thread(30));
        assert!(should_evict_oldest_thread(31));
    }

    #[test]
    fn target_is_oldest_first_post_not_least_active() {
        // Thread 1 was created first but bumped most recently.
        let threads = vec![thread(1, 0, Some(500)), thread(2, 10, None), thread(3, 20, None)];
        assert_eq!(select_eviction_target(&threads), Some(1));
    }

    #[test]
    fn target_ties_break_on_lowest_id() {
        let threads = vec![thread(7, 5, None), thread(4, 5, None), thread(9, 6, None)];
        assert_eq!(select_eviction_target(&threads), Some(4));
    }

    #[test]
    fn empty_threads_never_qualify() {
        let threads = vec![Thread::from_posts("b", 1, Vec::new())];
        assert_eq!(select_eviction_target(&threads), None);
        assert_eq!(select_eviction_target(&Vec::<Thread>::new()), None);
    }

    #[test]
    fn thread_fills_at_three_hundred() {
        assert!(!is_thread_full(299));
        assert!(is_thread_full(300));
    }

    #[test]
    fn ring_keeps_the_ten_most_recent() {
        let mut ring = Vec::new();
        // Out-of-order arrivals: the oldest by timestamp leaves, not the first pushed.
        for secs in [5, 1, 9, 3, 7, 2, 8, 4, 6, 10] {
            assert!(recent_ring_evict(&mut ring, recent(secs)).is_none());
        }
        let evicted = recent_ring_evict(&mut ring, recent(11)).expect("eviction at capacity");
        assert_eq!(evicted.timestamp, at(1));
        assert_eq!(ring.len(), RECENT_RING_CAPACITY);

        let mut kept: Vec<i64> = ring.iter().map(|r| r.post_id as i64).collect();
        kept.sort_unstable();
        assert_eq!(kept, (2..=11).collect::<Vec<_>>());
    }
}
