//! View-time redaction.
//!
//! The cache always holds the full record; these transforms run on the
//! copy handed to a reader.

use rb_core::{Post, Thread};

/// Strips origin address and true identity from the thread and every post
/// unless the reader is privileged.
pub fn redact_for_viewer(mut thread: Thread, is_privileged: bool) -> Thread {
    if !is_privileged {
        thread.origin = None;
        thread.identity = None;
        thread.posts.iter_mut().for_each(redact_post);
    }
    thread
}

pub fn redact_post(post: &mut Post) {
    post.origin = None;
    post.identity = None;
}
