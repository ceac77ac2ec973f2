//! Keeping the newest message in view.

/// Surface that renders the message list.
pub trait Viewport: Send + Sync {
    /// Scroll the message list to its end. `len` is the new message count.
    fn scroll_to_end(&self, len: usize);
}

/// Viewport for surfaces that follow output on their own (terminals).
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopViewport;

impl Viewport for NoopViewport {
    fn scroll_to_end(&self, _len: usize) {}
}

/// Remembers the last message count a viewport was scrolled for.
#[derive(Debug, Default, Clone, Copy)]
pub struct ScrollAnchor {
    last_len: usize,
}

impl ScrollAnchor {
    /// Returns `true` when `len` differs from the last observed length.
    pub fn observe(&mut self, len: usize) -> bool {
        if len == self.last_len {
            return false;
        }
        self.last_len = len;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_fires_once_per_change() {
        let mut anchor = ScrollAnchor::default();
        assert!(!anchor.observe(0));
        assert!(anchor.observe(1));
        assert!(!anchor.observe(1));
        assert!(anchor.observe(2));
    }
}
