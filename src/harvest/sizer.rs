/// Smallest request window the shrink policy will go down to.
pub const MIN_REQUEST_SPAN: u64 = 2;

/// Adaptive request-window sizing used while walking one chunk.
///
/// Timeouts halve the window so the retry of the same start block asks the
/// node for less work; the window never drops below [`MIN_REQUEST_SPAN`].
#[derive(Debug, Clone)]
pub struct SpanSizer {
    current_span: u64,
}

impl SpanSizer {
    pub fn new(initial_span: u64) -> Self {
        Self {
            current_span: initial_span.max(MIN_REQUEST_SPAN),
        }
    }

    pub fn get_span(&self) -> u64 {
        self.current_span
    }

    pub fn can_shrink(&self) -> bool {
        self.current_span > MIN_REQUEST_SPAN
    }

    /// Halves the window. Returns `false` when it was already at the floor.
    pub fn shrink_on_timeout(&mut self) -> bool {
        if !self.can_shrink() {
            return false;
        }
        self.current_span = (self.current_span / 2).max(MIN_REQUEST_SPAN);
        true
    }
}
