//! Own and inherited error flags of a node

/// Error state of one node.
///
/// `own` is set by the node itself; `inherited` mirrors the nearest faulty
/// ancestor and is only ever changed by recursive propagation. Clearing one
/// never touches the other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorState {
    own: Option<String>,
    inherited: Option<String>,
}

impl ErrorState {
    pub fn own_error(&self) -> Option<&str> {
        self.own.as_deref()
    }

    pub fn inherited_error(&self) -> Option<&str> {
        self.inherited.as_deref()
    }

    pub fn has_own_error(&self) -> bool {
        self.own.is_some()
    }

    pub fn has_inherited_error(&self) -> bool {
        self.inherited.is_some()
    }

    /// Healthy iff neither the own nor the inherited flag is set
    pub fn is_healthy(&self) -> bool {
        self.own.is_none() && self.inherited.is_none()
    }

    /// Error text shown for this node: its own error, else the inherited one
    pub fn displayed(&self) -> Option<&str> {
        self.own.as_deref().or(self.inherited.as_deref())
    }

    /// Returns whether the displayed error changed
    pub(crate) fn set_own(&mut self, message: impl Into<String>) -> bool {
        let before = self.displayed().map(str::to_owned);
        self.own = Some(message.into());
        before.as_deref() != self.displayed()
    }

    /// Returns whether the displayed error changed
    pub(crate) fn clear_own(&mut self) -> bool {
        let before = self.displayed().map(str::to_owned);
        self.own = None;
        before.as_deref() != self.displayed()
    }

    /// Returns whether the displayed error changed
    pub(crate) fn set_inherited(&mut self, parent_error: Option<&str>) -> bool {
        let before = self.displayed().map(str::to_owned);
        self.inherited = parent_error.map(str::to_owned);
        before.as_deref() != self.displayed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_healthy() {
        let state = ErrorState::default();
        assert!(state.is_healthy());
        assert_eq!(state.displayed(), None);
    }

    #[test]
    fn test_own_error_shadows_inherited() {
        let mut state = ErrorState::default();
        assert!(state.set_inherited(Some("bus down")));
        assert_eq!(state.displayed(), Some("bus down"));

        assert!(state.set_own("sensor timeout"));
        assert_eq!(state.displayed(), Some("sensor timeout"));

        // clearing the inherited flag does not change what is shown
        assert!(!state.set_inherited(None));
        assert!(!state.is_healthy());

        assert!(state.clear_own());
        assert!(state.is_healthy());
    }

    #[test]
    fn test_clear_own_keeps_inherited() {
        let mut state = ErrorState::default();
        state.set_inherited(Some("E"));
        state.set_own("own");
        state.clear_own();
        assert!(state.has_inherited_error());
        assert!(!state.is_healthy());
    }
}
