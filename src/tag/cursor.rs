/// A wrapping cursor over a non-empty list of choices.
///
/// An override pins a value outside the list (a filter typed at a prompt);
/// stepping the cursor clears it again.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor<T> {
    items: Vec<T>,
    index: usize,
    overridden: Option<T>,
}

impl<T: Copy + PartialEq> Cursor<T> {
    /// Returns `None` for an empty list.
    pub fn new(items: Vec<T>) -> Option<Self> {
        if items.is_empty() {
            return None;
        }
        Some(Self {
            items,
            index: 0,
            overridden: None,
        })
    }

    pub fn single(item: T) -> Self {
        Self {
            items: vec![item],
            index: 0,
            overridden: None,
        }
    }

    pub fn cur(&self) -> T {
        self.overridden.unwrap_or(self.items[self.index])
    }

    /// Steps forward. Returns true if the current value changed.
    pub fn next(&mut self) -> bool {
        let before = self.cur();
        self.overridden = None;
        self.index = (self.index + 1) % self.items.len();
        self.cur() != before
    }

    /// Steps backward. Returns true if the current value changed.
    pub fn prev(&mut self) -> bool {
        let before = self.cur();
        self.overridden = None;
        self.index = (self.index + self.items.len() - 1) % self.items.len();
        self.cur() != before
    }

    /// Pins `value` as current. Returns true if the current value changed.
    pub fn override_with(&mut self, value: T) -> bool {
        let before = self.cur();
        self.overridden = Some(value);
        self.cur() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_none() {
        assert!(Cursor::<u8>::new(Vec::new()).is_none());
    }

    #[test]
    fn test_wraps_both_ways() {
        let mut c = Cursor::new(vec![1, 2, 3]).unwrap();
        assert_eq!(c.cur(), 1);
        assert!(c.prev());
        assert_eq!(c.cur(), 3);
        assert!(c.next());
        assert!(c.next());
        assert_eq!(c.cur(), 2);
    }

    #[test]
    fn test_single_never_changes() {
        let mut c = Cursor::single(7);
        assert!(!c.next());
        assert!(!c.prev());
        assert_eq!(c.cur(), 7);
    }

    #[test]
    fn test_override_cleared_by_step() {
        let mut c = Cursor::new(vec![1, 2]).unwrap();
        assert!(c.override_with(9));
        assert_eq!(c.cur(), 9);
        assert!(!c.override_with(9));
        assert!(c.next());
        assert_eq!(c.cur(), 2);
    }
}
