//! Per-iteration values drawn from parallel lists

use tracing::warn;

use crate::error::EngineError;

/// Zero or more value lists advanced in lockstep
///
/// Iteration `i` consumes index `i` of every list. Lists are never
/// wrapped or repeated; running past the end of any list is a fault
/// that names the offending list.
pub struct ListFeed {
    lists: Vec<Vec<String>>,
}

impl ListFeed {
    pub fn new(lists: &[Vec<String>]) -> Self {
        Self {
            lists: lists.to_vec(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Values for `iteration`, one per list in configuration order
    ///
    /// An empty value is logged and omitted from the slice rather than
    /// substituted into templates.
    pub fn slice_at(&self, iteration: usize) -> Result<Vec<String>, EngineError> {
        let mut slice = Vec::with_capacity(self.lists.len());
        for (index, list) in self.lists.iter().enumerate() {
            let value = list
                .get(iteration)
                .ok_or(EngineError::ListExhausted { list: index, iteration })?;
            if value.is_empty() {
                warn!(list = index, iteration, "skipping empty list value");
                continue;
            }
            slice.push(value.clone());
        }
        Ok(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_lists_always_yields_empty_slice() {
        let feed = ListFeed::new(&[]);
        assert!(feed.is_empty());
        assert_eq!(feed.slice_at(0).unwrap(), Vec::<String>::new());
        assert_eq!(feed.slice_at(999).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_lockstep_slices() {
        let feed = ListFeed::new(&[
            vec!["a0".into(), "a1".into(), "a2".into()],
            vec!["b0".into(), "b1".into(), "b2".into()],
        ]);
        assert_eq!(feed.slice_at(0).unwrap(), vec!["a0", "b0"]);
        assert_eq!(feed.slice_at(2).unwrap(), vec!["a2", "b2"]);
    }

    #[test]
    fn test_exhaustion_names_list_and_iteration() {
        let feed = ListFeed::new(&[
            vec!["a0".into(), "a1".into(), "a2".into()],
            vec!["b0".into(), "b1".into()],
        ]);
        assert!(feed.slice_at(1).is_ok());
        let err = feed.slice_at(2).unwrap_err();
        assert!(matches!(
            err,
            EngineError::ListExhausted { list: 1, iteration: 2 }
        ));
        assert!(err.to_string().contains("List 1"));
    }

    #[test]
    fn test_empty_values_are_skipped() {
        let feed = ListFeed::new(&[
            vec!["a0".into()],
            vec!["".into()],
            vec!["c0".into()],
        ]);
        assert_eq!(feed.slice_at(0).unwrap(), vec!["a0", "c0"]);
    }
}
