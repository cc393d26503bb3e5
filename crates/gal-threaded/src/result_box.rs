use std::sync::Mutex;

use crate::sync::lock;

/// One-shot slot a synchronous invoke reads its answer from.
///
/// The producer parks an `Arc<ResultBox<T>>` in the reference table, the
/// backend thread `set`s it while executing the command, and the producer
/// `take`s it once the invoke has returned.
#[derive(Debug)]
pub struct ResultBox<T> {
    value: Mutex<Option<T>>,
}

impl<T> Default for ResultBox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResultBox<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        *lock(&self.value) = Some(value);
    }

    pub fn take(&self) -> Option<T> {
        lock(&self.value).take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_empties_the_box() {
        let result = ResultBox::new();
        assert_eq!(result.take(), None::<u32>);
        result.set(5);
        assert_eq!(result.take(), Some(5));
        assert_eq!(result.take(), None);
    }
}
