//! Record - the unit that moves between pipeline stages

/// Envelope around a pipeline payload
///
/// Ownership moves stage to stage; a record is never shared for concurrent
/// mutation. The payload may be mutated by processors in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    data: T,
}

impl<T> Record<T> {
    /// Wrap a payload
    #[inline]
    pub const fn new(data: T) -> Self {
        Self { data }
    }

    /// Borrow the payload
    #[inline]
    pub fn data(&self) -> &T {
        &self.data
    }

    /// Mutably borrow the payload
    #[inline]
    pub fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    /// Unwrap the payload
    #[inline]
    pub fn into_data(self) -> T {
        self.data
    }

    /// Transform the payload, keeping the envelope
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Record<U> {
        Record::new(f(self.data))
    }
}

impl<T> From<T> for Record<T> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let mut record = Record::new(vec![1, 2]);
        record.data_mut().push(3);
        assert_eq!(record.data(), &vec![1, 2, 3]);
        assert_eq!(record.into_data(), vec![1, 2, 3]);
    }

    #[test]
    fn test_record_map() {
        let record: Record<u32> = 21.into();
        assert_eq!(record.map(|v| v * 2).into_data(), 42);
    }
}
