//! Units of data carried by a [`Pipe`](super::Pipe).

/// Anything a pipe can buffer. The size is what the water marks count.
pub trait Chunk: 'static {
    fn size(&self) -> usize;
}

impl Chunk for Vec<u8> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for Box<[u8]> {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for String {
    fn size(&self) -> usize {
        self.len()
    }
}

impl Chunk for &'static str {
    fn size(&self) -> usize {
        self.len()
    }
}

/// A structured item counted as one unit regardless of its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record<T>(pub T);

impl<T: 'static> Chunk for Record<T> {
    fn size(&self) -> usize {
        1
    }
}

impl<T> Record<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_chunks_count_bytes() {
        assert_eq!(vec![0u8; 5].size(), 5);
        assert_eq!("héllo".size(), 6);
        assert_eq!(String::from("abc").size(), 3);
        assert_eq!(Box::<[u8]>::from(&b"xy"[..]).size(), 2);
    }

    #[test]
    fn test_records_count_one() {
        assert_eq!(Record(vec![1, 2, 3]).size(), 1);
        assert_eq!(Record("large payload").into_inner(), "large payload");
    }
}
