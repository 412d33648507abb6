use super::BlockNum;
use std::fmt;

/// Identifies one fixed-size block of a file. Used as the key of the
/// buffer pool's page table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId {
    file_name: String,
    number: BlockNum,
}

impl BlockId {
    pub fn new(file_name: impl Into<String>, number: BlockNum) -> Self {
        Self {
            file_name: file_name.into(),
            number,
        }
    }
    pub fn file_name(&self) -> &str {
        &self.file_name
    }
    pub fn number(&self) -> BlockNum {
        self.number
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[file {}, block {}]", self.file_name, self.number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn equal_by_value() {
        let a = BlockId::new("student.tbl", 3);
        let b = BlockId::new(String::from("student.tbl"), 3);
        assert_eq!(a, b);
        assert_ne!(a, BlockId::new("student.tbl", 4));
        assert_ne!(a, BlockId::new("dept.tbl", 3));
        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(b.to_string(), "[file student.tbl, block 3]");
    }
}
