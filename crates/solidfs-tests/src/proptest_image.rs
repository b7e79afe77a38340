//! Property-Based Tests for whole images

use proptest::prelude::*;
use solidfs_reduce::MemoryTree;
use std::collections::BTreeMap;

/// A generated tree: file paths and their content.
#[derive(Debug, Clone)]
pub struct TreeModel {
    pub files: BTreeMap<String, Vec<u8>>,
}

impl TreeModel {
    pub fn to_tree(&self) -> MemoryTree {
        let mut tree = MemoryTree::new();
        for (path, data) in &self.files {
            tree.add_file(path, data.clone());
        }
        tree
    }
}

/// Content mixing random bytes with runs over a tiny alphabet, so that
/// exact and overlapping duplicates actually occur.
pub fn arb_content(max_size: usize) -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..max_size),
        prop::collection::vec(b'a'..=b'c', 0..max_size),
        (prop::collection::vec(any::<u8>(), 1..16), 0..max_size / 8 + 1)
            .prop_map(|(unit, n)| unit.repeat(n)),
    ]
}

fn arb_path() -> impl Strategy<Value = String> {
    // Directories are d*, files are f*, so a path is never both.
    (0..3usize, 0..3usize, 0..6usize).prop_map(|(depth, dir, file)| {
        let mut path = String::new();
        for level in 0..depth {
            path.push_str(&format!("d{}/", (dir + level) % 3));
        }
        path.push_str(&format!("f{}", file));
        path
    })
}

pub fn arb_tree(max_files: usize, max_size: usize) -> impl Strategy<Value = TreeModel> {
    prop::collection::btree_map(arb_path(), arb_content(max_size), 0..max_files)
        .prop_map(|files| TreeModel { files })
}
