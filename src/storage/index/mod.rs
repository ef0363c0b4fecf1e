pub mod b_plus_tree;
pub mod index_iterator;
pub mod types;
