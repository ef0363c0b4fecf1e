use crate::common::config::PageId;
use thiserror::Error;

/// Errors surfaced by buffer pool bookkeeping operations.
///
/// The public pool API keeps the `Option`/`bool` surface for the common
/// paths; these variants name the failure cases for logging and for callers
/// that want the reason rather than just `false`.
#[derive(Error, Debug)]
pub enum BufferPoolError {
    #[error("all frames are pinned; no victim frame available")]
    PoolExhausted,
    #[error("page {0} is not resident in the buffer pool")]
    NotResident(PageId),
    #[error("page {0} is pinned and cannot be deleted")]
    PagePinned(PageId),
    #[error("invalid page id")]
    InvalidPageId,
}

#[derive(Error, Debug)]
pub enum PageError {
    #[error("write of {data_size} bytes exceeds remaining page space {remaining_space}")]
    DataTooLarge {
        data_size: usize,
        remaining_space: usize,
    },
    #[error("offset {offset} is out of bounds for page size {page_size}")]
    InvalidOffset { offset: usize, page_size: usize },
    #[error("header page is full; cannot insert record")]
    HeaderFull,
    #[error("header page already holds a record named {0}")]
    DuplicateRecord(String),
    #[error("index name longer than {0} bytes")]
    NameTooLong(usize),
}
